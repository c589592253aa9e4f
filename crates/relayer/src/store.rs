//! Durable per-domain progress cursor.
//!
//! The cursor is the block number through which a domain's events have been
//! read. It is written by that domain's poller only, so implementations need no
//! cross-domain coordination.

use parking_lot::RwLock;
use std::{collections::HashMap, path::Path, sync::Arc};
use tracing::debug;

use crate::types::DomainId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("corrupt block entry under {key}: expected 8 bytes, got {len}")]
    Corrupt { key: String, len: usize },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal key-value capability the block store is built on.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;
}

impl KeyValueStore for sled::Db {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(sled::Tree::get(self, key)?.map(|value| value.to_vec()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.insert(key, value)?;
        self.flush()?;
        Ok(())
    }
}

/// In-memory key-value store, useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

#[derive(Clone)]
pub struct BlockStore {
    db: Arc<dyn KeyValueStore>,
}

impl BlockStore {
    pub fn new(db: Arc<dyn KeyValueStore>) -> Self {
        Self { db }
    }

    /// Opens (or creates) a sled database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self::new(Arc::new(db)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    fn key(domain_id: DomainId) -> String {
        format!("chain:{domain_id}:block")
    }

    pub fn store_block(&self, block: u64, domain_id: DomainId) -> StoreResult<()> {
        self.db
            .set(Self::key(domain_id).as_bytes(), &block.to_be_bytes())
    }

    pub fn last_stored_block(&self, domain_id: DomainId) -> StoreResult<Option<u64>> {
        let key = Self::key(domain_id);
        let Some(value) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };

        let bytes: [u8; 8] = value
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupt {
                key,
                len: value.len(),
            })?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    /// Resolves the block a poller should resume from.
    ///
    /// Returns `None` when polling should begin at the chain's current head,
    /// which only the poller can observe.
    ///
    /// Unless `fresh_start` is set, a persisted cursor wins over everything
    /// else; a configured start block ahead of the cursor is still honoured.
    /// Without a usable cursor, `latest_block` selects the current head and
    /// otherwise the configured start block (or genesis) is used.
    pub fn start_block(
        &self,
        domain_id: DomainId,
        configured: Option<u64>,
        latest_block: bool,
        fresh_start: bool,
    ) -> StoreResult<Option<u64>> {
        if !fresh_start {
            if let Some(cursor) = self.last_stored_block(domain_id)? {
                let start = configured.map_or(cursor, |configured| configured.max(cursor));
                debug!(domain_id, cursor, start, "Resuming from stored block");
                return Ok(Some(start));
            }
        }

        if latest_block {
            return Ok(None);
        }

        Ok(Some(configured.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_block_per_domain() {
        let store = BlockStore::in_memory();

        store.store_block(100, 1).unwrap();
        store.store_block(7, 2).unwrap();
        store.store_block(110, 1).unwrap();

        assert_eq!(store.last_stored_block(1).unwrap(), Some(110));
        assert_eq!(store.last_stored_block(2).unwrap(), Some(7));
        assert_eq!(store.last_stored_block(3).unwrap(), None);
    }

    #[test]
    fn stored_cursor_wins_without_fresh_start() {
        let store = BlockStore::in_memory();
        store.store_block(150, 1).unwrap();

        assert_eq!(store.start_block(1, Some(90), false, false).unwrap(), Some(150));
        assert_eq!(store.start_block(1, None, true, false).unwrap(), Some(150));
    }

    #[test]
    fn configured_start_ahead_of_cursor_is_honoured() {
        let store = BlockStore::in_memory();
        store.store_block(50, 1).unwrap();

        assert_eq!(store.start_block(1, Some(90), false, false).unwrap(), Some(90));
    }

    #[test]
    fn fresh_start_ignores_cursor() {
        let store = BlockStore::in_memory();
        store.store_block(150, 1).unwrap();

        assert_eq!(store.start_block(1, Some(90), false, true).unwrap(), Some(90));
        assert_eq!(store.start_block(1, Some(90), true, true).unwrap(), None);
    }

    #[test]
    fn latest_block_without_cursor_uses_head() {
        let store = BlockStore::in_memory();

        assert_eq!(store.start_block(1, Some(90), true, false).unwrap(), None);
    }

    #[test]
    fn defaults_to_configured_or_genesis() {
        let store = BlockStore::in_memory();

        assert_eq!(store.start_block(1, Some(90), false, false).unwrap(), Some(90));
        assert_eq!(store.start_block(1, None, false, false).unwrap(), Some(0));
    }

    #[test]
    fn rejects_corrupt_entries() {
        let db = Arc::new(MemoryStore::default());
        db.set(b"chain:4:block", &[1, 2, 3]).unwrap();
        let store = BlockStore::new(db);

        let err = store.last_stored_block(4).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { len: 3, .. }));
    }

    #[test]
    fn sled_backed_store_round_trips_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("progress")).unwrap();

        assert_eq!(store.start_block(9, Some(10), false, false).unwrap(), Some(10));
        store.store_block(4242, 9).unwrap();
        assert_eq!(store.start_block(9, Some(10), false, false).unwrap(), Some(4242));
    }
}
