use anyhow::Result;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{metrics::Metrics, queue::MessageSender, store::BlockStore, types::DomainId};

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Decodes events in the inclusive range `[start_block, end_block]` and
    /// pushes the resulting batches onto `msg_tx`.
    async fn handle_event(
        &self,
        start_block: u64,
        end_block: u64,
        msg_tx: &MessageSender,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub domain_id: DomainId,
    pub block_retry_interval: Duration,
    pub block_confirmations: u64,
    pub block_interval: u64,
}

/// A range ending (exclusively) at `end_block` is safe to read once the head
/// is at least `block_confirmations` blocks past it.
pub fn is_range_final(head: u64, end_block: u64, block_confirmations: u64) -> bool {
    head.checked_sub(end_block)
        .is_some_and(|delta| delta >= block_confirmations)
}

pub struct ChainPoller {
    client: Arc<dyn ChainClient>,
    handlers: Vec<Arc<dyn EventHandler>>,
    store: BlockStore,
    metrics: Arc<dyn Metrics>,
    config: PollerConfig,
}

impl ChainPoller {
    pub fn new(
        client: Arc<dyn ChainClient>,
        handlers: Vec<Arc<dyn EventHandler>>,
        store: BlockStore,
        metrics: Arc<dyn Metrics>,
        mut config: PollerConfig,
    ) -> Self {
        if config.block_interval == 0 {
            warn!(domain_id = config.domain_id, "Block interval of 0, reading one block at a time");
            config.block_interval = 1;
        }
        Self {
            client,
            handlers,
            store,
            metrics,
            config,
        }
    }

    pub fn domain_id(&self) -> DomainId {
        self.config.domain_id
    }

    /// Walks the chain in fixed windows of `block_interval` blocks, starting
    /// at `start_block` (or the current head when `None`), until `cancel`
    /// fires.
    #[instrument(skip_all, name = "chain_poller", fields(domain_id = self.config.domain_id))]
    pub async fn poll(
        &self,
        cancel: CancellationToken,
        start_block: Option<u64>,
        msg_tx: MessageSender,
    ) {
        info!(?start_block, "Starting chain poller");

        let interval = self.config.block_interval;
        let mut start_block = start_block;

        loop {
            if cancel.is_cancelled() {
                info!("Chain poller stopped");
                return;
            }

            let head = match self.client.latest_block().await {
                Ok(head) => head,
                Err(e) => {
                    error!(error = %e, "Unable to get latest block");
                    self.backoff(&cancel).await;
                    continue;
                }
            };

            let start = *start_block.get_or_insert(head);
            let end = start.saturating_add(interval);

            if !is_range_final(head, end, self.config.block_confirmations) {
                debug!(head, end, "Block difference is too low");
                self.backoff(&cancel).await;
                continue;
            }

            self.metrics.track_block_delta(self.config.domain_id, head, end);
            debug!(start, end, "Fetching events for block range");

            for handler in &self.handlers {
                if let Err(e) = handler.handle_event(start, end - 1, &msg_tx).await {
                    error!(error = %e, start, end, "Unable to handle events");
                }
            }

            // Not critical, the range is simply re-read after a restart.
            if let Err(e) = self.store.store_block(end, self.config.domain_id) {
                error!(error = %e, block = end, "Failed to write latest block to block store");
            }

            start_block = Some(end);
        }
    }

    async fn backoff(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = time::sleep(self.config.block_retry_interval) => {}
        }
    }
}
