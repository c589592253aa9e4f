use ethers::core::types::Address;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    app::{DispatchConfig, QueueSettings},
    chain::{DeliveryMode, StartOptions},
    poller::PollerConfig,
    queue::OverflowPolicy,
    types::{DomainId, TransferType},
};

pub const DEFAULT_BLOCK_RETRY_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_BLOCK_CONFIRMATIONS: u64 = 10;
pub const DEFAULT_BLOCK_INTERVAL: u64 = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_WORKERS: usize = 16;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("At least one chain must be configured")]
    NoChains,

    #[error("Domain {0} is configured more than once")]
    DuplicateDomain(DomainId),

    #[error("Chain {0}: block_interval must be greater than 0")]
    ZeroBlockInterval(String),

    #[error("Chain {0}: queue_capacity must be greater than 0")]
    ZeroQueueCapacity(String),

    #[error("workers must be greater than 0")]
    ZeroWorkers,
}

// Bridge handler contract and the kind of deposits it records
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HandlerConfig {
    pub address: Address,
    pub kind: TransferType,
}

// Config structures
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub domain_id: DomainId,
    pub chain_id: u64,
    pub rpc_url: String,
    pub bridge_address: Address,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
    /// Signing key for proposal execution, falls back to `RELAYER_PRIVATE_KEY`.
    #[serde(default, skip_serializing)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    #[serde(default)]
    pub gas_price: Option<u64>,

    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default)]
    pub latest_block: bool,
    #[serde(default)]
    pub fresh_start: bool,
    #[serde(default = "default_block_retry_interval_ms")]
    pub block_retry_interval_ms: u64,
    #[serde(default = "default_block_confirmations")]
    pub block_confirmations: u64,
    #[serde(default = "default_block_interval")]
    pub block_interval: u64,

    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

impl ChainConfig {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            domain_id: self.domain_id,
            block_retry_interval: Duration::from_millis(self.block_retry_interval_ms),
            block_confirmations: self.block_confirmations,
            block_interval: self.block_interval,
        }
    }

    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            start_block: self.start_block,
            latest_block: self.latest_block,
            fresh_start: self.fresh_start,
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            capacity: self.queue_capacity,
            policy: self.overflow_policy,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayerConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    pub chains: Vec<ChainConfig>,
}

impl RelayerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: RelayerConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::NoChains);
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.domain_id) {
                return Err(ConfigError::DuplicateDomain(chain.domain_id));
            }
            if chain.block_interval == 0 {
                return Err(ConfigError::ZeroBlockInterval(chain.name.clone()));
            }
            if chain.queue_capacity == 0 {
                return Err(ConfigError::ZeroQueueCapacity(chain.name.clone()));
            }
        }

        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.workers,
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }

    pub fn domain_ids(&self) -> Vec<DomainId> {
        self.chains.iter().map(|c| c.domain_id).collect()
    }
}

fn default_block_retry_interval_ms() -> u64 {
    DEFAULT_BLOCK_RETRY_INTERVAL_MS
}

fn default_block_confirmations() -> u64 {
    DEFAULT_BLOCK_CONFIRMATIONS
}

fn default_block_interval() -> u64 {
    DEFAULT_BLOCK_INTERVAL
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

fn default_store_path() -> PathBuf {
    PathBuf::from("relayer-db")
}
