pub mod app;
pub mod chain;
pub mod config;
pub mod evm;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod processor;
pub mod queue;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use app::{DispatchConfig, QueueSettings, RegisteredChain, RelayerApp};
pub use chain::{ChainAdapter, DeliveryMode, Executor, RelayedChain, StartOptions};
pub use config::{ChainConfig, ConfigError, RelayerConfig};
pub use metrics::{Metrics, TracingMetrics};
pub use poller::{ChainClient, ChainPoller, EventHandler, PollerConfig};
pub use processor::{DomainAllowList, MessageProcessor, PayloadShape};
pub use queue::{MessageReceiver, MessageSender, OverflowPolicy, QueueError};
pub use store::{BlockStore, KeyValueStore, StoreError};
pub use types::{
    Batch, DeliveryOutcome, DomainId, Message, ProcessorError, RelayerError, TransferType,
    WriteReport,
};
