use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::{
    poller::ChainPoller,
    queue::MessageSender,
    store::BlockStore,
    types::{Batch, DeliveryOutcome, DomainId, Message, RelayerError, WriteReport},
};

/// Performs the destination-side effect of a single message.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, message: &Message) -> Result<()>;
}

/// Uniform contract the relayer core drives every chain through.
#[async_trait]
pub trait RelayedChain: Send + Sync {
    /// Polls the source chain until `cancel` fires, pushing discovered batches
    /// onto `msg_tx`. Unrecoverable start-up failures are reported on
    /// `sys_err`.
    async fn poll_events(
        &self,
        cancel: CancellationToken,
        sys_err: mpsc::UnboundedSender<RelayerError>,
        msg_tx: MessageSender,
    );

    /// Delivers `messages` to this chain.
    async fn write(&self, messages: Batch) -> Result<WriteReport>;

    fn domain_id(&self) -> DomainId;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// `write` waits for every delivery and reports each outcome.
    #[default]
    Awaited,
    /// Deliveries run detached; failures are only logged.
    Detached,
}

/// Where a chain adapter resumes polling from.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    pub start_block: Option<u64>,
    pub latest_block: bool,
    pub fresh_start: bool,
}

pub struct ChainAdapter {
    poller: ChainPoller,
    executor: Arc<dyn Executor>,
    store: BlockStore,
    start: StartOptions,
    delivery_mode: DeliveryMode,
}

impl ChainAdapter {
    pub fn new(
        poller: ChainPoller,
        executor: Arc<dyn Executor>,
        store: BlockStore,
        start: StartOptions,
        delivery_mode: DeliveryMode,
    ) -> Self {
        Self {
            poller,
            executor,
            store,
            start,
            delivery_mode,
        }
    }
}

#[async_trait]
impl RelayedChain for ChainAdapter {
    #[instrument(skip_all, fields(domain_id = self.domain_id()))]
    async fn poll_events(
        &self,
        cancel: CancellationToken,
        sys_err: mpsc::UnboundedSender<RelayerError>,
        msg_tx: MessageSender,
    ) {
        info!("Polling blocks");

        let start_block = match self.store.start_block(
            self.domain_id(),
            self.start.start_block,
            self.start.latest_block,
            self.start.fresh_start,
        ) {
            Ok(start_block) => start_block,
            Err(source) => {
                error!(error = %source, "Failed to resolve start block");
                let err = RelayerError::StartBlock {
                    domain_id: self.domain_id(),
                    source,
                };
                if sys_err.send(err).is_err() {
                    error!("System error channel closed");
                }
                return;
            }
        };

        self.poller.poll(cancel, start_block, msg_tx).await;
    }

    #[instrument(skip_all, fields(domain_id = self.domain_id(), messages = messages.len()))]
    async fn write(&self, messages: Batch) -> Result<WriteReport> {
        let mut deliveries = Vec::with_capacity(messages.len());

        for message in messages {
            let executor = self.executor.clone();
            let task_message = message.clone();
            let handle = tokio::spawn(async move {
                let result = executor.execute(&task_message).await;
                if let Err(e) = &result {
                    error!(msg.id = %task_message.id(), error = %e, "Failed writing message");
                }
                result
            });
            deliveries.push((message, handle));
        }

        let mut report = WriteReport::default();
        for (message, handle) in deliveries {
            let outcome = match self.delivery_mode {
                DeliveryMode::Detached => DeliveryOutcome::Dispatched,
                DeliveryMode::Awaited => match handle.await {
                    Ok(Ok(())) => DeliveryOutcome::Delivered,
                    Ok(Err(e)) => DeliveryOutcome::Failed(e.to_string()),
                    Err(e) => DeliveryOutcome::Failed(format!("delivery task failed: {e}")),
                },
            };
            report.outcomes.push((message, outcome));
        }

        Ok(report)
    }

    fn domain_id(&self) -> DomainId {
        self.poller.domain_id()
    }
}
