use futures::{stream, StreamExt};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Semaphore},
    time,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    chain::RelayedChain,
    metrics::Metrics,
    processor::MessageProcessor,
    queue::{self, MessageReceiver, OverflowPolicy},
    types::{Batch, DeliveryOutcome, DomainId, RelayerError, WriteReport},
};

/// Intake and dispatch limits of the relayer core.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of batches written concurrently to one destination.
    pub workers: usize,
    pub shutdown_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-chain intake queue settings.
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub capacity: usize,
    pub policy: OverflowPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 64,
            policy: OverflowPolicy::Block,
        }
    }
}

/// A chain registered with the relayer together with its intake settings.
pub struct RegisteredChain {
    pub chain: Arc<dyn RelayedChain>,
    pub queue: QueueSettings,
}

impl RegisteredChain {
    pub fn new(chain: Arc<dyn RelayedChain>) -> Self {
        Self {
            chain,
            queue: QueueSettings::default(),
        }
    }

    pub fn with_queue(mut self, queue: QueueSettings) -> Self {
        self.queue = queue;
        self
    }
}

/// Why a batch did not reach its destination writer.
#[derive(Debug)]
pub(crate) enum RouteOutcome {
    Empty,
    Dropped(RelayerError),
    Written(WriteReport),
    WriteFailed(RelayerError),
}

struct Destination {
    chain: Arc<dyn RelayedChain>,
    // In-flight writes to this destination.
    writers: Semaphore,
}

pub(crate) struct Router {
    registry: HashMap<DomainId, Destination>,
    processors: Vec<Arc<dyn MessageProcessor>>,
    metrics: Arc<dyn Metrics>,
}

impl Router {
    pub(crate) fn new(
        chains: impl IntoIterator<Item = Arc<dyn RelayedChain>>,
        processors: Vec<Arc<dyn MessageProcessor>>,
        metrics: Arc<dyn Metrics>,
        writers: usize,
    ) -> Self {
        let mut registry = HashMap::new();
        for chain in chains {
            let domain_id = chain.domain_id();
            let destination = Destination {
                chain,
                writers: Semaphore::new(writers.max(1)),
            };
            if registry.insert(domain_id, destination).is_some() {
                warn!(domain_id, "Domain registered twice, keeping the last chain");
            }
        }
        Self {
            registry,
            processors,
            metrics,
        }
    }

    /// Resolves the batch destination, runs the processor pipeline and hands
    /// the batch to the destination writer.
    #[instrument(skip_all, name = "route", fields(messages = msgs.len()))]
    pub(crate) async fn route(&self, mut msgs: Batch) -> RouteOutcome {
        let Some(destination) = msgs.first().map(|m| m.destination) else {
            return RouteOutcome::Empty;
        };

        let Some(dest) = self.registry.get(&destination) else {
            error!(destination, "No chain registered for destination");
            return RouteOutcome::Dropped(RelayerError::UnknownDestination(destination));
        };

        debug!(destination, "Routing {} messages", msgs.len());
        for m in msgs.iter_mut() {
            debug!(msg.id = %m.id(), "Routing message {m}");
            self.metrics.track_deposit_message(m);
            for processor in &self.processors {
                if let Err(source) = processor.process(m) {
                    error!(msg.id = %m.id(), error = %source, "Failed processing message");
                    return RouteOutcome::Dropped(RelayerError::Rejected {
                        id: m.id(),
                        source,
                    });
                }
            }
        }

        let _slot = dest.writers.acquire().await.ok();
        let report = match dest.chain.write(msgs.clone()).await {
            Ok(report) => report,
            Err(e) => {
                for m in &msgs {
                    error!(msg.id = %m.id(), error = %e, destination, "Failed sending message");
                    self.metrics.track_execution_error(m);
                }
                return RouteOutcome::WriteFailed(RelayerError::WriteFailed {
                    domain_id: destination,
                    source: e,
                });
            }
        };

        for (m, outcome) in &report.outcomes {
            match outcome {
                DeliveryOutcome::Failed(reason) => {
                    error!(msg.id = %m.id(), %reason, destination, "Message execution failed");
                    self.metrics.track_execution_error(m);
                }
                DeliveryOutcome::Delivered | DeliveryOutcome::Dispatched => {
                    self.metrics.track_successful_execution_latency(m);
                }
            }
        }

        RouteOutcome::Written(report)
    }
}

pub struct RelayerApp {
    chains: Vec<RegisteredChain>,
    processors: Vec<Arc<dyn MessageProcessor>>,
    metrics: Arc<dyn Metrics>,
    config: DispatchConfig,
}

impl RelayerApp {
    #[instrument(skip_all, fields(chains_count = chains.len()))]
    pub fn new(
        chains: Vec<RegisteredChain>,
        metrics: Arc<dyn Metrics>,
        config: DispatchConfig,
    ) -> Self {
        info!("Initializing relayer application");
        Self {
            chains,
            processors: Vec::new(),
            metrics,
            config,
        }
    }

    /// Appends a processor to the end of the pipeline.
    pub fn with_processor(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Starts every chain's poller and routes their batches until `cancel`
    /// fires or every chain has stopped producing.
    ///
    /// Unrecoverable per-chain failures are reported on `sys_err`. Before
    /// returning, in-flight routing and polling get up to the configured
    /// shutdown timeout to finish.
    #[instrument(skip_all, name = "relayer")]
    pub async fn start(self, cancel: CancellationToken, sys_err: mpsc::UnboundedSender<RelayerError>) {
        info!("Starting relayer");

        let tracker = TaskTracker::new();
        let mut chains = Vec::with_capacity(self.chains.len());
        let mut receivers: Vec<MessageReceiver> = Vec::with_capacity(self.chains.len());

        for registered in self.chains {
            let chain = registered.chain;
            let domain_id = chain.domain_id();
            info!(domain_id, "Starting chain");
            chains.push(chain.clone());

            let (msg_tx, msg_rx) = queue::channel(registered.queue.capacity, registered.queue.policy);
            receivers.push(msg_rx);

            let cancel = cancel.clone();
            let sys_err = sys_err.clone();
            tracker.spawn(async move { chain.poll_events(cancel, sys_err, msg_tx).await });
        }

        let router = Arc::new(Router::new(
            chains,
            self.processors,
            self.metrics,
            self.config.workers,
        ));

        let mut intake = stream::select_all(receivers.into_iter().map(|rx| {
            Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|batch| (batch, rx))
            }))
        }));

        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = intake.next() => match batch {
                    Some(batch) => batch,
                    None => {
                        info!("All chains stopped producing messages");
                        break;
                    }
                },
            };

            let router = router.clone();
            tracker.spawn(async move {
                router.route(batch).await;
            });
        }

        drop(intake);
        tracker.close();
        info!(tasks = tracker.len(), "Waiting for outstanding tasks");
        if time::timeout(self.config.shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(tasks = tracker.len(), "Shutdown timeout elapsed with tasks still running");
        }
        info!("Relayer stopped");
    }
}
