//! Recording doubles shared by the unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::core::types::{Bytes, H256};
use parking_lot::Mutex;
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    chain::{Executor, RelayedChain},
    metrics::Metrics,
    poller::{ChainClient, EventHandler},
    queue::MessageSender,
    types::{Batch, DeliveryOutcome, DomainId, Message, RelayerError, TransferType, WriteReport},
};

pub(crate) fn message(source: DomainId, destination: DomainId, nonce: u64) -> Message {
    Message::new(
        source,
        destination,
        nonce,
        H256::repeat_byte(0x11),
        TransferType::FungibleTransfer,
        vec![Bytes::from(vec![0x01]), Bytes::from(vec![0xaa; 20])],
    )
}

/// Chain client returning scripted heads; the last entry repeats forever.
pub(crate) struct ScriptedClient {
    heads: Mutex<VecDeque<std::result::Result<u64, String>>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub(crate) fn new(heads: Vec<Result<u64>>) -> Self {
        Self {
            heads: Mutex::new(
                heads
                    .into_iter()
                    .map(|head| head.map_err(|e| e.to_string()))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for ScriptedClient {
    async fn latest_block(&self) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut heads = self.heads.lock();
        let next = if heads.len() > 1 {
            heads.pop_front()
        } else {
            heads.front().cloned()
        };
        match next {
            Some(Ok(head)) => Ok(head),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("no heads scripted")),
        }
    }
}

/// Event handler recording every range it is asked to read.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    ranges: Mutex<Vec<(u64, u64)>>,
    fail: bool,
    stop: Option<(usize, CancellationToken)>,
}

impl RecordingHandler {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Cancels `cancel` once `calls` ranges have been handled.
    pub(crate) fn stopping_after(calls: usize, cancel: CancellationToken) -> Self {
        Self {
            stop: Some((calls, cancel)),
            ..Default::default()
        }
    }

    pub(crate) fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(
        &self,
        start_block: u64,
        end_block: u64,
        _msg_tx: &MessageSender,
    ) -> Result<()> {
        let calls = {
            let mut ranges = self.ranges.lock();
            ranges.push((start_block, end_block));
            ranges.len()
        };
        if let Some((stop_after, cancel)) = &self.stop {
            if calls >= *stop_after {
                cancel.cancel();
            }
        }
        if self.fail {
            return Err(anyhow!("handler failed"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingMetrics {
    block_deltas: Mutex<Vec<(DomainId, u64, u64)>>,
    deposits: Mutex<Vec<String>>,
    execution_errors: Mutex<Vec<String>>,
    successes: Mutex<Vec<String>>,
}

impl RecordingMetrics {
    pub(crate) fn block_deltas(&self) -> Vec<(DomainId, u64, u64)> {
        self.block_deltas.lock().clone()
    }

    pub(crate) fn deposits(&self) -> Vec<String> {
        self.deposits.lock().clone()
    }

    pub(crate) fn execution_errors(&self) -> Vec<String> {
        self.execution_errors.lock().clone()
    }

    pub(crate) fn successes(&self) -> Vec<String> {
        self.successes.lock().clone()
    }
}

impl Metrics for RecordingMetrics {
    fn track_block_delta(&self, domain_id: DomainId, head: u64, current: u64) {
        self.block_deltas.lock().push((domain_id, head, current));
    }

    fn track_deposit_message(&self, message: &Message) {
        self.deposits.lock().push(message.id());
    }

    fn track_execution_error(&self, message: &Message) {
        self.execution_errors.lock().push(message.id());
    }

    fn track_successful_execution_latency(&self, message: &Message) {
        self.successes.lock().push(message.id());
    }
}

#[derive(Default)]
pub(crate) struct RecordingExecutor {
    executed: Mutex<Vec<String>>,
    fail_all: bool,
    failing_nonces: HashSet<u64>,
}

impl RecordingExecutor {
    pub(crate) fn always_failing() -> Self {
        Self {
            fail_all: true,
            ..Default::default()
        }
    }

    pub(crate) fn failing_nonces(nonces: impl IntoIterator<Item = u64>) -> Self {
        Self {
            failing_nonces: nonces.into_iter().collect(),
            ..Default::default()
        }
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Waits (bounded) until at least `count` executions were attempted.
    pub(crate) async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.executed.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("executions did not happen in time");
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, message: &Message) -> Result<()> {
        self.executed.lock().push(message.id());
        if self.fail_all || self.failing_nonces.contains(&message.deposit_nonce) {
            return Err(anyhow!("execution reverted"));
        }
        Ok(())
    }
}

/// Relayed chain that emits scripted batches and records writes.
pub(crate) struct MockChain {
    domain_id: DomainId,
    emit: Vec<Batch>,
    one_shot: bool,
    fail_writes: bool,
    stall_writes: bool,
    stalled: AtomicUsize,
    failing_nonces: HashSet<u64>,
    written: Mutex<Vec<Vec<String>>>,
    poll_finished: AtomicBool,
}

impl MockChain {
    pub(crate) fn new(domain_id: DomainId) -> Self {
        Self {
            domain_id,
            emit: Vec::new(),
            one_shot: false,
            fail_writes: false,
            stall_writes: false,
            stalled: AtomicUsize::new(0),
            failing_nonces: HashSet::new(),
            written: Mutex::new(Vec::new()),
            poll_finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn emitting(mut self, batches: Vec<Batch>) -> Self {
        self.emit = batches;
        self
    }

    /// Stops polling right after emitting instead of waiting for cancellation.
    pub(crate) fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Writes never complete.
    pub(crate) fn stalling_writes(mut self) -> Self {
        self.stall_writes = true;
        self
    }

    /// Number of writes currently stuck in `write`.
    pub(crate) fn stalled_writes(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }

    pub(crate) fn failing_nonces(mut self, nonces: impl IntoIterator<Item = u64>) -> Self {
        self.failing_nonces = nonces.into_iter().collect();
        self
    }

    pub(crate) fn written(&self) -> Vec<Vec<String>> {
        self.written.lock().clone()
    }

    pub(crate) fn polls_finished(&self) -> bool {
        self.poll_finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayedChain for MockChain {
    async fn poll_events(
        &self,
        cancel: CancellationToken,
        _sys_err: mpsc::UnboundedSender<RelayerError>,
        msg_tx: MessageSender,
    ) {
        for batch in self.emit.clone() {
            if msg_tx.send_batch(batch).await.is_err() {
                break;
            }
        }
        if !self.one_shot {
            cancel.cancelled().await;
        }
        self.poll_finished.store(true, Ordering::SeqCst);
    }

    async fn write(&self, messages: Batch) -> Result<WriteReport> {
        if self.fail_writes {
            return Err(anyhow!("destination unavailable"));
        }
        if self.stall_writes {
            self.stalled.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        self.written
            .lock()
            .push(messages.iter().map(Message::id).collect());

        let outcomes = messages
            .into_iter()
            .map(|m| {
                let outcome = if self.failing_nonces.contains(&m.deposit_nonce) {
                    DeliveryOutcome::Failed("execution reverted".into())
                } else {
                    DeliveryOutcome::Delivered
                };
                (m, outcome)
            })
            .collect();
        Ok(WriteReport { outcomes })
    }

    fn domain_id(&self) -> DomainId {
        self.domain_id
    }
}
