use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, event, Level};

use crate::types::{DomainId, Message};

/// Observation points for block lag and message flow.
pub trait Metrics: Send + Sync {
    fn track_block_delta(&self, domain_id: DomainId, head: u64, current: u64);

    fn track_deposit_message(&self, message: &Message);

    fn track_execution_error(&self, message: &Message);

    fn track_successful_execution_latency(&self, message: &Message);
}

/// Counters snapshot of a [`TracingMetrics`] sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub deposits: u64,
    pub execution_errors: u64,
    pub executions: u64,
}

/// Emits every observation as a structured `tracing` event under the
/// `relayer::metrics` target and keeps in-process counters.
#[derive(Debug, Default)]
pub struct TracingMetrics {
    deposits: AtomicU64,
    execution_errors: AtomicU64,
    executions: AtomicU64,
}

impl TracingMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deposits: self.deposits.load(Ordering::Relaxed),
            execution_errors: self.execution_errors.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
        }
    }
}

impl Metrics for TracingMetrics {
    fn track_block_delta(&self, domain_id: DomainId, head: u64, current: u64) {
        debug!(
            target: "relayer::metrics",
            domain_id,
            head,
            current,
            delta = head.saturating_sub(current),
            "block delta"
        );
    }

    fn track_deposit_message(&self, message: &Message) {
        let total = self.deposits.fetch_add(1, Ordering::Relaxed) + 1;
        event!(
            target: "relayer::metrics",
            Level::INFO,
            msg.id = %message.id(),
            source = message.source,
            destination = message.destination,
            total,
            "deposit observed"
        );
    }

    fn track_execution_error(&self, message: &Message) {
        let total = self.execution_errors.fetch_add(1, Ordering::Relaxed) + 1;
        event!(
            target: "relayer::metrics",
            Level::INFO,
            msg.id = %message.id(),
            destination = message.destination,
            total,
            "execution error"
        );
    }

    fn track_successful_execution_latency(&self, message: &Message) {
        let total = self.executions.fetch_add(1, Ordering::Relaxed) + 1;
        event!(
            target: "relayer::metrics",
            Level::INFO,
            msg.id = %message.id(),
            destination = message.destination,
            latency_ms = message.timestamp.elapsed().as_millis() as u64,
            total,
            "execution succeeded"
        );
    }
}
