//! Bounded per-chain intake queue.
//!
//! Every chain gets its own queue so that a backlog on one chain never fills the
//! intake of another. What a full queue does with a new batch is decided by
//! [`OverflowPolicy`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::types::Batch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The sender waits until the receiver frees a slot.
    #[default]
    Block,
    /// The oldest queued item is evicted to make room.
    DropOldest,
    /// The new item is handed back to the sender.
    Reject,
}

#[derive(thiserror::Error)]
pub enum QueueError<T> {
    #[error("queue is full")]
    Full(T),

    #[error("queue receiver is closed")]
    Closed(T),
}

impl<T> QueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            QueueError::Full(item) | QueueError::Closed(item) => item,
        }
    }
}

impl<T> fmt::Debug for QueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full(_) => f.write_str("Full(..)"),
            QueueError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

// `Block` and `Reject` ride on tokio's mpsc; eviction needs async-channel's
// `force_send`.
enum Inner<T> {
    Mpsc(mpsc::Sender<T>),
    Ring(async_channel::Sender<T>),
}

enum InnerReceiver<T> {
    Mpsc(mpsc::Receiver<T>),
    Ring(async_channel::Receiver<T>),
}

/// Creates a queue holding at most `capacity` items (at least one).
pub fn channel<T>(capacity: usize, policy: OverflowPolicy) -> (QueueSender<T>, QueueReceiver<T>) {
    let capacity = capacity.max(1);
    let (inner, receiver) = match policy {
        OverflowPolicy::Block | OverflowPolicy::Reject => {
            let (tx, rx) = mpsc::channel(capacity);
            (Inner::Mpsc(tx), InnerReceiver::Mpsc(rx))
        }
        OverflowPolicy::DropOldest => {
            let (tx, rx) = async_channel::bounded(capacity);
            (Inner::Ring(tx), InnerReceiver::Ring(rx))
        }
    };

    (
        QueueSender { inner, policy },
        QueueReceiver { inner: receiver },
    )
}

pub struct QueueSender<T> {
    inner: Inner<T>,
    policy: OverflowPolicy,
}

/// Sender half handed to event handlers.
pub type MessageSender = QueueSender<Batch>;
pub type MessageReceiver = QueueReceiver<Batch>;

impl<T> QueueSender<T> {
    /// Enqueues `item`, applying the queue's overflow policy when it is full.
    ///
    /// Returns the evicted item under [`OverflowPolicy::DropOldest`].
    pub async fn send(&self, item: T) -> Result<Option<T>, QueueError<T>> {
        match &self.inner {
            Inner::Mpsc(tx) if self.policy == OverflowPolicy::Reject => match tx.try_send(item) {
                Ok(()) => Ok(None),
                Err(TrySendError::Full(item)) => Err(QueueError::Full(item)),
                Err(TrySendError::Closed(item)) => Err(QueueError::Closed(item)),
            },
            Inner::Mpsc(tx) => tx
                .send(item)
                .await
                .map(|()| None)
                .map_err(|e| QueueError::Closed(e.0)),
            Inner::Ring(tx) => tx.force_send(item).map_err(|e| QueueError::Closed(e.0)),
        }
    }
}

impl MessageSender {
    /// Sends a batch, logging any batch evicted to make room for it.
    pub async fn send_batch(&self, batch: Batch) -> Result<(), QueueError<Batch>> {
        if let Some(evicted) = self.send(batch).await? {
            let ids: Vec<String> = evicted.iter().map(|m| m.id()).collect();
            warn!(dropped = ?ids, "Intake queue full, dropped oldest batch");
        }
        Ok(())
    }
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            Inner::Mpsc(tx) => Inner::Mpsc(tx.clone()),
            Inner::Ring(tx) => Inner::Ring(tx.clone()),
        };
        Self {
            inner,
            policy: self.policy,
        }
    }
}

impl<T> fmt::Debug for QueueSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSender")
            .field("policy", &self.policy)
            .finish()
    }
}

pub struct QueueReceiver<T> {
    inner: InnerReceiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Waits for the next item. Returns `None` once every sender is gone and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        match &mut self.inner {
            InnerReceiver::Mpsc(rx) => rx.recv().await,
            InnerReceiver::Ring(rx) => rx.recv().await.ok(),
        }
    }
}
