use ethers::core::types::{Bytes, H256};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Instant};

use crate::store::StoreError;

/// Stable small-integer identifier of a configured chain.
pub type DomainId = u8;

/// Messages discovered in one poll cycle for a single destination.
pub type Batch = Vec<Message>;

/// Selects how a [`Message`] payload must be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    /// `[amount, recipient]`
    FungibleTransfer,
    /// `[token_id, recipient, metadata]`
    NonFungibleTransfer,
    /// `[metadata]`
    GenericTransfer,
}

impl TransferType {
    /// Number of payload blobs a message of this type carries.
    pub fn payload_len(&self) -> usize {
        match self {
            TransferType::FungibleTransfer => 2,
            TransferType::NonFungibleTransfer => 3,
            TransferType::GenericTransfer => 1,
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferType::FungibleTransfer => "FungibleTransfer",
            TransferType::NonFungibleTransfer => "NonFungibleTransfer",
            TransferType::GenericTransfer => "GenericTransfer",
        };
        f.write_str(name)
    }
}

// Unified cross-chain message produced by event handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: DomainId,
    pub destination: DomainId,
    pub deposit_nonce: u64,
    pub resource_id: H256,
    pub transfer_type: TransferType,
    pub payload: Vec<Bytes>,
    /// When the message was created, used for delivery latency.
    pub timestamp: Instant,
}

impl Message {
    pub fn new(
        source: DomainId,
        destination: DomainId,
        deposit_nonce: u64,
        resource_id: H256,
        transfer_type: TransferType,
        payload: Vec<Bytes>,
    ) -> Self {
        Self {
            source,
            destination,
            deposit_nonce,
            resource_id,
            transfer_type,
            payload,
            timestamp: Instant::now(),
        }
    }

    /// Logical identity of the message: `source-destination-nonce`.
    pub fn id(&self) -> String {
        format!("{}-{}-{}", self.source, self.destination, self.deposit_nonce)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (resource {:?}, {} payload blobs)",
            self.id(),
            self.transfer_type,
            self.resource_id,
            self.payload.len()
        )
    }
}

/// What happened to a single message handed to a destination writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Execution finished successfully.
    Delivered,
    /// Handed to a detached delivery task; the outcome is not observed.
    Dispatched,
    /// Execution failed with the given reason.
    Failed(String),
}

// Per-message result of a destination write
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    pub outcomes: Vec<(Message, DeliveryOutcome)>,
}

impl WriteReport {
    pub fn failed(&self) -> impl Iterator<Item = &Message> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, DeliveryOutcome::Failed(_)))
            .map(|(message, _)| message)
    }
}

// Define error types
#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    #[error("Failed to resolve start block for domain {domain_id}: {source}")]
    StartBlock {
        domain_id: DomainId,
        source: StoreError,
    },

    #[error("No chain registered for destination domain {0}")]
    UnknownDestination(DomainId),

    #[error("Message {id} rejected by processor: {source}")]
    Rejected { id: String, source: ProcessorError },

    #[error("Write to domain {domain_id} failed: {source}")]
    WriteFailed {
        domain_id: DomainId,
        source: anyhow::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("domain {0} is not allowed")]
    DomainNotAllowed(DomainId),

    #[error("{transfer_type} expects {expected} payload blobs, got {actual}")]
    InvalidPayload {
        transfer_type: TransferType,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
