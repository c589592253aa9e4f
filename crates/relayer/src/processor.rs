//! Veto-capable steps applied to every message before delivery.

use std::collections::HashSet;

use crate::types::{DomainId, Message, ProcessorError};

pub trait MessageProcessor: Send + Sync {
    /// Validates or transforms `message`; an error vetoes delivery of the
    /// whole batch the message belongs to.
    fn process(&self, message: &mut Message) -> Result<(), ProcessorError>;
}

impl<F> MessageProcessor for F
where
    F: Fn(&mut Message) -> anyhow::Result<()> + Send + Sync,
{
    fn process(&self, message: &mut Message) -> Result<(), ProcessorError> {
        self(message).map_err(ProcessorError::Other)
    }
}

/// Rejects messages whose source or destination is not an allowed domain.
#[derive(Debug, Clone)]
pub struct DomainAllowList {
    allowed: HashSet<DomainId>,
}

impl DomainAllowList {
    pub fn new(allowed: impl IntoIterator<Item = DomainId>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl MessageProcessor for DomainAllowList {
    fn process(&self, message: &mut Message) -> Result<(), ProcessorError> {
        for domain in [message.source, message.destination] {
            if !self.allowed.contains(&domain) {
                return Err(ProcessorError::DomainNotAllowed(domain));
            }
        }
        Ok(())
    }
}

/// Rejects messages whose payload does not match their transfer type.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadShape;

impl MessageProcessor for PayloadShape {
    fn process(&self, message: &mut Message) -> Result<(), ProcessorError> {
        let expected = message.transfer_type.payload_len();
        if message.payload.len() != expected {
            return Err(ProcessorError::InvalidPayload {
                transfer_type: message.transfer_type,
                expected,
                actual: message.payload.len(),
            });
        }
        Ok(())
    }
}
