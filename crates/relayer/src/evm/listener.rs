use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ethers::{
    abi::{self, ParamType, Token},
    contract::Contract,
    core::types::{Address, Bytes, Filter, H256, U256},
    providers::{Http, Middleware, Provider},
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{debug, instrument, warn};

use super::deposit::{decode_deposit_data, DecodeError};
use crate::{
    poller::EventHandler,
    queue::{MessageSender, QueueError},
    types::{Batch, DomainId, Message, TransferType},
};

pub const DEPOSIT_EVENT: &str = "Deposit(uint8,bytes32,uint64,address,bytes,bytes)";

// Non-indexed fields of the deposit event, `user` is indexed.
const DEPOSIT_FIELDS: [ParamType; 5] = [
    ParamType::Uint(8),
    ParamType::FixedBytes(32),
    ParamType::Uint(64),
    ParamType::Bytes,
    ParamType::Bytes,
];

/// A deposit recorded by the bridge contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deposit {
    pub destination: DomainId,
    pub resource_id: H256,
    pub deposit_nonce: u64,
    pub data: Bytes,
}

impl Deposit {
    pub fn into_message(
        self,
        source: DomainId,
        transfer_type: TransferType,
    ) -> Result<Message, DecodeError> {
        let payload = decode_deposit_data(transfer_type, &self.data)?;
        Ok(Message::new(
            source,
            self.destination,
            self.deposit_nonce,
            self.resource_id,
            transfer_type,
            payload,
        ))
    }
}

pub fn parse_deposit_log(data: &[u8]) -> Result<Deposit> {
    let tokens = abi::decode(&DEPOSIT_FIELDS, data).context("Malformed deposit log")?;
    let [Token::Uint(destination), Token::FixedBytes(resource_id), Token::Uint(nonce), Token::Bytes(deposit_data), Token::Bytes(_)] =
        tokens.as_slice()
    else {
        bail!("Unexpected deposit log layout");
    };

    if *destination > U256::from(u8::MAX) {
        bail!("Destination domain {destination} out of range");
    }
    if resource_id.len() != 32 {
        bail!("Resource id has {} bytes", resource_id.len());
    }

    Ok(Deposit {
        destination: destination.low_u32() as DomainId,
        resource_id: H256::from_slice(resource_id),
        deposit_nonce: nonce.low_u64(),
        data: Bytes::from(deposit_data.clone()),
    })
}

/// Splits messages into one batch per destination, keeping their order.
pub fn group_by_destination(messages: Vec<Message>) -> Vec<Batch> {
    let mut batches: BTreeMap<DomainId, Batch> = BTreeMap::new();
    for message in messages {
        batches.entry(message.destination).or_default().push(message);
    }
    batches.into_values().collect()
}

/// Reads bridge deposits from a block range and turns them into messages.
pub struct DepositEventHandler {
    provider: Arc<Provider<Http>>,
    bridge: Contract<Provider<Http>>,
    domain_id: DomainId,
    handlers: HashMap<Address, TransferType>,
    resolved: Mutex<HashMap<H256, Address>>,
}

impl DepositEventHandler {
    pub fn new(
        provider: Arc<Provider<Http>>,
        bridge_address: Address,
        domain_id: DomainId,
        handlers: impl IntoIterator<Item = (Address, TransferType)>,
    ) -> Result<Self> {
        let bridge_abi = abi::parse_abi(&[
            "function _resourceIDToHandlerAddress(bytes32 resourceID) external view returns (address)",
        ])?;
        let bridge = Contract::new(bridge_address, bridge_abi, provider.clone());

        Ok(Self {
            provider,
            bridge,
            domain_id,
            handlers: handlers.into_iter().collect(),
            resolved: Mutex::new(HashMap::new()),
        })
    }

    async fn handler_for(&self, resource_id: H256) -> Result<Address> {
        let cached = self.resolved.lock().get(&resource_id).copied();
        if let Some(address) = cached {
            return Ok(address);
        }

        let address: Address = self
            .bridge
            .method("_resourceIDToHandlerAddress", resource_id.to_fixed_bytes())?
            .call()
            .await
            .context("Failed to resolve resource handler")?;

        self.resolved.lock().insert(resource_id, address);
        Ok(address)
    }

    fn filter(&self, start_block: u64, end_block: u64) -> Filter {
        Filter::new()
            .address(self.bridge.address())
            .event(DEPOSIT_EVENT)
            .from_block(start_block)
            .to_block(end_block)
    }
}

#[async_trait]
impl EventHandler for DepositEventHandler {
    #[instrument(skip(self, msg_tx), fields(domain_id = self.domain_id))]
    async fn handle_event(
        &self,
        start_block: u64,
        end_block: u64,
        msg_tx: &MessageSender,
    ) -> Result<()> {
        let logs = self
            .provider
            .get_logs(&self.filter(start_block, end_block))
            .await
            .context("Failed to fetch deposit logs")?;

        let mut messages = Vec::with_capacity(logs.len());
        for log in logs {
            let deposit = match parse_deposit_log(&log.data) {
                Ok(deposit) => deposit,
                Err(e) => {
                    warn!(tx = ?log.transaction_hash, error = %e, "Skipping undecodable deposit");
                    continue;
                }
            };

            let handler = self.handler_for(deposit.resource_id).await?;
            let Some(transfer_type) = self.handlers.get(&handler).copied() else {
                warn!(
                    resource_id = ?deposit.resource_id,
                    handler = ?handler,
                    "No handler configured for deposit resource"
                );
                continue;
            };

            match deposit.into_message(self.domain_id, transfer_type) {
                Ok(message) => {
                    debug!(msg.id = %message.id(), "Resolved deposit message");
                    messages.push(message);
                }
                Err(e) => warn!(tx = ?log.transaction_hash, error = %e, "Skipping malformed deposit data"),
            }
        }

        for batch in group_by_destination(messages) {
            match msg_tx.send_batch(batch).await {
                Ok(()) => {}
                Err(QueueError::Full(batch)) => {
                    let ids: Vec<String> = batch.iter().map(Message::id).collect();
                    warn!(rejected = ?ids, "Intake queue full, batch rejected");
                }
                Err(QueueError::Closed(_)) => return Err(anyhow!("Message queue closed")),
            }
        }

        Ok(())
    }
}
