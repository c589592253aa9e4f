//! EVM chain integration: head tracking, deposit discovery and proposal
//! execution against a bridge contract.

mod client;
mod deposit;
mod executor;
mod listener;

pub use client::EvmClient;
pub use deposit::{decode_deposit_data, encode_proposal_data, DecodeError};
pub use executor::{EvmExecutor, GasSettings};
pub use listener::{group_by_destination, parse_deposit_log, Deposit, DepositEventHandler};

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::info;

use crate::{
    app::RegisteredChain,
    chain::ChainAdapter,
    config::ChainConfig,
    metrics::Metrics,
    poller::ChainPoller,
    store::BlockStore,
};

pub const PRIVATE_KEY_ENV: &str = "RELAYER_PRIVATE_KEY";

/// Picks the chain's own signing key over the process-wide fallback.
fn select_private_key(config: &ChainConfig, fallback: Option<String>) -> Result<String> {
    config.private_key.clone().or(fallback).ok_or_else(|| {
        anyhow!(
            "No private key for chain {}: set private_key or {PRIVATE_KEY_ENV}",
            config.name
        )
    })
}

/// Wires an EVM chain from its configuration.
pub fn build_chain(
    config: &ChainConfig,
    store: BlockStore,
    metrics: Arc<dyn Metrics>,
) -> Result<RegisteredChain> {
    info!(chain = %config.name, domain_id = config.domain_id, "Building EVM chain");

    let client = EvmClient::new(&config.rpc_url)?;
    let handler = DepositEventHandler::new(
        client.provider(),
        config.bridge_address,
        config.domain_id,
        config.handlers.iter().map(|h| (h.address, h.kind)),
    )?;

    let private_key = select_private_key(config, std::env::var(PRIVATE_KEY_ENV).ok())?;
    let executor = EvmExecutor::new(
        client.provider(),
        config.bridge_address,
        config.chain_id,
        &private_key,
        GasSettings {
            gas_limit: config.gas_limit,
            gas_price: config.gas_price,
        },
    )?;

    let poller = ChainPoller::new(
        Arc::new(client),
        vec![Arc::new(handler)],
        store.clone(),
        metrics,
        config.poller_config(),
    );
    let adapter = ChainAdapter::new(
        poller,
        Arc::new(executor),
        store,
        config.start_options(),
        config.delivery_mode,
    );

    Ok(RegisteredChain::new(Arc::new(adapter)).with_queue(config.queue_settings()))
}
