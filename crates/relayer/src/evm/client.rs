use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use std::sync::Arc;

use crate::poller::ChainClient;

/// JSON-RPC connection to an EVM chain.
#[derive(Clone)]
pub struct EvmClient {
    provider: Arc<Provider<Http>>,
}

impl EvmClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .context(format!("Failed to create provider for {rpc_url}"))?;
        Ok(Self {
            provider: Arc::new(provider),
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    async fn latest_block(&self) -> Result<u64> {
        let head = self
            .provider
            .get_block_number()
            .await
            .context("Failed to fetch latest block number")?;
        Ok(head.as_u64())
    }
}
