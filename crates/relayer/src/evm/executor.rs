use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ethers::{
    abi,
    contract::Contract,
    core::types::{Address, U64},
    middleware::SignerMiddleware,
    providers::{Http, Provider},
    signers::{LocalWallet, Signer},
};
use std::{str::FromStr, sync::Arc};
use tracing::{info, instrument};

use super::deposit::encode_proposal_data;
use crate::{chain::Executor, types::Message};

type SignerClient = SignerMiddleware<Arc<Provider<Http>>, LocalWallet>;

/// Optional gas overrides applied to every proposal transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct GasSettings {
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u64>,
}

/// Executes proposals on the destination bridge contract.
pub struct EvmExecutor {
    bridge: Contract<SignerClient>,
    gas: GasSettings,
}

impl EvmExecutor {
    pub fn new(
        provider: Arc<Provider<Http>>,
        bridge_address: Address,
        chain_id: u64,
        private_key: &str,
        gas: GasSettings,
    ) -> Result<Self> {
        let wallet = LocalWallet::from_str(private_key)
            .context("Failed to create wallet")?
            .with_chain_id(chain_id);
        let client = SignerMiddleware::new(provider, wallet);

        let bridge_abi = abi::parse_abi(&[
            "function executeProposal(uint8 domainID, uint64 depositNonce, bytes calldata data, bytes32 resourceID, bool revertOnFail) external",
        ])?;
        let bridge = Contract::new(bridge_address, bridge_abi, Arc::new(client));

        Ok(Self { bridge, gas })
    }
}

#[async_trait]
impl Executor for EvmExecutor {
    #[instrument(skip_all, fields(msg.id = %message.id()))]
    async fn execute(&self, message: &Message) -> Result<()> {
        let data = encode_proposal_data(message.transfer_type, &message.payload)?;

        let mut call = self.bridge.method::<_, ()>(
            "executeProposal",
            (
                message.source,
                message.deposit_nonce,
                data,
                message.resource_id.to_fixed_bytes(),
                true,
            ),
        )?;
        if let Some(gas_limit) = self.gas.gas_limit {
            call = call.gas(gas_limit);
        }
        if let Some(gas_price) = self.gas.gas_price {
            call = call.gas_price(gas_price);
        }

        let tx = call.send().await.context("Failed to submit proposal")?;
        let tx_hash = tx.tx_hash();
        info!(?tx_hash, "Proposal execution transaction sent");

        let receipt = tx
            .await?
            .ok_or_else(|| anyhow::anyhow!("Transaction receipt not found"))?;
        if receipt.status == Some(U64::zero()) {
            bail!("Proposal execution reverted in {tx_hash:?}");
        }

        info!(block = ?receipt.block_number, "Proposal executed");
        Ok(())
    }
}
