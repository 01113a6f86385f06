//! EVM chain client backed by ethers.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::{
    prelude::*,
    types::{Address, BlockNumber, Bytes, H256, U256},
};
use tracing::{debug, info};

use crate::chain::{BlockInclusion, ChainClient, DataTransaction};
use crate::FlareConfig;

/// Signs with the configured key and submits over HTTP JSON-RPC.
pub struct EvmChainClient {
    client: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
    address: Address,
}

impl EvmChainClient {
    pub fn connect(config: &FlareConfig) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .context("Failed to create HTTP provider")?;

        let wallet = config
            .private_key
            .parse::<LocalWallet>()
            .context("Invalid private key")?
            .with_chain_id(config.chain_id);
        let address = wallet.address();

        let client = SignerMiddleware::new(provider, wallet);

        Ok(Self {
            client: Arc::new(client),
            address,
        })
    }
}

fn parse_tx_hash(tx_hash: &str) -> Result<H256> {
    tx_hash
        .parse::<H256>()
        .with_context(|| format!("invalid transaction hash {tx_hash}"))
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn sender_address(&self) -> String {
        format!("{:?}", self.address)
    }

    async fn send_data_transaction(&self, tx: DataTransaction) -> Result<String> {
        let request = TransactionRequest::new()
            .to(self.address)
            .value(U256::zero())
            .data(Bytes::from(tx.data))
            .gas(tx.gas_limit);

        let pending_tx = self.client.send_transaction(request, None).await?;
        info!("Anchor transaction sent: {:?}", pending_tx.tx_hash());

        let receipt = pending_tx
            .confirmations(tx.confirmations)
            .await?
            .context("Anchor transaction dropped from mempool")?;

        Ok(format!("{:?}", receipt.transaction_hash))
    }

    async fn get_transaction_data(&self, tx_hash: &str) -> Result<Option<Vec<u8>>> {
        let hash = parse_tx_hash(tx_hash)?;
        let tx = self.client.get_transaction(hash).await?;
        Ok(tx.map(|tx| tx.input.to_vec()))
    }

    async fn get_inclusion(&self, tx_hash: &str) -> Result<Option<BlockInclusion>> {
        let hash = parse_tx_hash(tx_hash)?;
        let Some(receipt) = self.client.get_transaction_receipt(hash).await? else {
            return Ok(None);
        };
        let Some(block_number) = receipt.block_number else {
            return Ok(None);
        };

        let block = self
            .client
            .get_block(BlockNumber::Number(block_number))
            .await?
            .with_context(|| format!("block {block_number} not found"))?;
        debug!("Transaction {} included in block {}", tx_hash, block_number);

        Ok(Some(BlockInclusion {
            block_number: block_number.as_u64(),
            timestamp: block.timestamp.as_u64(),
        }))
    }

    async fn gas_price_wei(&self) -> Result<u128> {
        Ok(self.client.get_gas_price().await?.as_u128())
    }

    async fn balance_wei(&self) -> Result<u128> {
        let balance = self.client.get_balance(self.address, None).await?;
        Ok(balance.as_u128())
    }
}
