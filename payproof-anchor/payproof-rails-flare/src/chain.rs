//! Chain client seam.
//!
//! The anchor service never talks to an RPC endpoint directly; it is handed a
//! [`ChainClient`] at construction. [`MemoryChain`] is a deterministic
//! in-process chain for tests and dry runs, `EvmChainClient` (feature `evm`)
//! is the ethers-backed client for a real network.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tokio::sync::RwLock;

/// Zero-value, self-addressed transaction carrying anchor data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTransaction {
    pub data: Vec<u8>,
    pub gas_limit: u64,
    /// Blocks to wait for before the send is reported as done
    pub confirmations: usize,
}

/// Where a mined transaction landed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInclusion {
    pub block_number: u64,
    /// Block timestamp, unix seconds
    pub timestamp: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address anchor transactions are sent from and to
    fn sender_address(&self) -> String;

    /// Submit the transaction and wait for its confirmations. Returns the
    /// `0x`-prefixed transaction hash.
    async fn send_data_transaction(&self, tx: DataTransaction) -> Result<String>;

    /// Input data of a transaction, `None` if the chain does not know it
    async fn get_transaction_data(&self, tx_hash: &str) -> Result<Option<Vec<u8>>>;

    /// Block placement of a mined transaction, `None` if not mined
    async fn get_inclusion(&self, tx_hash: &str) -> Result<Option<BlockInclusion>>;

    async fn gas_price_wei(&self) -> Result<u128>;

    /// Balance of [`ChainClient::sender_address`]
    async fn balance_wei(&self) -> Result<u128>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY CHAIN
// ═══════════════════════════════════════════════════════════════════════════════

const MEMORY_GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const MEMORY_BLOCK_TIME_SECS: u64 = 2;

#[derive(Debug, Clone)]
struct MinedTransaction {
    data: Vec<u8>,
    inclusion: BlockInclusion,
}

#[derive(Debug)]
struct MemoryChainState {
    transactions: HashMap<String, MinedTransaction>,
    next_block: u64,
    nonce: u64,
    balance_wei: u128,
}

/// One transaction per block, timestamps advance by a fixed block time and
/// gas is charged as `gas_limit * gas_price`.
#[derive(Debug, Clone)]
pub struct MemoryChain {
    address: String,
    gas_price_wei: u128,
    state: Arc<RwLock<MemoryChainState>>,
}

impl MemoryChain {
    /// 25 gwei gas price, 10 FLR starting balance
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_balance(address, 10 * 10u128.pow(18))
    }

    pub fn with_balance(address: impl Into<String>, balance_wei: u128) -> Self {
        Self {
            address: address.into(),
            gas_price_wei: 25_000_000_000,
            state: Arc::new(RwLock::new(MemoryChainState {
                transactions: HashMap::new(),
                next_block: 1,
                nonce: 0,
                balance_wei,
            })),
        }
    }

    pub fn with_gas_price(mut self, gas_price_wei: u128) -> Self {
        self.gas_price_wei = gas_price_wei;
        self
    }

    /// Mine a transaction with arbitrary input data, bypassing gas
    /// accounting. Stands in for transactions other software put on chain.
    pub async fn insert_raw_transaction(&self, data: Vec<u8>) -> String {
        let mut state = self.state.write().await;
        self.mine(&mut state, data)
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }

    fn mine(&self, state: &mut MemoryChainState, data: Vec<u8>) -> String {
        let mut hasher = Keccak256::new();
        hasher.update(self.address.as_bytes());
        hasher.update(state.nonce.to_be_bytes());
        hasher.update(&data);
        let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));

        let block_number = state.next_block;
        let inclusion = BlockInclusion {
            block_number,
            timestamp: MEMORY_GENESIS_TIMESTAMP + block_number * MEMORY_BLOCK_TIME_SECS,
        };

        state.nonce += 1;
        state.next_block += 1;
        state
            .transactions
            .insert(tx_hash.clone(), MinedTransaction { data, inclusion });

        tx_hash
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    fn sender_address(&self) -> String {
        self.address.clone()
    }

    async fn send_data_transaction(&self, tx: DataTransaction) -> Result<String> {
        let fee = self.gas_price_wei.saturating_mul(u128::from(tx.gas_limit));

        let mut state = self.state.write().await;
        if fee > state.balance_wei {
            bail!(
                "insufficient funds for gas: need {} wei, have {} wei",
                fee,
                state.balance_wei
            );
        }
        state.balance_wei -= fee;

        Ok(self.mine(&mut state, tx.data))
    }

    async fn get_transaction_data(&self, tx_hash: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .get(&tx_hash.to_ascii_lowercase())
            .map(|tx| tx.data.clone()))
    }

    async fn get_inclusion(&self, tx_hash: &str) -> Result<Option<BlockInclusion>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .get(&tx_hash.to_ascii_lowercase())
            .map(|tx| tx.inclusion))
    }

    async fn gas_price_wei(&self) -> Result<u128> {
        Ok(self.gas_price_wei)
    }

    async fn balance_wei(&self) -> Result<u128> {
        Ok(self.state.read().await.balance_wei)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_chain_mines_sequentially() {
        let chain = MemoryChain::new("0xanchor");

        let first = chain.insert_raw_transaction(vec![1, 2, 3]).await;
        let second = chain.insert_raw_transaction(vec![1, 2, 3]).await;
        assert_ne!(first, second);
        assert_eq!(first.len(), 2 + 64);

        let a = chain.get_inclusion(&first).await.unwrap().unwrap();
        let b = chain.get_inclusion(&second).await.unwrap().unwrap();
        assert_eq!(b.block_number, a.block_number + 1);
        assert_eq!(b.timestamp, a.timestamp + MEMORY_BLOCK_TIME_SECS);

        let data = chain.get_transaction_data(&first.to_uppercase().replace("0X", "0x")).await;
        assert_eq!(data.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_memory_chain_charges_gas() {
        let chain = MemoryChain::with_balance("0xanchor", 1_000_000).with_gas_price(10);

        let tx = DataTransaction {
            data: vec![0xaa],
            gas_limit: 50_000,
            confirmations: 1,
        };
        chain.send_data_transaction(tx.clone()).await.unwrap();
        assert_eq!(chain.balance_wei().await.unwrap(), 500_000);

        chain.send_data_transaction(tx.clone()).await.unwrap();
        let err = chain.send_data_transaction(tx).await.unwrap_err();
        assert!(err.to_string().contains("insufficient funds"));
        assert_eq!(chain.transaction_count().await, 2);
    }

    #[tokio::test]
    async fn test_memory_chain_unknown_hash() {
        let chain = MemoryChain::new("0xanchor");
        assert_eq!(chain.get_transaction_data("0x00").await.unwrap(), None);
        assert_eq!(chain.get_inclusion("0x00").await.unwrap(), None);
    }
}
