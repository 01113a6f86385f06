//! payproof-rails-flare
//!
//! Anchors PayProof proof hashes on Flare by sending zero-value transactions
//! to the anchoring wallet itself with the encoded anchor as input data, and
//! reads them back for verification.

use std::env;
use std::fmt;
use std::sync::Arc;

use payproof_anchor::{
    decode, encode_batch, encode_single, master_proof_hash, to_hex, AnchorRecord, EncodingError,
    PaymentId, ProofHash,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

pub mod chain;
#[cfg(feature = "evm")]
pub mod evm;

pub use chain::{BlockInclusion, ChainClient, DataTransaction, MemoryChain};
#[cfg(feature = "evm")]
pub use evm::EvmChainClient;

/// Intrinsic gas of a plain transaction
pub const BASE_TX_GAS: u64 = 21_000;

/// Gas budgeted per character of the `0x`-prefixed hex anchor data
pub const GAS_PER_DATA_CHAR: u64 = 16;

const WEI_DECIMALS: u32 = 18;
const GWEI_DECIMALS: u32 = 9;

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT VARIABLES
// ═══════════════════════════════════════════════════════════════════════════════

pub const FLARE_RPC_URL_ENV: &str = "FLARE_RPC_URL";
pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";
pub const FLARE_CHAIN_ID_ENV: &str = "FLARE_CHAIN_ID";
pub const ANCHOR_CONFIRMATIONS_ENV: &str = "ANCHOR_CONFIRMATIONS";

pub const DEFAULT_FLARE_RPC_URL: &str = "https://flare-api.flare.network/ext/bc/C/rpc";
pub const DEFAULT_FLARE_CHAIN_ID: u64 = 14;
pub const DEFAULT_CONFIRMATIONS: usize = 1;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum FlareAnchorError {
    #[error("PRIVATE_KEY environment variable is required for anchoring")]
    MissingPrivateKey,

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("chain client error: {0:#}")]
    Chain(anyhow::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection settings for the anchoring wallet
#[derive(Clone)]
pub struct FlareConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub chain_id: u64,
    pub confirmations: usize,
}

impl FlareConfig {
    /// Read the config from the process environment
    pub fn from_env() -> Result<Self, FlareAnchorError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read the config through `lookup`, which maps a variable name to its
    /// value. Unparseable numbers fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FlareAnchorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let private_key = lookup(PRIVATE_KEY_ENV)
            .filter(|key| !key.trim().is_empty())
            .ok_or(FlareAnchorError::MissingPrivateKey)?;

        Ok(Self {
            rpc_url: lookup(FLARE_RPC_URL_ENV).unwrap_or_else(|| DEFAULT_FLARE_RPC_URL.to_string()),
            private_key,
            chain_id: lookup(FLARE_CHAIN_ID_ENV)
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FLARE_CHAIN_ID),
            confirmations: lookup(ANCHOR_CONFIRMATIONS_ENV)
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONFIRMATIONS),
        })
    }
}

impl fmt::Debug for FlareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlareConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("confirmations", &self.confirmations)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Anchored contents of a transaction and where it was mined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorInfo {
    pub proof_hashes: Vec<ProofHash>,
    pub payment_ids: Vec<PaymentId>,
    pub timestamp: u64,
    pub block_number: u64,
}

/// Cost of anchoring one proof at the current gas price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorCostEstimate {
    pub gas_limit: u64,
    /// Gas price in gwei
    pub gas_price: String,
    /// `gas_limit * gas_price` in FLR
    pub estimated_cost: String,
}

/// Outcome of proving a payment: the master hash always exists, the anchor
/// transaction only if anchoring went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoredProof {
    pub proof_hash: ProofHash,
    pub anchor_tx_hash: Option<String>,
}

/// Gas limit for a transaction carrying `data`
pub fn anchor_gas_limit(data: &[u8]) -> u64 {
    let hex_chars = to_hex(data).len() as u64;
    BASE_TX_GAS + hex_chars * GAS_PER_DATA_CHAR
}

/// Render an integer amount with `decimals` implied decimal places,
/// trimming trailing zeros but keeping at least one fractional digit.
pub fn format_units(value: u128, decimals: u32) -> String {
    let base = 10u128.pow(decimals);
    let whole = value / base;
    let fraction = format!("{:0width$}", value % base, width = decimals as usize);
    let fraction = fraction.trim_end_matches('0');

    if fraction.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{fraction}")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE
// ═══════════════════════════════════════════════════════════════════════════════

/// Anchors proof hashes through an injected [`ChainClient`]
pub struct AnchorService<C> {
    client: Arc<C>,
    confirmations: usize,
}

impl<C> Clone for AnchorService<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            confirmations: self.confirmations,
        }
    }
}

impl<C: ChainClient> AnchorService<C> {
    pub fn new(client: Arc<C>) -> Self {
        info!(
            "Flare anchor service initialized with wallet: {}",
            client.sender_address()
        );
        Self {
            client,
            confirmations: DEFAULT_CONFIRMATIONS,
        }
    }

    pub fn with_confirmations(mut self, confirmations: usize) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn send_anchor(&self, data: Vec<u8>) -> Result<String, FlareAnchorError> {
        let tx = DataTransaction {
            gas_limit: anchor_gas_limit(&data),
            data,
            confirmations: self.confirmations,
        };
        self.client
            .send_data_transaction(tx)
            .await
            .map_err(FlareAnchorError::Chain)
    }

    /// Anchor one proof hash. Returns the confirmed transaction hash.
    pub async fn anchor_proof_hash(
        &self,
        proof_hash: &ProofHash,
        payment_id: &PaymentId,
    ) -> Result<String, FlareAnchorError> {
        info!("Anchoring proof hash for payment {}: {}", payment_id, proof_hash);

        let data = encode_single(proof_hash, payment_id);
        match self.send_anchor(data).await {
            Ok(tx_hash) => {
                info!("Anchor transaction confirmed: {}", tx_hash);
                Ok(tx_hash)
            }
            Err(e) => {
                error!("Error anchoring proof hash: {}", e);
                Err(e)
            }
        }
    }

    /// Anchor up to 255 proof hashes in one transaction, in order
    pub async fn anchor_multiple_hashes(
        &self,
        records: &[AnchorRecord],
    ) -> Result<String, FlareAnchorError> {
        info!("Anchoring {} proof hashes", records.len());

        let data = encode_batch(records)?;
        match self.send_anchor(data).await {
            Ok(tx_hash) => {
                info!("Multi-anchor transaction confirmed: {}", tx_hash);
                Ok(tx_hash)
            }
            Err(e) => {
                error!("Error anchoring multiple proof hashes: {}", e);
                Err(e)
            }
        }
    }

    /// Derive a payment's master proof hash from its record hashes and
    /// anchor it. A failed anchor is logged and leaves the proof unanchored;
    /// the proof itself stays valid.
    pub async fn anchor_payment_proof<S: AsRef<str>>(
        &self,
        record_hashes: &[S],
        payment_id: &PaymentId,
    ) -> AnchoredProof {
        let proof_hash = master_proof_hash(record_hashes);

        let anchor_tx_hash = match self.anchor_proof_hash(&proof_hash, payment_id).await {
            Ok(tx_hash) => {
                info!("Proof anchored on Flare: {}", tx_hash);
                Some(tx_hash)
            }
            Err(e) => {
                warn!("Failed to anchor proof on Flare: {}", e);
                None
            }
        };

        AnchoredProof {
            proof_hash,
            anchor_tx_hash,
        }
    }

    /// Whether `expected` is among the proof hashes anchored by `tx_hash`.
    /// Lookup failures and undecodable data count as not anchored.
    pub async fn verify_anchor(&self, tx_hash: &str, expected: &ProofHash) -> bool {
        match self.client.get_transaction_data(tx_hash).await {
            Ok(Some(data)) => decode(&data).contains_proof_hash(expected),
            Ok(None) => {
                warn!("Transaction not found: {}", tx_hash);
                false
            }
            Err(e) => {
                error!("Error verifying anchor: {:#}", e);
                false
            }
        }
    }

    /// Decoded anchor contents plus block placement, `None` if the
    /// transaction is unknown, unmined or could not be fetched.
    pub async fn get_anchor_info(&self, tx_hash: &str) -> Option<AnchorInfo> {
        let (data, inclusion) = tokio::join!(
            self.client.get_transaction_data(tx_hash),
            self.client.get_inclusion(tx_hash),
        );

        let (data, inclusion) = match (data, inclusion) {
            (Ok(Some(data)), Ok(Some(inclusion))) => (data, inclusion),
            (Ok(_), Ok(_)) => return None,
            (Err(e), _) | (_, Err(e)) => {
                error!("Error getting anchor info: {:#}", e);
                return None;
            }
        };

        let payload = decode(&data);
        Some(AnchorInfo {
            proof_hashes: payload.proof_hashes().copied().collect(),
            payment_ids: payload.payment_ids().cloned().collect(),
            timestamp: inclusion.timestamp,
            block_number: inclusion.block_number,
        })
    }

    /// Balance of the anchoring wallet in FLR
    pub async fn wallet_balance(&self) -> Result<String, FlareAnchorError> {
        let balance = self.client.balance_wei().await.map_err(|e| {
            error!("Error getting wallet balance: {:#}", e);
            FlareAnchorError::Chain(e)
        })?;
        Ok(format_units(balance, WEI_DECIMALS))
    }

    /// Gas and FLR cost of anchoring a single proof right now
    pub async fn estimate_anchor_cost(
        &self,
        proof_hash: &ProofHash,
        payment_id: &PaymentId,
    ) -> Result<AnchorCostEstimate, FlareAnchorError> {
        let gas_limit = anchor_gas_limit(&encode_single(proof_hash, payment_id));
        let gas_price = self.client.gas_price_wei().await.map_err(|e| {
            error!("Error estimating anchor cost: {:#}", e);
            FlareAnchorError::Chain(e)
        })?;
        let cost = gas_price.saturating_mul(u128::from(gas_limit));

        Ok(AnchorCostEstimate {
            gas_limit,
            gas_price: format_units(gas_price, GWEI_DECIMALS),
            estimated_cost: format_units(cost, WEI_DECIMALS),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = FlareConfig::from_lookup(lookup(&[(PRIVATE_KEY_ENV, "0xkey")])).unwrap();
        assert_eq!(config.rpc_url, DEFAULT_FLARE_RPC_URL);
        assert_eq!(config.chain_id, 14);
        assert_eq!(config.confirmations, 1);
        assert_eq!(config.private_key, "0xkey");
    }

    #[test]
    fn test_config_overrides() {
        let config = FlareConfig::from_lookup(lookup(&[
            (PRIVATE_KEY_ENV, "0xkey"),
            (FLARE_RPC_URL_ENV, "https://coston2-api.flare.network/ext/C/rpc"),
            (FLARE_CHAIN_ID_ENV, "114"),
            (ANCHOR_CONFIRMATIONS_ENV, "not-a-number"),
        ]))
        .unwrap();
        assert_eq!(config.rpc_url, "https://coston2-api.flare.network/ext/C/rpc");
        assert_eq!(config.chain_id, 114);
        assert_eq!(config.confirmations, DEFAULT_CONFIRMATIONS);
    }

    #[test]
    fn test_config_requires_private_key() {
        assert!(matches!(
            FlareConfig::from_lookup(lookup(&[])),
            Err(FlareAnchorError::MissingPrivateKey)
        ));
        assert!(matches!(
            FlareConfig::from_lookup(lookup(&[(PRIVATE_KEY_ENV, "  ")])),
            Err(FlareAnchorError::MissingPrivateKey)
        ));
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = FlareConfig::from_lookup(lookup(&[(PRIVATE_KEY_ENV, "0xsecret")])).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("0xsecret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_gas_limit() {
        // single anchor: 73 bytes -> 148 hex chars with prefix
        let data = vec![0u8; 73];
        assert_eq!(anchor_gas_limit(&data), 21_000 + 148 * 16);
        assert_eq!(anchor_gas_limit(&[]), 21_000 + 2 * 16);
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(0, 18), "0.0");
        assert_eq!(format_units(10u128.pow(18), 18), "1.0");
        assert_eq!(format_units(1_500_000_000_000_000_000, 18), "1.5");
        assert_eq!(format_units(25_000_000_000, 9), "25.0");
        assert_eq!(format_units(1, 9), "0.000000001");
    }
}
