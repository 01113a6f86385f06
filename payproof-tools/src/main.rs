use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use payproof_anchor::{
    encode_batch, encode_single, has_anchor_magic, master_proof_hash, to_hex, try_decode,
    AnchorRecord, FormatVersion, PaymentId, ProofHash,
};
use payproof_rails_flare::anchor_gas_limit;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "payproof-tools", about = "Utility commands for PayProof anchor data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a single proof anchor as transaction data.
    Encode(EncodeArgs),
    /// Encode a JSON list of `{proof_hash, payment_id}` records as one batch anchor.
    EncodeBatch(EncodeBatchArgs),
    /// Decode `0x` transaction data and print the anchored records.
    Decode(DecodeArgs),
    /// Derive the master proof hash from a payment's record hashes.
    MasterHash(MasterHashArgs),
    /// Anchor and inspect proofs on chain (requires the `evm` feature).
    #[command(subcommand)]
    Chain(ChainCommands),
}

#[derive(Args)]
struct EncodeArgs {
    #[arg(long)]
    proof_hash: ProofHash,
    #[arg(long)]
    payment_id: String,
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct EncodeBatchArgs {
    /// JSON file holding an array of records.
    #[arg(long)]
    records: PathBuf,
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DecodeArgs {
    /// Transaction input data, with or without `0x`.
    data: String,
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct MasterHashArgs {
    /// Record hashes in the order the proof records were generated.
    #[arg(required = true)]
    hashes: Vec<String>,
}

#[derive(Subcommand)]
#[cfg_attr(not(feature = "evm"), allow(dead_code))]
enum ChainCommands {
    /// Anchor one proof hash and print the transaction hash.
    Anchor {
        #[arg(long)]
        proof_hash: ProofHash,
        #[arg(long)]
        payment_id: String,
    },
    /// Check whether a transaction anchors a proof hash.
    Verify {
        #[arg(long)]
        tx_hash: String,
        #[arg(long)]
        proof_hash: ProofHash,
    },
    /// Print the records and block placement of an anchor transaction.
    Info {
        #[arg(long)]
        tx_hash: String,
    },
    /// Print the anchoring wallet balance.
    Balance,
    /// Estimate what anchoring one proof costs right now.
    EstimateCost {
        #[arg(long)]
        proof_hash: ProofHash,
        #[arg(long)]
        payment_id: String,
    },
}

#[derive(Serialize)]
struct EncodedOutput {
    data: String,
    bytes: usize,
    gas_limit: u64,
}

#[derive(Serialize)]
struct DecodedOutput {
    anchor_magic: bool,
    version: Option<FormatVersion>,
    records: Vec<AnchorRecord>,
    anomaly: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encode(args) => encode(args),
        Commands::EncodeBatch(args) => encode_batch_file(args),
        Commands::Decode(args) => decode(args),
        Commands::MasterHash(args) => master_hash(args),
        Commands::Chain(command) => chain::run(command).await,
    }
}

fn encode(args: EncodeArgs) -> Result<()> {
    let payment_id = PaymentId::new(args.payment_id)?;
    let bytes = encode_single(&args.proof_hash, &payment_id);
    print_encoded(&bytes, args.json)
}

fn encode_batch_file(args: EncodeBatchArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.records)
        .with_context(|| format!("failed to read {}", args.records.display()))?;
    let records: Vec<AnchorRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse records in {}", args.records.display()))?;

    let bytes = encode_batch(&records)?;
    print_encoded(&bytes, args.json)
}

fn print_encoded(bytes: &[u8], json: bool) -> Result<()> {
    let output = EncodedOutput {
        data: to_hex(bytes),
        bytes: bytes.len(),
        gas_limit: anchor_gas_limit(bytes),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", output.data);
        eprintln!("{} bytes, gas limit {}", output.bytes, output.gas_limit);
    }
    Ok(())
}

fn decode(args: DecodeArgs) -> Result<()> {
    let digits = args.data.trim();
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    let bytes = hex::decode(digits).context("transaction data is not valid hex")?;

    let (version, records, anomaly) = match try_decode(&bytes) {
        Ok(payload) => (Some(payload.version()), payload.into_records(), None),
        Err(anomaly) => (None, Vec::new(), Some(anomaly.to_string())),
    };
    let output = DecodedOutput {
        anchor_magic: has_anchor_magic(&bytes),
        version,
        records,
        anomaly,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if let Some(anomaly) = &output.anomaly {
        println!("no anchor records ({anomaly})");
        return Ok(());
    }
    if !output.anchor_magic {
        eprintln!("warning: data does not start with the PAYPROOF magic");
    }
    for (index, record) in output.records.iter().enumerate() {
        println!("{index:>3}  {}  {}", record.proof_hash, record.payment_id);
    }
    Ok(())
}

fn master_hash(args: MasterHashArgs) -> Result<()> {
    println!("{}", master_proof_hash(&args.hashes));
    Ok(())
}

#[cfg(feature = "evm")]
mod chain {
    use std::sync::Arc;

    use anyhow::Result;
    use payproof_anchor::PaymentId;
    use payproof_rails_flare::{AnchorService, EvmChainClient, FlareConfig};
    use tracing::info;

    use super::ChainCommands;

    fn connect() -> Result<AnchorService<EvmChainClient>> {
        let config = FlareConfig::from_env()?;
        info!(?config, "Connecting anchoring wallet");
        let client = EvmChainClient::connect(&config)?;
        Ok(AnchorService::new(Arc::new(client)).with_confirmations(config.confirmations))
    }

    pub async fn run(command: ChainCommands) -> Result<()> {
        let service = connect()?;

        match command {
            ChainCommands::Anchor {
                proof_hash,
                payment_id,
            } => {
                let payment_id = PaymentId::new(payment_id)?;
                let tx_hash = service.anchor_proof_hash(&proof_hash, &payment_id).await?;
                println!("{tx_hash}");
            }
            ChainCommands::Verify {
                tx_hash,
                proof_hash,
            } => {
                let anchored = service.verify_anchor(&tx_hash, &proof_hash).await;
                println!("{}", if anchored { "anchored" } else { "not anchored" });
                if !anchored {
                    std::process::exit(1);
                }
            }
            ChainCommands::Info { tx_hash } => match service.get_anchor_info(&tx_hash).await {
                Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                None => anyhow::bail!("no anchor info for {tx_hash}"),
            },
            ChainCommands::Balance => {
                println!("{} FLR", service.wallet_balance().await?);
            }
            ChainCommands::EstimateCost {
                proof_hash,
                payment_id,
            } => {
                let payment_id = PaymentId::new(payment_id)?;
                let estimate = service.estimate_anchor_cost(&proof_hash, &payment_id).await?;
                println!("{}", serde_json::to_string_pretty(&estimate)?);
            }
        }
        Ok(())
    }
}

#[cfg(not(feature = "evm"))]
mod chain {
    use anyhow::{bail, Result};

    use super::ChainCommands;

    pub async fn run(_command: ChainCommands) -> Result<()> {
        bail!("on-chain commands need payproof-tools built with `--features evm`")
    }
}
