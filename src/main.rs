use std::fs;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use currency_core::logging::{init_logging, LogFormat};
use currency_core::*;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "currency-cli")]
#[command(about = "Currency Core CLI - keys, addresses, fees and offline batch processing")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new random key and its single-key address
    Keygen {
        /// Ethereum flavoured key and address
        #[arg(long)]
        ethereum: bool,
    },

    /// Derive the address of a set of account keys
    Address {
        /// Account key as PUBLIC_KEY=WEIGHT (repeatable)
        #[arg(short, long = "key", required = true)]
        keys: Vec<String>,

        /// Signature weight threshold
        #[arg(short, long, default_value = "100")]
        threshold: u32,

        /// Ethereum address (exactly one key)
        #[arg(long)]
        ethereum: bool,
    },

    /// Evaluate a feeer (JSON) on an amount
    Fee {
        /// Feeer JSON, e.g. {"_hint":"nil-feeer-v0.0.1"}
        #[arg(short, long)]
        feeer: String,

        /// Amount the fee is charged on
        #[arg(short, long)]
        amount: String,
    },

    /// Process a batch of JSON operations against a JSON state dump
    Process {
        /// State dump: JSON array of states
        #[arg(short, long)]
        state: String,

        /// Operations: JSON array of signed operations
        #[arg(short, long)]
        operations: String,

        /// Height the batch is processed at
        #[arg(long, default_value = "1")]
        height: u64,

        /// Engine configuration (TOML)
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Keygen { ethereum } => handle_keygen(ethereum),
        Commands::Address {
            keys,
            threshold,
            ethereum,
        } => handle_address(keys, threshold, ethereum),
        Commands::Fee { feeer, amount } => handle_fee(feeer, amount),
        Commands::Process {
            state,
            operations,
            height,
            config,
        } => handle_process(state, operations, height, config),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn handle_keygen(ethereum: bool) -> anyhow::Result<()> {
    let kind = if ethereum { KeyKind::Ethereum } else { KeyKind::Native };
    let private_key = PrivateKey::random(kind);
    let keys = AccountKeys::new(vec![AccountKey::new(private_key.public_key(), 100)?], 100)?;
    let address_kind = if ethereum { AddressKind::Ethereum } else { AddressKind::Native };
    let address = derive_address(&keys, address_kind)?;

    println!("Private Key: {}", private_key);
    println!("Public Key: {}", private_key.public_key());
    println!("Address: {}", address);

    Ok(())
}

fn parse_account_key(s: &str) -> anyhow::Result<AccountKey> {
    let (key, weight) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("account key {:?} is not PUBLIC_KEY=WEIGHT", s))?;
    let key: PublicKey = key.parse()?;
    let weight: u32 = weight
        .parse()
        .with_context(|| format!("invalid weight in {:?}", s))?;
    Ok(AccountKey::new(key, weight)?)
}

fn handle_address(keys: Vec<String>, threshold: u32, ethereum: bool) -> anyhow::Result<()> {
    let keys = keys
        .iter()
        .map(|s| parse_account_key(s))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let keys = AccountKeys::new(keys, threshold)?;
    let kind = if ethereum { AddressKind::Ethereum } else { AddressKind::Native };

    println!("Address: {}", derive_address(&keys, kind)?);

    Ok(())
}

fn handle_fee(feeer: String, amount: String) -> anyhow::Result<()> {
    let feeer: Feeer = serde_json::from_str(&feeer).context("invalid feeer JSON")?;
    feeer.is_valid()?;
    let amount: Big = amount
        .parse()
        .map_err(|_| anyhow!("invalid amount {:?}", amount))?;

    println!("Feeer: {}", feeer.kind());
    println!("Fee: {}", feeer.fee(&amount)?);
    if let Some(receiver) = feeer.receiver() {
        println!("Receiver: {}", receiver);
    }

    Ok(())
}

#[derive(Serialize)]
struct Rejected {
    operation: String,
    reason: String,
}

#[derive(Serialize)]
struct ProcessReport {
    height: Height,
    accepted: Vec<Hash>,
    rejected: Vec<Rejected>,
    states: Vec<State>,
}

fn handle_process(
    state: String,
    operations: String,
    height: u64,
    config: Option<String>,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => EngineConfig::from_file(&path)?,
        None => EngineConfig::default(),
    };
    init_logging(config.log_format.parse::<LogFormat>()?, &config.log_level)?;

    let states: Vec<State> = serde_json::from_str(
        &fs::read_to_string(&state).with_context(|| format!("reading {}", state))?,
    )
    .with_context(|| format!("parsing {}", state))?;
    let ops: Vec<Operation> = serde_json::from_str(
        &fs::read_to_string(&operations).with_context(|| format!("reading {}", operations))?,
    )
    .with_context(|| format!("parsing {}", operations))?;

    if ops.is_empty() {
        bail!("no operations in {}", operations);
    }

    let store = MemoryStore::from_states(states)?;
    let height = Height::new(height);
    let dispatcher = Dispatcher::new(&config, height, Arc::new(store.snapshot()))?;
    let batch = dispatcher.process_batch(&ops)?;
    let committed = store.commit(height, &batch.accepted)?;

    let report = ProcessReport {
        height,
        accepted: batch.accepted.iter().map(|(op, _)| *op).collect(),
        rejected: batch
            .rejected
            .iter()
            .map(|(op, reason)| Rejected {
                operation: op.to_string(),
                reason: reason.to_string(),
            })
            .collect(),
        states: committed,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
