//! Top-level error-to-exit-code funnel and subcommand dispatch: 0 on
//! success, non-zero on any fatal error kind.

use std::path::Path;
use std::sync::Arc;

use alloy_dyn_abi::DynSolValue;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sts_chain::{AbiBundle, ChainProvider};
use sts_scanner::Scanner;
use sts_service::{DistributionEntry, StsService};
use sts_store::SqliteStore;

use crate::commands::{CliArgs, Command};
use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Chain(#[from] sts_chain::ChainError),
    #[error(transparent)]
    Store(#[from] sts_store::StoreError),
    #[error(transparent)]
    Sts(#[from] sts_service::StsError),
    #[error(transparent)]
    Scanner(#[from] sts_scanner::ScannerError),
    #[error("reading distribution csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("distribution csv row could not be parsed: {0}")]
    DistributionRow(String),
}

/// Runs one subcommand to completion and returns its process exit code.
pub async fn run() -> i32 {
    match run_inner().await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            1
        }
    }
}

async fn run_inner() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli_args = CliArgs::parse();
    let config = AppConfig::load(&cli_args.config)?;

    let store = Arc::new(SqliteStore::open(&config.store_path)?);
    let provider = Arc::new(ChainProvider::connect(&config.chain).await?);
    let abi = Arc::new(AbiBundle::load_dir(&config.abi_dir)?);

    let sts = StsService::new(
        store.clone(),
        provider.clone(),
        abi,
        config.network.clone(),
        config.chain.gas,
    );
    let scanner = Scanner::new(store.clone(), provider.clone(), config.network.clone(), config.scan_window);

    match cli_args.command {
        Command::Scan { token, start, end, chunk } => {
            let start = match start {
                Some(b) => b,
                None => scanner.get_suggested_scan_start_block(token).await?,
            };
            let end = match end {
                Some(b) => b,
                None => scanner.get_suggested_scan_end_block().await?,
            };
            let balances = scanner.scan(token, start, end, chunk, None).await?;
            for (address, balance) in balances {
                println!("{address}\t{balance}");
            }
        }
        Command::Deploy { contract, note, gas_limit, gas_price } => {
            let tx = sts
                .deploy_contract(&contract, note, &[] as &[DynSolValue], gas_limit, gas_price)
                .await?;
            println!("allocated nonce {} for {contract}, contract address {:?}", tx.nonce, tx.contract_address);
        }
        Command::Distribute { token, csv, note } => {
            let entries = read_distribution_csv(&csv)?;
            let summary = sts.distribute_many(token, &entries, &note).await?;
            println!("new={} old={}", summary.new, summary.old);
        }
        Command::Status { limit } => {
            let pending = sts.get_pending_broadcasts().await?;
            let recent = sts.get_last_transactions(limit).await?;
            println!("pending broadcasts: {}", pending.len());
            for tx in &recent {
                println!("nonce={} status={:?} txid={:?}", tx.nonce, tx.status(), tx.txid);
            }
        }
        Command::RestartNonce => {
            let rewritten = sts.restart_nonce().await?;
            println!("rewrote {} queued transaction(s)", rewritten.len());
        }
    }

    Ok(())
}

fn read_distribution_csv(path: &Path) -> Result<Vec<DistributionEntry>, AppError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        let external_id = record
            .get(0)
            .ok_or_else(|| AppError::DistributionRow(format!("{record:?}")))?
            .to_string();
        let address: alloy_primitives::Address = record
            .get(1)
            .ok_or_else(|| AppError::DistributionRow(format!("{record:?}")))?
            .parse()
            .map_err(|_| AppError::DistributionRow(format!("{record:?}")))?;
        let raw_amount: alloy_primitives::U256 = record
            .get(2)
            .ok_or_else(|| AppError::DistributionRow(format!("{record:?}")))?
            .parse()
            .map_err(|_| AppError::DistributionRow(format!("{record:?}")))?;
        entries.push(DistributionEntry { external_id, address, raw_amount });
    }
    Ok(entries)
}
