//! CLI argument surface: subcommands for scanning, deploying, distributing,
//! checking status, and restarting a stuck nonce.

use std::path::PathBuf;

use alloy_primitives::Address;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sts-cli")]
#[command(about = "Stored-transaction / event-scanner / holder-ledger composition root")]
pub struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backfill/advance the holder ledger for one token over a block range.
    Scan {
        token: Address,
        /// Defaults to the suggested start block (last_end_block - REORG_DEPTH).
        #[arg(long)]
        start: Option<u64>,
        /// Defaults to the current chain head.
        #[arg(long)]
        end: Option<u64>,
        #[arg(long, default_value_t = 20)]
        chunk: u64,
    },
    /// Allocate a deployment transaction from a named ABI bundle contract.
    Deploy {
        contract: String,
        #[arg(long, default_value = "")]
        note: String,
        /// Overrides the chain adapter's deployment gas limit default.
        #[arg(long)]
        gas_limit: Option<u64>,
        /// Overrides the node-fetched gas price on legacy (non-EIP-1559) networks.
        #[arg(long)]
        gas_price: Option<u128>,
    },
    /// Distribute tokens to every row of a CSV file (`external_id,address,raw_amount`).
    Distribute {
        token: Address,
        csv: PathBuf,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Report pending broadcasts and recent transaction history.
    Status {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Re-anchor the account's nonce to the chain's reported transaction count.
    RestartNonce,
}
