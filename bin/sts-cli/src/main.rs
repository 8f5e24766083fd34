//! Composition root for the stored-transaction / event-scanner / holder-ledger
//! core: loads a JSON config file, wires a chain provider and SQLite store,
//! and runs one of `scan`, `deploy`, `distribute`, `status`, `restart-nonce`.

mod commands;
mod config;
mod run;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    let code = run().await;
    process::exit(code)
}
