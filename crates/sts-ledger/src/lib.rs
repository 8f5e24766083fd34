//! Holder Balance Ledger: denormalised balances over a stream of signed deltas.

pub mod error;
pub mod ledger;

pub use error::LedgerError;
pub use ledger::Ledger;
