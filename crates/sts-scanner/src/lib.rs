//! Chunked Event Scanner: adaptive-window `Transfer`/`Issued` log backfill
//! into the holder ledger.

pub mod error;
pub mod scanner;

pub use error::ScannerError;
pub use scanner::{ScanWindow, Scanner};
