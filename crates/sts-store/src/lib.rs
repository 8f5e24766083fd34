//! Persistent storage for broadcast accounts, prepared transactions, token scans
//! and holder deltas.

pub mod error;
pub mod models;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use models::{
    BroadcastAccount, BroadcastAccountId, DeltaSum, HolderAccount, HolderAccountId,
    NewHolderDelta, NewPreparedTransaction, PreparedTransaction, PreparedTransactionId,
    TokenMetadata, TokenScanStatus, TokenScanStatusId, TransactionStatus,
};
pub use sqlite::SqliteStore;
pub use store::Store;
