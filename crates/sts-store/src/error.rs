//! Store-level error kinds.

use crate::models::{HolderAccountId, PreparedTransactionId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("already distributed: external_id/contract_address pair already has a prepared transaction")]
    AlreadyDistributed,

    #[error(
        "duplicate event: holder account {account:?} already has a delta at (block {block_num}, log {tx_internal_order})"
    )]
    DuplicateEvent {
        account: HolderAccountId,
        block_num: u64,
        tx_internal_order: u64,
    },

    #[error("prepared transaction {0:?} not found")]
    TransactionNotFound(PreparedTransactionId),

    #[error("broadcast account not found for that network/address")]
    AccountNotFound,
}
