//! The `Store` trait: everything STS, CES and HBL need from persistence.
//!
//! Deliberately synchronous — the deployment model is one writer per (network,
//! address), and a local SQLite connection behind a single mutex already
//! serializes every call. Async callers (the chain-facing STS/CES operations)
//! push calls onto a blocking thread via `tokio::task::spawn_blocking` rather
//! than this trait pretending to be async itself.

use alloy_primitives::{Address, B256};
use sts_types::{ChecksumAddress, Network, UnixTimestamp};

use crate::error::StoreError;
use crate::models::{
    BroadcastAccount, BroadcastAccountId, DeltaSum, HolderAccount, HolderAccountId,
    NewHolderDelta, NewPreparedTransaction, PreparedTransaction, PreparedTransactionId,
    TokenMetadata, TokenScanStatus, TokenScanStatusId,
};

pub trait Store: Send + Sync + 'static {
    // -- BroadcastAccount / nonce allocation -------------------------------------------------

    fn get_or_create_broadcast_account(
        &self,
        network: &Network,
        address: Address,
    ) -> Result<BroadcastAccount, StoreError>;

    /// Atomically allocates the next nonce and inserts the prepared transaction in one
    /// commit. Returns the allocated nonce alongside the inserted row.
    fn allocate_prepared_transaction(
        &self,
        account_id: BroadcastAccountId,
        new_tx: NewPreparedTransaction,
    ) -> Result<PreparedTransaction, StoreError>;

    /// Re-anchors `current_nonce` and rewrites the nonces of every not-yet-broadcast
    /// transaction to a contiguous range starting at `new_current_nonce - count`.
    /// Returns the rewritten rows in ascending new-nonce order.
    fn restart_nonce(
        &self,
        account_id: BroadcastAccountId,
        new_current_nonce: u64,
    ) -> Result<Vec<PreparedTransaction>, StoreError>;

    fn update_prepared_transaction_payload(
        &self,
        id: PreparedTransactionId,
        contract_address: Option<ChecksumAddress>,
        unsigned_payload: Vec<u8>,
        other_data: Option<String>,
    ) -> Result<(), StoreError>;

    // -- PreparedTransaction lifecycle -------------------------------------------------------

    fn find_prepared_transaction_by_external_id(
        &self,
        external_id: &str,
        contract_address: Address,
    ) -> Result<Option<PreparedTransaction>, StoreError>;

    fn get_prepared_transaction(
        &self,
        id: PreparedTransactionId,
    ) -> Result<PreparedTransaction, StoreError>;

    fn get_pending_broadcasts(
        &self,
        account_id: BroadcastAccountId,
    ) -> Result<Vec<PreparedTransaction>, StoreError>;

    fn get_unmined_txs(
        &self,
        account_id: BroadcastAccountId,
    ) -> Result<Vec<PreparedTransaction>, StoreError>;

    fn get_last_transactions(
        &self,
        account_id: BroadcastAccountId,
        limit: u32,
    ) -> Result<Vec<PreparedTransaction>, StoreError>;

    fn mark_broadcasted(
        &self,
        id: PreparedTransactionId,
        txid: B256,
        broadcasted_at: UnixTimestamp,
    ) -> Result<(), StoreError>;

    fn record_status(
        &self,
        id: PreparedTransactionId,
        result_block: u64,
        result_success: bool,
        fetched_at: UnixTimestamp,
    ) -> Result<(), StoreError>;

    fn mark_verified(
        &self,
        id: PreparedTransactionId,
        verified_at: UnixTimestamp,
    ) -> Result<(), StoreError>;

    // -- TokenScanStatus ----------------------------------------------------------------------

    fn get_or_create_scan_status(
        &self,
        network: &Network,
        token_address: Address,
    ) -> Result<TokenScanStatus, StoreError>;

    fn update_token_metadata(
        &self,
        scan_id: TokenScanStatusId,
        metadata: TokenMetadata,
    ) -> Result<(), StoreError>;

    fn advance_scan_window(
        &self,
        scan_id: TokenScanStatusId,
        start_block: u64,
        end_block: u64,
    ) -> Result<(), StoreError>;

    /// Deletes every delta at `block_num >= from_block` for this scan (the fork-guard
    /// purge), returning the set of holder accounts left dirty.
    fn purge_forked_suffix(
        &self,
        scan_id: TokenScanStatusId,
        from_block: u64,
    ) -> Result<Vec<HolderAccountId>, StoreError>;

    // -- HolderAccount / HolderDelta ------------------------------------------------------------

    fn get_or_create_holder_account(
        &self,
        scan_id: TokenScanStatusId,
        address: Address,
    ) -> Result<HolderAccount, StoreError>;

    fn get_holder_account(&self, id: HolderAccountId) -> Result<HolderAccount, StoreError>;

    /// Inserts one delta row. Errors with [`StoreError::DuplicateEvent`] if a delta
    /// already exists for this (holder account, block_num, tx_internal_order, sign)
    /// triple — that combination indicates a missing fork-guard purge.
    fn insert_delta(
        &self,
        holder_account_id: HolderAccountId,
        delta: NewHolderDelta,
    ) -> Result<(), StoreError>;

    /// Sums every delta for this holder account ordered by `(block_num, tx_internal_order)`.
    fn sum_deltas(&self, holder_account_id: HolderAccountId) -> Result<DeltaSum, StoreError>;

    fn mark_balance_calculated(
        &self,
        holder_account_id: HolderAccountId,
        sum: DeltaSum,
        calculated_at: UnixTimestamp,
    ) -> Result<(), StoreError>;

    /// Insertion-order scan; callers sort/paginate.
    fn get_holder_accounts(
        &self,
        scan_id: TokenScanStatusId,
        include_empty: bool,
    ) -> Result<Vec<HolderAccount>, StoreError>;

    fn count_holder_accounts(
        &self,
        scan_id: TokenScanStatusId,
        include_empty: bool,
    ) -> Result<u64, StoreError>;
}
