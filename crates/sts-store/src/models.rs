//! Row types for the persisted entities.

use alloy_primitives::B256;
use sts_types::{ChecksumAddress, Network, Sign, SignedU256, UnixTimestamp};

/// Opaque row identifiers. Newtyped so a [`PreparedTransactionId`] can never be
/// passed where a [`HolderAccountId`] is expected.
macro_rules! row_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);
    };
}

row_id!(BroadcastAccountId);
row_id!(PreparedTransactionId);
row_id!(TokenScanStatusId);
row_id!(HolderAccountId);

#[derive(Debug, Clone)]
pub struct BroadcastAccount {
    pub id: BroadcastAccountId,
    pub network: Network,
    pub address: ChecksumAddress,
    pub current_nonce: u64,
}

/// Fields supplied by the caller when allocating a new [`PreparedTransaction`];
/// `account_id` and `nonce` are filled in by the store under its write lock.
#[derive(Debug, Clone)]
pub struct NewPreparedTransaction {
    pub contract_deployment: bool,
    pub receiver: Option<ChecksumAddress>,
    pub contract_address: Option<ChecksumAddress>,
    pub unsigned_payload: Vec<u8>,
    pub external_id: Option<String>,
    pub note: String,
    pub other_data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub id: PreparedTransactionId,
    pub account_id: BroadcastAccountId,
    pub nonce: u64,
    pub contract_deployment: bool,
    pub receiver: Option<ChecksumAddress>,
    pub contract_address: Option<ChecksumAddress>,
    pub unsigned_payload: Vec<u8>,
    pub external_id: Option<String>,
    pub note: String,
    pub txid: Option<B256>,
    pub broadcasted_at: Option<UnixTimestamp>,
    pub result_block: Option<u64>,
    pub result_success: Option<bool>,
    pub result_fetched_at: Option<UnixTimestamp>,
    pub verified_at: Option<UnixTimestamp>,
    pub other_data: Option<String>,
}

/// Machine-readable lifecycle state, derived from the nullable timestamp/result
/// columns rather than stored directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Waiting,
    Broadcasted,
    Mining,
    Success,
    Failed,
    Verified,
}

impl PreparedTransaction {
    pub fn status(&self) -> TransactionStatus {
        if self.verified_at.is_some() {
            return TransactionStatus::Verified;
        }
        match (self.broadcasted_at, self.result_fetched_at, self.result_success) {
            (None, _, _) => TransactionStatus::Waiting,
            (Some(_), None, _) => TransactionStatus::Broadcasted,
            (Some(_), Some(_), Some(true)) => TransactionStatus::Success,
            (Some(_), Some(_), Some(false)) => TransactionStatus::Failed,
            (Some(_), Some(_), None) => TransactionStatus::Mining,
        }
    }

    pub fn to_address(&self) -> Option<ChecksumAddress> {
        self.receiver.or(self.contract_address)
    }
}

#[derive(Debug, Clone)]
pub struct TokenScanStatus {
    pub id: TokenScanStatusId,
    pub network: Network,
    pub token_address: ChecksumAddress,
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
    pub end_block_timestamp: Option<UnixTimestamp>,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
    pub token_decimals: Option<u8>,
    pub total_supply: Option<SignedU256>,
}

#[derive(Debug, Clone)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: SignedU256,
}

#[derive(Debug, Clone)]
pub struct HolderAccount {
    pub id: HolderAccountId,
    pub scan_status_id: TokenScanStatusId,
    pub address: ChecksumAddress,
    pub balance: SignedU256,
    pub sortable_balance: i128,
    pub empty: bool,
    pub balance_calculated_at: Option<UnixTimestamp>,
    pub last_block: Option<u64>,
    pub last_block_at: Option<UnixTimestamp>,
}

/// A single signed delta to apply to one [`HolderAccount`].
#[derive(Debug, Clone)]
pub struct NewHolderDelta {
    pub block_num: u64,
    pub block_timestamp: UnixTimestamp,
    pub txid: B256,
    pub tx_internal_order: u64,
    pub raw_delta: SignedU256,
}

#[derive(Debug, Clone, Copy)]
pub struct DeltaSum {
    pub balance: SignedU256,
    pub last_block: Option<u64>,
    pub last_block_at: Option<UnixTimestamp>,
}

pub(crate) fn sign_to_i64(sign: Sign) -> i64 {
    if sign.is_credit() { 1 } else { -1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(
        broadcasted_at: Option<UnixTimestamp>,
        result_fetched_at: Option<UnixTimestamp>,
        result_success: Option<bool>,
        verified_at: Option<UnixTimestamp>,
    ) -> PreparedTransaction {
        PreparedTransaction {
            id: PreparedTransactionId(1),
            account_id: BroadcastAccountId(1),
            nonce: 0,
            contract_deployment: false,
            receiver: None,
            contract_address: None,
            unsigned_payload: vec![],
            external_id: None,
            note: "".into(),
            txid: None,
            broadcasted_at,
            result_block: None,
            result_success,
            result_fetched_at,
            verified_at,
            other_data: None,
        }
    }

    #[test]
    fn status_walks_the_lifecycle_in_order() {
        let now = UnixTimestamp::from_secs(1);
        assert_eq!(tx(None, None, None, None).status(), TransactionStatus::Waiting);
        assert_eq!(tx(Some(now), None, None, None).status(), TransactionStatus::Broadcasted);
        assert_eq!(
            tx(Some(now), Some(now), None, None).status(),
            TransactionStatus::Mining
        );
        assert_eq!(
            tx(Some(now), Some(now), Some(true), None).status(),
            TransactionStatus::Success
        );
        assert_eq!(
            tx(Some(now), Some(now), Some(false), None).status(),
            TransactionStatus::Failed
        );
    }

    #[test]
    fn verified_at_wins_regardless_of_other_fields() {
        let now = UnixTimestamp::from_secs(1);
        assert_eq!(
            tx(Some(now), Some(now), Some(true), Some(now)).status(),
            TransactionStatus::Verified
        );
    }

    #[test]
    fn to_address_prefers_receiver_over_contract_address() {
        let mut t = tx(None, None, None, None);
        t.contract_address = Some(ChecksumAddress(alloy_primitives::Address::repeat_byte(2)));
        assert_eq!(t.to_address(), t.contract_address);

        t.receiver = Some(ChecksumAddress(alloy_primitives::Address::repeat_byte(1)));
        assert_eq!(t.to_address(), t.receiver);
    }
}
