//! Holder Balance Ledger: denormalised balances derived from a signed delta stream.
//!
//! Every entry point is a thin async wrapper around one blocking [`Store`]
//! call, matching this workspace's convention of pushing SQLite access onto
//! a blocking thread rather than giving the store its own async surface.

use std::sync::Arc;

use alloy_primitives::Address;
use sts_store::{HolderAccount, HolderAccountId, NewHolderDelta, Store, TokenScanStatusId};
use sts_types::UnixTimestamp;

use crate::error::LedgerError;

pub struct Ledger<S> {
    store: Arc<S>,
}

impl<S: Store> Ledger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn get_or_create(
        &self,
        scan_id: TokenScanStatusId,
        address: Address,
    ) -> Result<HolderAccount, LedgerError> {
        let store = self.store.clone();
        blocking(move || store.get_or_create_holder_account(scan_id, address)).await
    }

    /// Appends one delta to the account's ledger. Dirtiness is implicit:
    /// `balance_calculated_at` only advances when
    /// [`Self::update_denormalised_balance`] is next called.
    pub async fn add_delta(
        &self,
        holder_account_id: HolderAccountId,
        delta: NewHolderDelta,
    ) -> Result<(), LedgerError> {
        let store = self.store.clone();
        blocking(move || store.insert_delta(holder_account_id, delta)).await
    }

    /// Recomputes the denormalised balance from the full delta stream and
    /// stamps `balance_calculated_at = now`.
    pub async fn update_denormalised_balance(
        &self,
        holder_account_id: HolderAccountId,
    ) -> Result<HolderAccount, LedgerError> {
        let store = self.store.clone();
        let calculated_at = UnixTimestamp::now();
        blocking(move || {
            let sum = store.sum_deltas(holder_account_id)?;
            store.mark_balance_calculated(holder_account_id, sum, calculated_at)?;
            store.get_holder_account(holder_account_id)
        })
        .await
    }

    /// Recomputes every account in `dirty`, e.g. after a fork-guard purge or
    /// a freshly scanned chunk.
    pub async fn update_many(
        &self,
        dirty: impl IntoIterator<Item = HolderAccountId>,
    ) -> Result<Vec<HolderAccount>, LedgerError> {
        let mut updated = Vec::new();
        for id in dirty {
            updated.push(self.update_denormalised_balance(id).await?);
        }
        Ok(updated)
    }

    /// Insertion-order scan; callers sort and paginate.
    pub async fn get_accounts(
        &self,
        scan_id: TokenScanStatusId,
        include_empty: bool,
    ) -> Result<Vec<HolderAccount>, LedgerError> {
        let store = self.store.clone();
        blocking(move || store.get_holder_accounts(scan_id, include_empty)).await
    }

    /// Cap-table read model: holders sorted by `sortable_balance` descending.
    pub async fn get_holders(
        &self,
        scan_id: TokenScanStatusId,
        include_empty: bool,
    ) -> Result<Vec<HolderAccount>, LedgerError> {
        let mut accounts = self.get_accounts(scan_id, include_empty).await?;
        accounts.sort_by(|a, b| b.sortable_balance.cmp(&a.sortable_balance));
        Ok(accounts)
    }

    pub async fn get_total_token_holder_count(
        &self,
        scan_id: TokenScanStatusId,
        include_empty: bool,
    ) -> Result<u64, LedgerError> {
        let store = self.store.clone();
        blocking(move || store.count_holder_accounts(scan_id, include_empty)).await
    }
}

async fn blocking<F, T>(f: F) -> Result<T, LedgerError>
where
    F: FnOnce() -> Result<T, sts_store::StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("store task panicked")
        .map_err(LedgerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256};
    use sts_store::SqliteStore;
    use sts_types::{Network, Sign, SignedU256};
    use std::str::FromStr;

    fn setup() -> (Ledger<SqliteStore>, TokenScanStatusId) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let network = Network::from_str("eip155:1").unwrap();
        let scan = store
            .get_or_create_scan_status(&network, Address::repeat_byte(9))
            .unwrap();
        (Ledger::new(store), scan.id)
    }

    #[tokio::test]
    async fn holder_account_starts_empty_and_updates_after_deltas() {
        let (ledger, scan_id) = setup();
        let holder = ledger.get_or_create(scan_id, Address::repeat_byte(1)).await.unwrap();
        assert!(holder.empty);

        ledger
            .add_delta(
                holder.id,
                NewHolderDelta {
                    block_num: 1,
                    block_timestamp: UnixTimestamp::from_secs(1),
                    txid: B256::repeat_byte(1),
                    tx_internal_order: 0,
                    raw_delta: SignedU256::from_magnitude_and_sign(U256::from(500u64), Sign::Credit),
                },
            )
            .await
            .unwrap();

        let updated = ledger.update_denormalised_balance(holder.id).await.unwrap();
        assert!(!updated.empty);
        assert_eq!(updated.sortable_balance, 500);
        assert!(updated.balance_calculated_at.is_some());
    }

    #[tokio::test]
    async fn get_holders_sorts_by_balance_descending() {
        let (ledger, scan_id) = setup();
        let small = ledger.get_or_create(scan_id, Address::repeat_byte(1)).await.unwrap();
        let large = ledger.get_or_create(scan_id, Address::repeat_byte(2)).await.unwrap();

        for (holder, amount) in [(small.id, 10u64), (large.id, 1000u64)] {
            ledger
                .add_delta(
                    holder,
                    NewHolderDelta {
                        block_num: 1,
                        block_timestamp: UnixTimestamp::from_secs(1),
                        txid: B256::repeat_byte(3),
                        tx_internal_order: 0,
                        raw_delta: SignedU256::from_magnitude_and_sign(U256::from(amount), Sign::Credit),
                    },
                )
                .await
                .unwrap();
            ledger.update_denormalised_balance(holder).await.unwrap();
        }

        let holders = ledger.get_holders(scan_id, false).await.unwrap();
        assert_eq!(holders[0].address.0, Address::repeat_byte(2));
        assert_eq!(holders[1].address.0, Address::repeat_byte(1));
    }

    /// Mint-then-transfer chain mirroring an issuance followed by two holder
    /// transfers: a mint credits the deployer only (no debit leg), then
    /// value moves deployer -> A1 -> A3 in two hops, and the now-empty A1
    /// drops out of the non-empty cap-table count.
    #[tokio::test]
    async fn mint_then_transfer_chain_nets_to_expected_holders() {
        let (ledger, scan_id) = setup();
        let unit = U256::from(10u64).pow(U256::from(18u64));
        let deployer = ledger.get_or_create(scan_id, Address::repeat_byte(0xDE)).await.unwrap();
        let a1 = ledger.get_or_create(scan_id, Address::repeat_byte(0xA1)).await.unwrap();
        let a3 = ledger.get_or_create(scan_id, Address::repeat_byte(0xA3)).await.unwrap();

        ledger
            .add_delta(
                deployer.id,
                NewHolderDelta {
                    block_num: 1,
                    block_timestamp: UnixTimestamp::from_secs(1),
                    txid: B256::repeat_byte(1),
                    tx_internal_order: 0,
                    raw_delta: SignedU256::from_magnitude_and_sign(unit * U256::from(9999u64), Sign::Credit),
                },
            )
            .await
            .unwrap();

        // deployer -> A1: 101
        ledger
            .add_delta(
                deployer.id,
                NewHolderDelta {
                    block_num: 2,
                    block_timestamp: UnixTimestamp::from_secs(2),
                    txid: B256::repeat_byte(2),
                    tx_internal_order: 1,
                    raw_delta: SignedU256::from_magnitude_and_sign(unit * U256::from(101u64), Sign::Debit),
                },
            )
            .await
            .unwrap();
        ledger
            .add_delta(
                a1.id,
                NewHolderDelta {
                    block_num: 2,
                    block_timestamp: UnixTimestamp::from_secs(2),
                    txid: B256::repeat_byte(2),
                    tx_internal_order: 1,
                    raw_delta: SignedU256::from_magnitude_and_sign(unit * U256::from(101u64), Sign::Credit),
                },
            )
            .await
            .unwrap();

        // A1 -> A3: 51, then 50 more.
        for (block, txid_byte, amount) in [(3u64, 3u8, 51u64), (4u64, 4u8, 50u64)] {
            ledger
                .add_delta(
                    a1.id,
                    NewHolderDelta {
                        block_num: block,
                        block_timestamp: UnixTimestamp::from_secs(block),
                        txid: B256::repeat_byte(txid_byte),
                        tx_internal_order: 0,
                        raw_delta: SignedU256::from_magnitude_and_sign(unit * U256::from(amount), Sign::Debit),
                    },
                )
                .await
                .unwrap();
            ledger
                .add_delta(
                    a3.id,
                    NewHolderDelta {
                        block_num: block,
                        block_timestamp: UnixTimestamp::from_secs(block),
                        txid: B256::repeat_byte(txid_byte),
                        tx_internal_order: 0,
                        raw_delta: SignedU256::from_magnitude_and_sign(unit * U256::from(amount), Sign::Credit),
                    },
                )
                .await
                .unwrap();
        }

        let updated = ledger.update_many([deployer.id, a1.id, a3.id]).await.unwrap();
        let by_id = |id| updated.iter().find(|a| a.id == id).unwrap();

        assert_eq!(by_id(deployer.id).balance, SignedU256::from_magnitude_and_sign(unit * U256::from(9898u64), Sign::Credit));
        assert!(by_id(a1.id).empty);
        assert_eq!(by_id(a3.id).balance, SignedU256::from_magnitude_and_sign(unit * U256::from(101u64), Sign::Credit));

        assert_eq!(ledger.get_total_token_holder_count(scan_id, false).await.unwrap(), 2);
        assert_eq!(ledger.get_total_token_holder_count(scan_id, true).await.unwrap(), 3);
    }
}
