//! Chunked Event Scanner: backfills and incrementally advances a per-token
//! holder ledger from `Transfer`/`Issued` logs over adaptively sized block
//! windows, tolerating single-block reorgs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use sts_chain::ChainProvider;
use sts_ledger::Ledger;
use sts_store::{HolderAccountId, NewHolderDelta, Store, TokenMetadata, TokenScanStatusId};
use sts_types::{Network, Sign, SignedU256, UnixTimestamp};

use crate::error::ScannerError;

/// Adaptive window bounds for the chunked scan loop. `max_chunk` is a
/// parameter, not a hardcoded constant, since permissive test chains
/// tolerate far larger windows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanWindow {
    #[serde(default = "scan_window_defaults::min_chunk")]
    pub min_chunk: u64,
    #[serde(default = "scan_window_defaults::max_chunk")]
    pub max_chunk: u64,
    #[serde(default = "scan_window_defaults::increase_factor")]
    pub increase_factor: f64,
    #[serde(default = "scan_window_defaults::reorg_depth")]
    pub reorg_depth: u64,
}

impl Default for ScanWindow {
    fn default() -> Self {
        Self {
            min_chunk: scan_window_defaults::min_chunk(),
            max_chunk: scan_window_defaults::max_chunk(),
            increase_factor: scan_window_defaults::increase_factor(),
            reorg_depth: scan_window_defaults::reorg_depth(),
        }
    }
}

mod scan_window_defaults {
    pub fn min_chunk() -> u64 {
        10
    }
    pub fn max_chunk() -> u64 {
        10_000
    }
    pub fn increase_factor() -> f64 {
        5.0
    }
    pub fn reorg_depth() -> u64 {
        10
    }
}

pub struct Scanner<S> {
    store: Arc<S>,
    provider: Arc<ChainProvider>,
    ledger: Ledger<S>,
    network: Network,
    window: ScanWindow,
}

impl<S: Store> Scanner<S> {
    pub fn new(
        store: Arc<S>,
        provider: Arc<ChainProvider>,
        network: Network,
        window: ScanWindow,
    ) -> Self {
        let ledger = Ledger::new(store.clone());
        Self { store, provider, ledger, network, window }
    }

    async fn scan_status_id(&self, token_address: Address) -> Result<TokenScanStatusId, ScannerError> {
        let store = self.store.clone();
        let network = self.network.clone();
        let status = blocking(move || store.get_or_create_scan_status(&network, token_address)).await?;
        Ok(status.id)
    }

    pub async fn get_suggested_scan_start_block(
        &self,
        token_address: Address,
    ) -> Result<u64, ScannerError> {
        let store = self.store.clone();
        let network = self.network.clone();
        let status =
            blocking(move || store.get_or_create_scan_status(&network, token_address)).await?;
        Ok(match status.end_block {
            Some(end) => end.saturating_sub(self.window.reorg_depth).max(1),
            None => 1,
        })
    }

    pub async fn get_suggested_scan_end_block(&self) -> Result<u64, ScannerError> {
        Ok(self.provider.block_number().await?)
    }

    /// Backfills `[start_block, end_block]`, returning the raw balances of
    /// every address touched during the final chunk only. Idempotent:
    /// re-running over an overlapping range purges and replays the forked
    /// suffix first.
    pub async fn scan(
        &self,
        token_address: Address,
        start_block: u64,
        end_block: u64,
        start_chunk_size: u64,
        mut progress_callback: Option<&mut dyn FnMut(u64, u64, u64, u64)>,
    ) -> Result<HashMap<Address, SignedU256>, ScannerError> {
        let scan_id = self.scan_status_id(token_address).await?;

        // 1. Fork-guard purge.
        let store = self.store.clone();
        let dirty = blocking(move || store.purge_forked_suffix(scan_id, start_block)).await?;
        let mut dirty_accounts: HashSet<HolderAccountId> = dirty.into_iter().collect();

        // 2. Token metadata refresh.
        let (name, symbol, decimals, total_supply) =
            self.provider.token_metadata(token_address).await?;
        let metadata = TokenMetadata {
            name,
            symbol,
            decimals,
            total_supply: SignedU256::from_magnitude_and_sign(total_supply, Sign::Credit),
        };
        let store = self.store.clone();
        blocking(move || store.update_token_metadata(scan_id, metadata)).await?;

        // 3. Window loop.
        let mut current = start_block;
        let mut chunk = start_chunk_size.clamp(self.window.min_chunk, self.window.max_chunk);
        let mut block_timestamps: HashMap<u64, UnixTimestamp> = HashMap::new();
        let mut touched_last_chunk: HashSet<Address> = HashSet::new();

        while current <= end_block {
            let current_end = (current + chunk).min(end_block);
            touched_last_chunk.clear();

            let events = self.provider.token_events(token_address, current, current_end).await?;
            let hit = !events.is_empty();

            for event in &events {
                let timestamp = match block_timestamps.get(&event.block_num) {
                    Some(ts) => *ts,
                    None => {
                        let secs = self.provider.block_timestamp(event.block_num).await?;
                        let ts = UnixTimestamp::from_secs(secs);
                        block_timestamps.insert(event.block_num, ts);
                        ts
                    }
                };

                let is_mint = event.from.is_none_or(|from| from == Address::ZERO);

                let to_account = self.ledger.get_or_create(scan_id, event.to).await?;
                self.ledger
                    .add_delta(
                        to_account.id,
                        NewHolderDelta {
                            block_num: event.block_num,
                            block_timestamp: timestamp,
                            txid: event.txid,
                            tx_internal_order: event.log_index,
                            raw_delta: SignedU256::from_magnitude_and_sign(event.value, Sign::Credit),
                        },
                    )
                    .await?;
                dirty_accounts.insert(to_account.id);
                touched_last_chunk.insert(event.to);

                if !is_mint {
                    let from = event.from.expect("checked above");
                    let from_account = self.ledger.get_or_create(scan_id, from).await?;
                    self.ledger
                        .add_delta(
                            from_account.id,
                            NewHolderDelta {
                                block_num: event.block_num,
                                block_timestamp: timestamp,
                                txid: event.txid,
                                tx_internal_order: event.log_index,
                                raw_delta: SignedU256::from_magnitude_and_sign(
                                    event.value,
                                    Sign::Debit,
                                ),
                            },
                        )
                        .await?;
                    dirty_accounts.insert(from_account.id);
                    touched_last_chunk.insert(from);
                }
            }

            let store = self.store.clone();
            blocking(move || store.advance_scan_window(scan_id, start_block, current_end)).await?;

            if let Some(cb) = progress_callback.as_deref_mut() {
                cb(start_block, end_block, current_end, chunk);
            }

            tracing::debug!(
                token = %token_address,
                from = current,
                to = current_end,
                events = events.len(),
                next_chunk_hint = hit,
                "scanned chunk"
            );

            current = current_end + 1;
            chunk = next_chunk_size(chunk, hit, &self.window);
        }

        // 4. Denormalise every dirty holder account.
        let updated = self.ledger.update_many(dirty_accounts).await?;

        let mut balances = HashMap::with_capacity(touched_last_chunk.len());
        for account in updated {
            let address = Address::from(account.address);
            if touched_last_chunk.contains(&address) {
                balances.insert(address, account.balance);
            }
        }
        Ok(balances)
    }
}

async fn blocking<F, T>(f: F) -> Result<T, ScannerError>
where
    F: FnOnce() -> Result<T, sts_store::StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("store task panicked")
        .map_err(ScannerError::from)
}

/// Resets to `min_chunk` after a hit, grows by `increase_factor` after a
/// miss, clamped to `[min_chunk, max_chunk]`.
fn next_chunk_size(chunk: u64, hit: bool, window: &ScanWindow) -> u64 {
    let next = if hit {
        window.min_chunk
    } else {
        ((chunk as f64) * window.increase_factor) as u64
    };
    next.clamp(window.min_chunk, window.max_chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> ScanWindow {
        ScanWindow { min_chunk: 10, max_chunk: 1_000, increase_factor: 5.0, reorg_depth: 10 }
    }

    #[test]
    fn chunk_resets_to_min_on_hit() {
        assert_eq!(next_chunk_size(500, true, &window()), 10);
    }

    #[test]
    fn chunk_grows_by_increase_factor_on_miss() {
        assert_eq!(next_chunk_size(10, false, &window()), 50);
        assert_eq!(next_chunk_size(50, false, &window()), 250);
    }

    #[test]
    fn chunk_growth_clamps_to_max() {
        assert_eq!(next_chunk_size(500, false, &window()), 1_000);
    }

    #[test]
    fn scan_window_defaults_match_reference_values() {
        let w = ScanWindow::default();
        assert_eq!(w.min_chunk, 10);
        assert_eq!(w.max_chunk, 10_000);
        assert_eq!(w.increase_factor, 5.0);
        assert_eq!(w.reorg_depth, 10);
    }
}
