//! Stored-Transaction Service: the sole path by which this system emits
//! chain-state-changing transactions.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_dyn_abi::DynSolValue;
use alloy_network::{ReceiptResponse, TransactionBuilder};
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;

use sts_chain::{AbiBundle, ChainProvider, GasPolicy, IERC20};
use sts_store::{
    BroadcastAccount, NewPreparedTransaction, PreparedTransaction, Store, TransactionStatus,
};
use sts_types::{ChecksumAddress, Network, UnixTimestamp};

use crate::error::StsError;

/// One row of a batch distribution request.
#[derive(Debug, Clone)]
pub struct DistributionEntry {
    pub external_id: String,
    pub address: Address,
    pub raw_amount: U256,
}

/// Outcome of [`StsService::distribute_many`]: how many entries were newly
/// allocated versus already-distributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributionSummary {
    pub new: u32,
    pub old: u32,
}

/// Owns the signing key (via `provider`), the ABI bundle, and the store
/// connection for one (network, address) broadcast account. Exactly one
/// instance should exist per account at a time (one writer per signing
/// key); nothing here enforces that across processes.
pub struct StsService<S> {
    store: Arc<S>,
    provider: Arc<ChainProvider>,
    abi: Arc<AbiBundle>,
    network: Network,
    gas: GasPolicy,
}

impl<S: Store> StsService<S> {
    pub fn new(
        store: Arc<S>,
        provider: Arc<ChainProvider>,
        abi: Arc<AbiBundle>,
        network: Network,
        gas: GasPolicy,
    ) -> Self {
        Self { store, provider, abi, network, gas }
    }

    async fn account(&self) -> Result<BroadcastAccount, StsError> {
        let store = self.store.clone();
        let network = self.network.clone();
        let address = self.provider.address();
        blocking(move || store.get_or_create_broadcast_account(&network, address)).await
    }

    /// Fails with [`StsError::NonceDesync`] if the chain's reported
    /// transaction count disagrees with the store's `current_nonce`, the
    /// sync check required before allocating a new transaction.
    async fn check_nonce_sync(&self, account: &BroadcastAccount) -> Result<(), StsError> {
        let address = self.provider.address();
        let chain_nonce = self.provider.transaction_count(address).await?;
        if chain_nonce != account.current_nonce {
            return Err(StsError::NonceDesync {
                address,
                chain_nonce,
                store_nonce: account.current_nonce,
            });
        }
        Ok(())
    }

    pub async fn deploy_contract(
        &self,
        contract_name: &str,
        note: impl Into<String>,
        constructor_args: &[DynSolValue],
        gas_limit: Option<u64>,
        gas_price: Option<u128>,
    ) -> Result<PreparedTransaction, StsError> {
        let account = self.account().await?;
        self.check_nonce_sync(&account).await?;
        let input = self.abi.encode_deploy(contract_name, constructor_args)?;
        let nonce = account.current_nonce;
        let contract_address =
            ChainProvider::derive_contract_address(self.provider.address(), nonce);
        let request = self
            .provider
            .build_transaction_request(
                None,
                input,
                nonce,
                gas_limit.unwrap_or(self.gas.deploy_gas_limit),
                gas_price,
            )
            .await?;
        let payload = ChainProvider::encode_payload(&request)?;

        let new_tx = NewPreparedTransaction {
            contract_deployment: true,
            receiver: None,
            contract_address: Some(ChecksumAddress::from(contract_address)),
            unsigned_payload: payload,
            external_id: None,
            note: note.into(),
            other_data: None,
        };
        let store = self.store.clone();
        blocking(move || store.allocate_prepared_transaction(account.id, new_tx)).await
    }

    pub async fn interact_with_contract(
        &self,
        contract_name: &str,
        address: Address,
        note: impl Into<String>,
        func_name: &str,
        args: &[DynSolValue],
        receiver: Option<Address>,
        gas_limit: Option<u64>,
        gas_price: Option<u128>,
    ) -> Result<PreparedTransaction, StsError> {
        let account = self.account().await?;
        self.check_nonce_sync(&account).await?;
        let input = self.abi.encode_call(contract_name, func_name, args)?;
        let request = self
            .provider
            .build_transaction_request(
                Some(address),
                input,
                account.current_nonce,
                gas_limit.unwrap_or(self.gas.interaction_gas_limit),
                gas_price,
            )
            .await?;
        let payload = ChainProvider::encode_payload(&request)?;

        let new_tx = NewPreparedTransaction {
            contract_deployment: false,
            receiver: receiver.map(ChecksumAddress::from),
            contract_address: Some(ChecksumAddress::from(address)),
            unsigned_payload: payload,
            external_id: None,
            note: note.into(),
            other_data: None,
        };
        let store = self.store.clone();
        blocking(move || store.allocate_prepared_transaction(account.id, new_tx)).await
    }

    /// Convenience wrapper over an ERC-20 `transfer`, using the fixed
    /// [`IERC20`] interface rather than the operator-supplied ABI bundle
    /// (the transfer selector is standard, the token's custom ABI is not
    /// needed for it).
    pub async fn distribute_tokens(
        &self,
        external_id: impl Into<String>,
        receiver_address: Address,
        raw_amount: U256,
        token_address: Address,
        note: impl Into<String>,
    ) -> Result<PreparedTransaction, StsError> {
        if raw_amount < U256::from(1) {
            return Err(StsError::InvalidAmount);
        }
        let external_id = external_id.into();

        let store = self.store.clone();
        let eid = external_id.clone();
        let existing = blocking(move || {
            store.find_prepared_transaction_by_external_id(&eid, token_address)
        })
        .await?;
        if existing.is_some() {
            return Err(StsError::AlreadyDistributed {
                external_id,
                contract_address: token_address,
            });
        }

        let account = self.account().await?;
        let call = IERC20::transferCall { to: receiver_address, amount: raw_amount };
        let input = Bytes::from(call.abi_encode());
        let request = self
            .provider
            .build_transaction_request(
                Some(token_address),
                input,
                account.current_nonce,
                self.gas.interaction_gas_limit,
                None,
            )
            .await?;
        let payload = ChainProvider::encode_payload(&request)?;

        let new_tx = NewPreparedTransaction {
            contract_deployment: false,
            receiver: Some(ChecksumAddress::from(receiver_address)),
            contract_address: Some(ChecksumAddress::from(token_address)),
            unsigned_payload: payload,
            external_id: Some(external_id),
            note: note.into(),
            other_data: None,
        };
        let store = self.store.clone();
        blocking(move || store.allocate_prepared_transaction(account.id, new_tx)).await
    }

    /// Batches [`Self::distribute_tokens`] over a CSV-shaped entry list,
    /// counting newly-allocated rows against already-distributed ones
    /// rather than failing the whole batch on the first duplicate.
    pub async fn distribute_many(
        &self,
        token_address: Address,
        entries: &[DistributionEntry],
        note: &str,
    ) -> Result<DistributionSummary, StsError> {
        let mut summary = DistributionSummary::default();
        for entry in entries {
            match self
                .distribute_tokens(
                    entry.external_id.clone(),
                    entry.address,
                    entry.raw_amount,
                    token_address,
                    note.to_string(),
                )
                .await
            {
                Ok(_) => summary.new += 1,
                Err(StsError::AlreadyDistributed { .. }) => summary.old += 1,
                Err(other) => return Err(other),
            }
        }
        Ok(summary)
    }

    pub async fn is_distributed(
        &self,
        external_id: &str,
        contract_address: Address,
    ) -> Result<bool, StsError> {
        let store = self.store.clone();
        let external_id = external_id.to_string();
        let existing = blocking(move || {
            store.find_prepared_transaction_by_external_id(&external_id, contract_address)
        })
        .await?;
        Ok(existing.is_some())
    }

    pub async fn get_pending_broadcasts(&self) -> Result<Vec<PreparedTransaction>, StsError> {
        let account = self.account().await?;
        let store = self.store.clone();
        blocking(move || store.get_pending_broadcasts(account.id)).await
    }

    /// Signs and sends `tx`'s stored unsigned payload. `tx` must belong to
    /// this service's account.
    pub async fn broadcast(
        &self,
        tx: &PreparedTransaction,
    ) -> Result<PreparedTransaction, StsError> {
        let account = self.account().await?;
        if tx.account_id != account.id {
            return Err(StsError::AddressMismatch(tx.id));
        }

        let txid = self.provider.broadcast(&tx.unsigned_payload).await?;
        let broadcasted_at = UnixTimestamp::now();
        let store = self.store.clone();
        let id = tx.id;
        blocking(move || store.mark_broadcasted(id, txid, broadcasted_at)).await?;

        let store = self.store.clone();
        blocking(move || store.get_prepared_transaction(id)).await
    }

    /// Queries the receipt for an already-broadcast transaction. Absence of
    /// a receipt is not an error.
    pub async fn update_status(
        &self,
        tx: &PreparedTransaction,
    ) -> Result<PreparedTransaction, StsError> {
        let Some(txid) = tx.txid else {
            return Ok(tx.clone());
        };
        if let Some(receipt) = self.provider.get_receipt(txid).await? {
            let result_block = receipt.block_number().unwrap_or_default();
            let result_success = receipt.status();
            let fetched_at = UnixTimestamp::now();
            let store = self.store.clone();
            let id = tx.id;
            blocking(move || store.record_status(id, result_block, result_success, fetched_at))
                .await?;
        }
        let store = self.store.clone();
        let id = tx.id;
        blocking(move || store.get_prepared_transaction(id)).await
    }

    /// Marks a successfully-mined contract deployment `verified` after an
    /// external [`crate::SourceVerifier`] confirms its source. Terminal
    /// state: nothing transitions out of `verified`.
    pub async fn mark_verified(
        &self,
        tx: &PreparedTransaction,
        verifier: &dyn crate::SourceVerifier,
    ) -> Result<PreparedTransaction, StsError> {
        if !tx.contract_deployment {
            return Err(StsError::NotAContractDeployment(tx.id));
        }
        if tx.status() != TransactionStatus::Success {
            return Err(StsError::NotYetSuccessful(tx.id));
        }
        verifier.verify(tx).await?;
        let verified_at = UnixTimestamp::now();
        let store = self.store.clone();
        let id = tx.id;
        blocking(move || store.mark_verified(id, verified_at)).await?;
        let store = self.store.clone();
        blocking(move || store.get_prepared_transaction(id)).await
    }

    /// Raises (after logging) a desync between the chain's reported
    /// transaction count and the store's `current_nonce`.
    pub async fn ensure_accounts_in_sync(&self) -> Result<(), StsError> {
        let account = self.account().await?;
        let address = self.provider.address();
        let chain_nonce = self.provider.transaction_count(address).await?;
        if chain_nonce != account.current_nonce {
            tracing::warn!(
                %address,
                chain_nonce,
                store_nonce = account.current_nonce,
                "nonce desync detected"
            );
            return Err(StsError::NonceDesync {
                address,
                chain_nonce,
                store_nonce: account.current_nonce,
            });
        }
        Ok(())
    }

    /// Re-anchors `current_nonce` to the chain's reported transaction count,
    /// rewriting every queued transaction's nonce to a contiguous range,
    /// recomputing the derived contract address of queued deployments, and
    /// patching any queued interaction whose calldata embedded a now-stale
    /// upstream deployment address.
    pub async fn restart_nonce(&self) -> Result<Vec<PreparedTransaction>, StsError> {
        let account = self.account().await?;
        let signer = self.provider.address();
        let chain_nonce = self.provider.transaction_count(signer).await?;

        let store = self.store.clone();
        let rewritten =
            blocking(move || store.restart_nonce(account.id, chain_nonce)).await?;

        let mut address_patch: HashMap<Address, Address> = HashMap::new();
        for tx in &rewritten {
            if tx.contract_deployment {
                if let Some(old) = tx.contract_address {
                    let old = Address::from(old);
                    let new = ChainProvider::derive_contract_address(signer, tx.nonce);
                    if old != new {
                        address_patch.insert(old, new);
                    }
                }
            }
        }

        let mut results = Vec::with_capacity(rewritten.len());
        for tx in rewritten {
            let mut request = ChainProvider::decode_payload(&tx.unsigned_payload)?;
            request = request.with_nonce(tx.nonce);

            let mut contract_address = tx.contract_address;
            if tx.contract_deployment {
                let new_address = ChainProvider::derive_contract_address(signer, tx.nonce);
                contract_address = Some(ChecksumAddress::from(new_address));
            }

            let mut other_data = tx.other_data.clone();
            if !address_patch.is_empty() {
                if let Some(input) = request.input.input().cloned() {
                    let mut data = input;
                    let mut patched_to = Vec::new();
                    for (&old, &new) in &address_patch {
                        let (next, hit) = patch_calldata_address(&data, old, new);
                        data = next;
                        if hit {
                            patched_to.push(new);
                        }
                    }
                    if !patched_to.is_empty() {
                        request = request.with_input(data);
                        other_data = Some(record_patched_addresses(&patched_to));
                    }
                }
            }

            let payload = ChainProvider::encode_payload(&request)?;
            let id = tx.id;
            let store = self.store.clone();
            blocking(move || {
                store.update_prepared_transaction_payload(id, contract_address, payload, other_data)
            })
            .await?;

            let store = self.store.clone();
            results.push(blocking(move || store.get_prepared_transaction(id)).await?);
        }

        Ok(results)
    }

    pub async fn get_raw_token_balance(
        &self,
        token: Address,
        address: Address,
    ) -> Result<U256, StsError> {
        Ok(self.provider.token_balance(token, address).await?)
    }

    pub async fn get_last_transactions(
        &self,
        limit: u32,
    ) -> Result<Vec<PreparedTransaction>, StsError> {
        let account = self.account().await?;
        let store = self.store.clone();
        blocking(move || store.get_last_transactions(account.id, limit)).await
    }

    pub async fn get_unmined_txs(&self) -> Result<Vec<PreparedTransaction>, StsError> {
        let account = self.account().await?;
        let store = self.store.clone();
        blocking(move || store.get_unmined_txs(account.id)).await
    }
}

/// Scans `32`-byte-aligned words of `input` for `old`'s left-padded encoding
/// and rewrites them to `new`'s, the way an ABI-encoded address argument sits
/// in calldata.
fn patch_calldata_address(input: &Bytes, old: Address, new: Address) -> (Bytes, bool) {
    let mut old_word = [0u8; 32];
    old_word[12..].copy_from_slice(old.as_slice());
    let mut new_word = [0u8; 32];
    new_word[12..].copy_from_slice(new.as_slice());

    let mut data = input.to_vec();
    let mut patched = false;
    let mut i = 0;
    while i + 32 <= data.len() {
        if data[i..i + 32] == old_word {
            data[i..i + 32].copy_from_slice(&new_word);
            patched = true;
            i += 32;
        } else {
            i += 1;
        }
    }
    (Bytes::from(data), patched)
}

fn record_patched_addresses(addresses: &[Address]) -> String {
    let list: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
    serde_json::json!({ "extra_data": { "contract_address": list } }).to_string()
}

async fn blocking<F, T>(f: F) -> Result<T, StsError>
where
    F: FnOnce() -> Result<T, sts_store::StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("store task panicked")
        .map_err(StsError::from)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::U256;
    use sts_chain::{AbiBundle, ChainConfig, ChainProvider, EvmPrivateKey, GasPolicy};
    use sts_store::SqliteStore;
    use sts_types::{LiteralOrEnv, Network, RpcConfig};

    use super::*;

    /// An unreachable RPC endpoint works for every path exercised here: with
    /// `eip1559 = true`, [`ChainProvider::build_transaction_request`] never
    /// makes a network call, and `ChainProvider::connect` itself only builds
    /// the layered client lazily.
    async fn setup() -> StsService<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let network = Network::from_str("eip155:1").unwrap();
        let config = ChainConfig {
            network: network.clone(),
            rpc: vec![RpcConfig {
                http: "http://127.0.0.1:9".parse().unwrap(),
                rate_limit: None,
            }],
            signer: LiteralOrEnv::from_literal(
                EvmPrivateKey::from_str(
                    "0x0101010101010101010101010101010101010101010101010101010101010101",
                )
                .unwrap(),
            ),
            eip1559: true,
            receipt_timeout_secs: 30,
            gas: GasPolicy::default(),
        };
        let provider = Arc::new(ChainProvider::connect(&config).await.unwrap());
        let abi = Arc::new(AbiBundle::default());
        StsService::new(store, provider, abi, network, GasPolicy::default())
    }

    #[tokio::test]
    async fn distribute_tokens_rejects_zero_amount() {
        let sts = setup().await;
        let err = sts
            .distribute_tokens("row-1", Address::repeat_byte(1), U256::ZERO, Address::repeat_byte(2), "")
            .await
            .unwrap_err();
        assert!(matches!(err, StsError::InvalidAmount));
    }

    #[tokio::test]
    async fn distribute_tokens_rejects_duplicate_external_id() {
        let sts = setup().await;
        let token = Address::repeat_byte(9);
        sts.distribute_tokens("row-1", Address::repeat_byte(1), U256::from(100u64), token, "")
            .await
            .unwrap();

        let err = sts
            .distribute_tokens("row-1", Address::repeat_byte(1), U256::from(100u64), token, "")
            .await
            .unwrap_err();
        assert!(matches!(err, StsError::AlreadyDistributed { .. }));
    }

    #[tokio::test]
    async fn distribute_many_counts_new_and_already_distributed() {
        let sts = setup().await;
        let token = Address::repeat_byte(9);
        let entries = vec![
            DistributionEntry {
                external_id: "row-1".into(),
                address: Address::repeat_byte(1),
                raw_amount: U256::from(100u64),
            },
            DistributionEntry {
                external_id: "row-2".into(),
                address: Address::repeat_byte(2),
                raw_amount: U256::from(200u64),
            },
        ];

        let first = sts.distribute_many(token, &entries, "batch").await.unwrap();
        assert_eq!(first, DistributionSummary { new: 2, old: 0 });

        let second = sts.distribute_many(token, &entries, "batch").await.unwrap();
        assert_eq!(second, DistributionSummary { new: 0, old: 2 });
    }

    struct AlwaysVerifies;

    #[async_trait::async_trait]
    impl crate::SourceVerifier for AlwaysVerifies {
        async fn verify(
            &self,
            _deployment: &PreparedTransaction,
        ) -> Result<(), crate::error::VerificationError> {
            Ok(())
        }
    }

    fn fake_tx(contract_deployment: bool, status: TransactionStatus) -> PreparedTransaction {
        let now = UnixTimestamp::from_secs(1);
        let (broadcasted_at, result_fetched_at, result_success, verified_at) = match status {
            TransactionStatus::Waiting => (None, None, None, None),
            TransactionStatus::Broadcasted => (Some(now), None, None, None),
            TransactionStatus::Mining => (Some(now), Some(now), None, None),
            TransactionStatus::Success => (Some(now), Some(now), Some(true), None),
            TransactionStatus::Failed => (Some(now), Some(now), Some(false), None),
            TransactionStatus::Verified => (Some(now), Some(now), Some(true), Some(now)),
        };
        PreparedTransaction {
            id: sts_store::PreparedTransactionId(1),
            account_id: sts_store::BroadcastAccountId(1),
            nonce: 0,
            contract_deployment,
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

    #[tokio::test]
    async fn mark_verified_rejects_non_deployment_transaction() {
        let sts = setup().await;
        let tx = fake_tx(false, TransactionStatus::Success);
        let err = sts.mark_verified(&tx, &AlwaysVerifies).await.unwrap_err();
        assert!(matches!(err, StsError::NotAContractDeployment(_)));
    }

    #[tokio::test]
    async fn mark_verified_rejects_transaction_not_yet_successful() {
        let sts = setup().await;
        let tx = fake_tx(true, TransactionStatus::Mining);
        let err = sts.mark_verified(&tx, &AlwaysVerifies).await.unwrap_err();
        assert!(matches!(err, StsError::NotYetSuccessful(_)));
    }

    #[test]
    fn patch_calldata_address_rewrites_every_occurrence() {
        let old = Address::repeat_byte(0xAA);
        let new = Address::repeat_byte(0xBB);
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(old.as_slice());

        let mut input = vec![0u8; 4];
        input.extend_from_slice(&word);
        input.extend_from_slice(&word);
        let input = Bytes::from(input);

        let (patched, hit) = patch_calldata_address(&input, old, new);
        assert!(hit);
        let mut expected_word = [0u8; 32];
        expected_word[12..].copy_from_slice(new.as_slice());
        assert_eq!(&patched[4..36], &expected_word[..]);
        assert_eq!(&patched[36..68], &expected_word[..]);
    }

    #[test]
    fn patch_calldata_address_no_match_leaves_input_untouched() {
        let old = Address::repeat_byte(0xAA);
        let new = Address::repeat_byte(0xBB);
        let input = Bytes::from(vec![1, 2, 3, 4]);
        let (patched, hit) = patch_calldata_address(&input, old, new);
        assert!(!hit);
        assert_eq!(patched, input);
    }

    #[test]
    fn record_patched_addresses_embeds_contract_address_list() {
        let addr = Address::repeat_byte(7);
        let json = record_patched_addresses(&[addr]);
        assert!(json.contains(&addr.to_string()));
        assert!(json.contains("extra_data"));
    }
}
