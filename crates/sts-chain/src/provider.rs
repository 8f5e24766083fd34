//! The EVM chain provider: a chain RPC adapter built on `alloy-provider`.
//!
//! Nonce filling is NOT delegated to an alloy `NonceFiller` — nonces are
//! allocated by the persistent store, so every [`TransactionRequest`] this
//! crate builds already carries an explicit nonce before it reaches the
//! provider.

use std::num::NonZeroUsize;
use std::sync::Arc;

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, WalletFiller,
};
use alloy_provider::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{Filter, Log, TransactionReceipt, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use tower::ServiceBuilder;

use sts_types::RpcConfig;

use crate::abi::IERC20;
use crate::config::{ChainConfig, EvmPrivateKey};
use crate::error::ChainError;

pub type InnerFiller = JoinFill<GasFiller, JoinFill<BlobGasFiller, ChainIdFiller>>;

pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// A single transferred value, decoded off either a `Transfer` or an `Issued`
/// log. `Issued` events carry no `from`; the scanner maps those straight to
/// the null-address mint sentinel.
#[derive(Debug, Clone, Copy)]
pub struct TransferEvent {
    pub block_num: u64,
    pub log_index: u64,
    pub txid: B256,
    pub from: Option<Address>,
    pub to: Address,
    pub value: U256,
}

pub struct ChainProvider {
    inner: InnerProvider,
    address: Address,
    eip1559: bool,
}

impl ChainProvider {
    pub fn rpc_client(rpc: &[RpcConfig]) -> Result<RpcClient, ChainError> {
        let transports = rpc
            .iter()
            .filter(|cfg| matches!(cfg.http.scheme(), "http" | "https"))
            .map(|cfg| {
                let rate_limit = cfg.rate_limit.unwrap_or(u32::MAX);
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit))
                    .service(Http::new(cfg.http.clone()))
            })
            .collect::<Vec<_>>();
        let count = NonZeroUsize::new(transports.len()).ok_or(ChainError::InvalidSigner)?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(count))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    pub async fn connect(config: &ChainConfig) -> Result<Self, ChainError> {
        let private_key: &EvmPrivateKey = &config.signer;
        let key_bytes = B256::from(*private_key.as_bytes());
        let signer = PrivateKeySigner::from_bytes(&key_bytes).map_err(|_| ChainError::InvalidSigner)?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let client = Self::rpc_client(&config.rpc)?;
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(BlobGasFiller::default(), ChainIdFiller::default()),
        );
        let inner: InnerProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client);

        tracing::info!(network = %config.network, %address, "connected chain provider");

        Ok(Self { inner, address, eip1559: config.eip1559 })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        Ok(self.inner.get_transaction_count(address).await?)
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.inner.get_block_number().await?)
    }

    pub async fn block_timestamp(&self, block_num: u64) -> Result<u64, ChainError> {
        let block = self.inner.get_block_by_number(block_num.into()).await?;
        Ok(block.map(|b| b.header.timestamp).unwrap_or_default())
    }

    /// `Address::create(sender, nonce)`: the deterministic CREATE contract
    /// address rule used both by `deploy_contract` and `restart_nonce`'s
    /// re-derivation of queued deployments.
    pub fn derive_contract_address(sender: Address, nonce: u64) -> Address {
        sender.create(nonce)
    }

    /// Builds an (unsigned, from the signer's perspective) transaction request
    /// ready to be persisted as a `PreparedTransaction.unsigned_payload`.
    ///
    /// `gas_price`, when `Some`, is used as-is and no gas price is fetched
    /// from the node even on a legacy (non-EIP-1559) network.
    pub async fn build_transaction_request(
        &self,
        to: Option<Address>,
        input: Bytes,
        nonce: u64,
        gas_limit: u64,
        gas_price: Option<u128>,
    ) -> Result<TransactionRequest, ChainError> {
        use alloy_network::TransactionBuilder;
        let mut txr = TransactionRequest::default()
            .with_from(self.address)
            .with_input(input)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit);
        if let Some(to) = to {
            txr = txr.with_to(to);
        }
        if let Some(gas_price) = gas_price {
            txr = txr.with_gas_price(gas_price);
        } else if !self.eip1559 {
            let gas_price = self.inner.get_gas_price().await?;
            txr = txr.with_gas_price(gas_price);
        }
        Ok(txr)
    }

    pub fn encode_payload(request: &TransactionRequest) -> Result<Vec<u8>, ChainError> {
        Ok(serde_json::to_vec(request)?)
    }

    pub fn decode_payload(bytes: &[u8]) -> Result<TransactionRequest, ChainError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Signs and sends the stored unsigned payload, returning the computed txid.
    pub async fn broadcast(&self, payload: &[u8]) -> Result<B256, ChainError> {
        let request = Self::decode_payload(payload)?;
        let pending = self.inner.send_transaction(request).await?;
        Ok(*pending.tx_hash())
    }

    pub async fn get_receipt(&self, txid: B256) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.inner.get_transaction_receipt(txid).await?)
    }

    /// Raw ERC-20 balance read.
    pub async fn token_balance(&self, token: Address, holder: Address) -> Result<U256, ChainError> {
        let contract = IERC20::new(token, &self.inner);
        Ok(contract.balanceOf(holder).call().await?)
    }

    /// `(name, symbol, decimals, total_supply)` for a TokenScanStatus's metadata cache.
    pub async fn token_metadata(&self, token: Address) -> Result<(String, String, u8, U256), ChainError> {
        let contract = IERC20::new(token, &self.inner);
        let name = contract.name().call().await?;
        let symbol = contract.symbol().call().await?;
        let decimals = contract.decimals().call().await?;
        let total_supply = contract.totalSupply().call().await?;
        Ok((name, symbol, decimals, total_supply))
    }

    /// Fetches every `Transfer` and `Issued` log for `token` within
    /// `[from_block, to_block]`, merged and sorted by `(block_num, log_index)`.
    pub async fn token_events(
        &self,
        token: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, ChainError> {
        let transfer_filter = Filter::new()
            .address(token)
            .event(IERC20::Transfer::SIGNATURE)
            .from_block(from_block)
            .to_block(to_block);
        let issued_filter = Filter::new()
            .address(token)
            .event(IERC20::Issued::SIGNATURE)
            .from_block(from_block)
            .to_block(to_block);

        let transfer_logs: Vec<Log> = self.inner.get_logs(&transfer_filter).await?;
        let issued_logs: Vec<Log> = self.inner.get_logs(&issued_filter).await?;

        let mut events = Vec::with_capacity(transfer_logs.len() + issued_logs.len());
        for log in transfer_logs {
            let (block_num, log_index, txid) = log_position(&log)?;
            let decoded = log
                .log_decode::<IERC20::Transfer>()
                .map_err(|e| ChainError::AbiEncode(e.to_string()))?;
            events.push(TransferEvent {
                block_num,
                log_index,
                txid,
                from: Some(decoded.inner.data.from),
                to: decoded.inner.data.to,
                value: decoded.inner.data.value,
            });
        }
        for log in issued_logs {
            let (block_num, log_index, txid) = log_position(&log)?;
            let decoded = log
                .log_decode::<IERC20::Issued>()
                .map_err(|e| ChainError::AbiEncode(e.to_string()))?;
            events.push(TransferEvent {
                block_num,
                log_index,
                txid,
                from: None,
                to: decoded.inner.data.to,
                value: decoded.inner.data.value,
            });
        }
        events.sort_by_key(|e| (e.block_num, e.log_index));
        Ok(events)
    }
}

fn log_position(log: &Log) -> Result<(u64, u64, B256), ChainError> {
    let block_num = log.block_number.ok_or(ChainError::UnexpectedPendingBlock)?;
    let log_index = log.log_index.ok_or(ChainError::UnexpectedPendingBlock)?;
    let txid = log.transaction_hash.ok_or(ChainError::UnexpectedPendingBlock)?;
    Ok((block_num, log_index, txid))
}

impl std::fmt::Debug for ChainProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainProvider").field("address", &self.address).finish()
    }
}
