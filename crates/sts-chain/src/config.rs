//! Chain configuration for the chain RPC adapter.

use std::fmt::{self, Formatter};
use std::str::FromStr;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use sts_types::{LiteralOrEnv, Network, RpcConfig};

/// A validated 32-byte EVM private key, literal or `$VAR`/`${VAR}` env reference.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }
}

impl fmt::Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("EvmPrivateKey(..)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s).map(Self).map_err(|e| e.to_string())
    }
}

/// Per-network gas ceilings: one hand-tuned constant for deployments, a
/// smaller one for ordinary interactions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasPolicy {
    #[serde(default = "gas_policy_defaults::deploy_gas_limit")]
    pub deploy_gas_limit: u64,
    #[serde(default = "gas_policy_defaults::interaction_gas_limit")]
    pub interaction_gas_limit: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            deploy_gas_limit: gas_policy_defaults::deploy_gas_limit(),
            interaction_gas_limit: gas_policy_defaults::interaction_gas_limit(),
        }
    }
}

mod gas_policy_defaults {
    pub fn deploy_gas_limit() -> u64 {
        4_500_000
    }
    pub fn interaction_gas_limit() -> u64 {
        250_000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub network: Network,
    pub rpc: Vec<RpcConfig>,
    pub signer: LiteralOrEnv<EvmPrivateKey>,
    #[serde(default = "chain_config_defaults::eip1559")]
    pub eip1559: bool,
    #[serde(default = "chain_config_defaults::receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default)]
    pub gas: GasPolicy,
}

mod chain_config_defaults {
    pub fn eip1559() -> bool {
        true
    }
    pub fn receipt_timeout_secs() -> u64 {
        30
    }
}
