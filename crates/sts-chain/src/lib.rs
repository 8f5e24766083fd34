//! EVM chain adapter: provider/signing, ABI bundle, contract-address derivation.

pub mod abi;
pub mod config;
pub mod error;
pub mod provider;

pub use abi::{AbiBundle, ContractArtifact, IERC20};
pub use config::{ChainConfig, EvmPrivateKey, GasPolicy};
pub use error::ChainError;
pub use provider::{ChainProvider, TransferEvent};
