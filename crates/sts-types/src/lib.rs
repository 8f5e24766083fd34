//! Shared value types for the stored-transaction / scanner / ledger core.
//!
//! This crate has no knowledge of RPC, storage, or scanning; it only holds the
//! vocabulary everyone else agrees on — addresses, uint256 magnitudes, the
//! network identifier, timestamps, and the `$VAR`-resolving config wrapper.

pub mod address;
pub mod amount;
pub mod config;
pub mod network;
pub mod timestamp;

pub use address::ChecksumAddress;
pub use amount::{Sign, SignedU256};
pub use config::{LiteralOrEnv, RpcConfig};
pub use network::Network;
pub use timestamp::UnixTimestamp;
