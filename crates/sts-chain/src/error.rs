#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(#[from] alloy_transport::TransportError),

    #[error("pending transaction error: {0}")]
    PendingTransaction(#[from] alloy_provider::PendingTransactionError),

    #[error("no configured signer could be parsed as a private key")]
    InvalidSigner,

    #[error("contract {0:?} not found in the ABI bundle")]
    InvalidContract(String),

    #[error("function {func:?} not found on contract {contract:?}")]
    InvalidFunction { contract: String, func: String },

    #[error("contract has no bytecode, cannot be deployed")]
    MissingBytecode(String),

    #[error("abi encode error: {0}")]
    AbiEncode(String),

    #[error("failed to decode stored unsigned payload: {0}")]
    PayloadDecode(#[from] serde_json::Error),

    #[error("io error loading abi bundle: {0}")]
    Io(#[from] std::io::Error),

    #[error("log has no block number, log index or transaction hash yet (pending block)")]
    UnexpectedPendingBlock,
}
