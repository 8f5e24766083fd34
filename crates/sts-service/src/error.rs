use alloy_primitives::Address;
use sts_store::PreparedTransactionId;

#[derive(Debug, thiserror::Error)]
pub enum StsError {
    #[error(transparent)]
    Store(#[from] sts_store::StoreError),

    #[error(transparent)]
    Chain(#[from] sts_chain::ChainError),

    #[error("transaction for external_id {external_id:?} and contract {contract_address} already distributed")]
    AlreadyDistributed {
        external_id: String,
        contract_address: Address,
    },

    #[error("raw_amount must be >= 1")]
    InvalidAmount,

    #[error("nonce out of sync: chain reports {chain_nonce} transactions for {address}, store has {store_nonce}")]
    NonceDesync {
        address: Address,
        chain_nonce: u64,
        store_nonce: u64,
    },

    #[error("transaction {0:?} does not belong to this service's account")]
    AddressMismatch(PreparedTransactionId),

    #[error("transaction {0:?} is not a contract deployment, cannot be verified")]
    NotAContractDeployment(PreparedTransactionId),

    #[error("transaction {0:?} has not reached the success status yet")]
    NotYetSuccessful(PreparedTransactionId),

    #[error(transparent)]
    Verification(#[from] VerificationError),
}

/// Error kinds from the out-of-scope source-verification collaborator.
/// Non-fatal to the pipeline: only the `success -> verified` transition
/// is affected.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("could not verify contract source for {0}")]
    CouldNotVerify(Address),

    #[error("deployment {0} not found by the verification collaborator")]
    DeploymentNotFound(Address),

    #[error("verification collaborator requires an API key")]
    NeedAPIKey,

    #[error("verification poll timed out")]
    Timeout,
}
