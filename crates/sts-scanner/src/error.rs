#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error(transparent)]
    Store(#[from] sts_store::StoreError),

    #[error(transparent)]
    Chain(#[from] sts_chain::ChainError),

    #[error(transparent)]
    Ledger(#[from] sts_ledger::LedgerError),
}
