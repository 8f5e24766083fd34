//! Source-verification collaborator seam for the `success -> verified` transition.
//!
//! No implementation ships against a live EtherScan-style endpoint; that
//! collaborator is out of scope. This trait gives the transition a concrete
//! seam a caller can wire a real verifier into.

use async_trait::async_trait;
use sts_store::PreparedTransaction;

use crate::error::VerificationError;

#[async_trait]
pub trait SourceVerifier: Send + Sync {
    /// Confirms off-chain that `deployment`'s contract source has been
    /// accepted by a verification service. Non-fatal to the pipeline: only
    /// the `verified` terminal state is affected.
    async fn verify(&self, deployment: &PreparedTransaction) -> Result<(), VerificationError>;
}
