//! Stored-Transaction Service: nonce allocation, signing, broadcast and
//! lifecycle tracking for the system's sole signing account.

pub mod error;
pub mod service;
pub mod verify;

pub use error::{StsError, VerificationError};
pub use service::{DistributionEntry, DistributionSummary, StsService};
pub use verify::SourceVerifier;
