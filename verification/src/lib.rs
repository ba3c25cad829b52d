//! Off-chain KYC verification service.
//!
//! The verification database is the secondary source of truth: cheaper than an
//! RPC read but not authoritative. A record only counts as verified when its
//! `verified` flag is set AND its status is `approved`; anything else, including
//! a record that is merely present, is "not verified".
//!
//! - [`VerificationService`] is the seam the engine depends on
//! - [`HttpVerificationService`] queries `GET {base}/records/{address}`

pub mod client;
pub mod error;
pub mod types;

pub use client::HttpVerificationService;
pub use error::VerificationServiceError;
pub use types::{RecordStatus, VerificationRecord};

use async_trait::async_trait;
use timetoken_types::Subject;

/// Read-only access to the off-chain verification records.
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Look up the record for `subject`, matching the address case-insensitively.
    ///
    /// `Ok(None)` means the service answered and has no record.
    async fn lookup(
        &self,
        subject: &Subject,
    ) -> Result<Option<VerificationRecord>, VerificationServiceError>;
}
