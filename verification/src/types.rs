//! Verification record types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Review status of a KYC record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    /// Any status string this client does not know.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A record from the off-chain verification database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Address as stored by the service (any casing).
    pub address: String,
    /// Explicit verified flag.
    pub verified: bool,
    pub status: RecordStatus,
    /// Tier the reviewer assigned, 0 if none yet.
    #[serde(default)]
    pub level: u8,
}

impl VerificationRecord {
    /// Verified only when the flag is set and the status is approved.
    pub fn is_verified(&self) -> bool {
        self.verified && self.status == RecordStatus::Approved
    }
}
