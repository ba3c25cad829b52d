//! Access levels and the resolved access status of a subject.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A tiered permission level. `0` means "no record found".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccessLevel(u8);

impl AccessLevel {
    /// No record found.
    pub const NONE: Self = Self(0);

    /// The basic verified tier.
    pub const BASIC: Self = Self(1);

    pub fn new(level: u8) -> Self {
        Self(level)
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl From<u8> for AccessLevel {
    fn from(level: u8) -> Self {
        Self(level)
    }
}

/// Which source of truth decided an [`AccessStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusSource {
    /// The access contract reported access (authoritative).
    OnChain,
    /// The level came from an off-chain verification record (hint only).
    OffChainHint,
    /// The level came from the local session cache (hint only).
    LocalCache,
    /// No source had anything to say about this subject.
    None,
}

/// The result of a single access resolution.
///
/// Produced fresh on every resolution and never reused, since on-chain and
/// off-chain state can change between polls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStatus {
    pub has_access: bool,
    pub level: AccessLevel,
    pub source: StatusSource,
}

impl AccessStatus {
    /// Access confirmed by the contract.
    pub fn granted(level: AccessLevel) -> Self {
        Self {
            has_access: true,
            level,
            source: StatusSource::OnChain,
        }
    }

    /// No access; `level` is surfaced as a display hint only.
    pub fn denied(level: AccessLevel, source: StatusSource) -> Self {
        Self {
            has_access: false,
            level,
            source,
        }
    }

    /// No access and no record anywhere.
    pub fn none() -> Self {
        Self::denied(AccessLevel::NONE, StatusSource::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_is_on_chain() {
        let status = AccessStatus::granted(AccessLevel::BASIC);
        assert!(status.has_access);
        assert_eq!(status.source, StatusSource::OnChain);
    }

    #[test]
    fn none_has_zero_level() {
        let status = AccessStatus::none();
        assert!(!status.has_access);
        assert!(status.level.is_none());
    }

    #[test]
    fn level_display() {
        assert_eq!(AccessLevel::new(3).to_string(), "L3");
    }
}
