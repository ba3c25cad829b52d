//! Subject type: the chain address whose access is being resolved.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;

/// A subject address, `0x` followed by 40 hex digits.
///
/// Stored lowercased so that equality and hashing ignore EIP-55 checksum
/// casing: `0xABC…` and `0xabc…` are the same subject.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    /// The standard prefix for all chain addresses.
    pub const PREFIX: &'static str = "0x";

    /// Number of hex digits after the prefix.
    pub const HEX_LEN: usize = 40;

    /// Parse and normalise a subject address.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix(Self::PREFIX)
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| TypesError::InvalidSubject(format!("missing 0x prefix: {raw:?}")))?;

        if digits.len() != Self::HEX_LEN {
            return Err(TypesError::InvalidSubject(format!(
                "expected {} hex digits, got {}: {raw:?}",
                Self::HEX_LEN,
                digits.len()
            )));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TypesError::InvalidSubject(format!(
                "non-hex characters: {raw:?}"
            )));
        }

        Ok(Self(format!("{}{}", Self::PREFIX, digits.to_ascii_lowercase())))
    }

    /// Return the normalised (lowercase) address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 20 raw address bytes.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Validated at construction, decoding cannot fail.
        if let Ok(decoded) = hex::decode(&self.0[Self::PREFIX.len()..]) {
            out.copy_from_slice(&decoded);
        }
        out
    }

    /// Build a subject from raw address bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("{}{}", Self::PREFIX, hex::encode(bytes)))
    }

    /// Case-insensitive comparison against an unparsed address string.
    pub fn matches(&self, raw: &str) -> bool {
        raw.trim().eq_ignore_ascii_case(&self.0)
    }

    /// Shortened form for log lines and display (`0x1234…abcd`).
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Subject {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Subject {
    type Error = TypesError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.0
    }
}
