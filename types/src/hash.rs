//! Transaction references and token identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;

/// A 32-byte transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef([u8; 32]);

impl TxRef {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a `0x`-prefixed 32-byte hex hash.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        let digits = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes =
            hex::decode(digits).map_err(|e| TypesError::InvalidTxRef(format!("{raw}: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TypesError::InvalidTxRef(format!("{raw}: expected 32 bytes")))?;
        Ok(Self(array))
    }
}

impl fmt::Debug for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxRef(0x{})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for TxRef {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identifier of a minted credential token, kept as its decimal string so
/// that full `uint256` ids survive without a big-integer dependency here.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(String);

impl TokenId {
    pub fn new(decimal: impl Into<String>) -> Self {
        Self(decimal.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
