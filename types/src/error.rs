//! Errors raised while parsing the shared types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    #[error("invalid subject address: {0}")]
    InvalidSubject(String),

    #[error("invalid transaction reference: {0}")]
    InvalidTxRef(String),
}
