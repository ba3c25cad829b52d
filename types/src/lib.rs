//! Fundamental types for the Time Tokenizer access engine.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! subjects (chain addresses), access levels and statuses, transaction references,
//! and the proof references that back an access decision.

pub mod access;
pub mod error;
pub mod hash;
pub mod proof;
pub mod subject;

pub use access::{AccessLevel, AccessStatus, StatusSource};
pub use error::TypesError;
pub use hash::{TokenId, TxRef};
pub use proof::ProofRef;
pub use subject::Subject;
