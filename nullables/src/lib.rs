//! Nullable infrastructure for deterministic testing.
//!
//! The engine talks to the outside world through two traits:
//! [`AccessContract`](timetoken_chain::AccessContract) and
//! [`VerificationService`](timetoken_verification::VerificationService).
//! This crate provides in-memory implementations that:
//! - Return scripted, deterministic values
//! - Can be controlled programmatically (grant access, fail reads, script receipts)
//! - Count every call so tests can assert on side effects
//! - Never touch the network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod contract;
pub mod verification;

pub use contract::{NullAccessContract, RequestBehavior};
pub use verification::NullVerificationService;
