//! Access-credential contract bindings and Ethereum JSON-RPC client.
//!
//! The access contract gates the Time Tokenizer behind a soulbound credential:
//! - `hasAccess(address)` / `level(address)` are cheap authoritative reads
//! - `requestVerification(...)` triggers a Chainlink Functions request to the DON
//! - the DON's callback mints the credential, emitting `Minted(recipient, tokenId, level)`,
//!   usually in a later transaction sent by the oracle network itself
//!
//! The [`AccessContract`] trait is the seam the engine depends on. [`RpcAccessContract`]
//! implements it over plain JSON-RPC, delegating signing to the wallet endpoint.

pub mod abi;
pub mod contract;
pub mod error;
pub mod receipt;
pub mod rpc;

pub use contract::{RpcAccessContract, RpcContractConfig};
pub use error::ChainError;
pub use receipt::{find_completion, Completion, CompletionSource, LogEntry, TxReceipt};
pub use rpc::JsonRpcClient;

use async_trait::async_trait;
use timetoken_types::{AccessLevel, Subject};

/// Opaque oracle parameters passed through to `requestVerification`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OracleRequestParams {
    /// DON-hosted secrets slot.
    pub secrets_slot: u8,
    /// DON-hosted secrets version.
    pub secrets_version: u64,
    /// Functions billing subscription.
    pub subscription_id: u64,
}

/// The on-chain access contract as seen by the engine.
#[async_trait]
pub trait AccessContract: Send + Sync {
    /// Address of the deployed contract.
    fn address(&self) -> &Subject;

    /// Whether `subject` currently holds the access credential.
    async fn has_access(&self, subject: &Subject) -> Result<bool, ChainError>;

    /// The credential level held by `subject` (0 if none).
    async fn level(&self, subject: &Subject) -> Result<AccessLevel, ChainError>;

    /// Send the oracle-triggering transaction and wait for one confirmation.
    async fn request_verification(
        &self,
        subject: &Subject,
        params: &OracleRequestParams,
    ) -> Result<TxReceipt, ChainError>;
}
