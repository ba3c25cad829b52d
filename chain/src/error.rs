use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("RPC endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("RPC request failed: {0}")]
    RequestFailed(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("no contract deployed at {0}")]
    NoContract(String),

    #[error("transaction rejected by wallet: {0}")]
    WalletRejected(String),

    #[error("transaction {0} reverted")]
    Reverted(String),

    #[error("transaction {0} dropped before inclusion")]
    Dropped(String),

    #[error("transaction {tx} not confirmed within {waited_secs}s")]
    ConfirmationTimeout { tx: String, waited_secs: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// EIP-1193 code a wallet returns when the user declines to sign.
    pub const USER_REJECTED_CODE: i64 = 4001;
}
