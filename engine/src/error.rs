//! Error taxonomy of the reconciliation engine.
//!
//! Every variant maps to one [`ErrorKind`] so that consumers can render a
//! distinct message per kind ("you rejected the signature" vs "the network is
//! congested" vs "this will complete soon, check back").

use std::fmt;
use thiserror::Error;

use timetoken_chain::ChainError;
use timetoken_types::{Subject, TxRef};
use timetoken_verification::{RecordStatus, VerificationServiceError};

/// Why the off-chain precondition was not met.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotVerifiedReason {
    /// The verification service has no record for the subject.
    NoRecord,
    /// A record exists but is not in approved status.
    NotApproved(RecordStatus),
    /// The record is approved but its verified flag is unset.
    FlagUnset,
    /// The service could not be reached; verification cannot be confirmed.
    ServiceUnavailable(String),
}

impl fmt::Display for NotVerifiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecord => f.write_str("no verification record"),
            Self::NotApproved(status) => write!(f, "record status is {status}"),
            Self::FlagUnset => f.write_str("record is not flagged verified"),
            Self::ServiceUnavailable(detail) => {
                write!(f, "verification service unavailable: {detail}")
            }
        }
    }
}

/// What went wrong with the oracle-triggering transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFailureCause {
    /// The subject's wallet declined to sign.
    WalletRejected,
    /// The transaction was included and reverted.
    Reverted,
    /// The transaction disappeared before inclusion.
    Dropped,
    /// No confirmation within the configured bound; it may still land.
    ConfirmationTimeout,
    /// The node returned an error for the submission.
    Rpc,
}

impl fmt::Display for TxFailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WalletRejected => "wallet rejected",
            Self::Reverted => "reverted",
            Self::Dropped => "dropped",
            Self::ConfirmationTimeout => "confirmation timeout",
            Self::Rpc => "rpc error",
        };
        f.write_str(s)
    }
}

/// Discriminant of [`EngineError`], carried on error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidSubject,
    ContractUnavailable,
    NotVerified,
    AlreadyInProgress,
    TransactionFailed,
    Timeout,
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    #[error("access contract unavailable: {0}")]
    ContractUnavailable(String),

    #[error("not verified: {0}")]
    NotVerified(NotVerifiedReason),

    #[error("a verification request for {0} is already in flight")]
    AlreadyInProgress(Subject),

    #[error("transaction failed ({cause}): {detail}")]
    TransactionFailed {
        cause: TxFailureCause,
        detail: String,
        /// Set when the transaction was broadcast before failing.
        tx: Option<TxRef>,
    },

    #[error("oracle callback not observed after {attempts} polls")]
    Timeout { attempts: u32 },

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSubject(_) => ErrorKind::InvalidSubject,
            Self::ContractUnavailable(_) => ErrorKind::ContractUnavailable,
            Self::NotVerified(_) => ErrorKind::NotVerified,
            Self::AlreadyInProgress(_) => ErrorKind::AlreadyInProgress,
            Self::TransactionFailed { .. } => ErrorKind::TransactionFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// The broadcast transaction that may still land despite this error.
    ///
    /// Reverted and dropped transactions are final and yield `None`, as do
    /// failures before anything was broadcast.
    pub fn live_tx(&self) -> Option<TxRef> {
        match self {
            Self::TransactionFailed {
                cause: TxFailureCause::Reverted | TxFailureCause::Dropped,
                ..
            } => None,
            Self::TransactionFailed { tx, .. } => *tx,
            _ => None,
        }
    }

    /// A failed read against the access contract. Any read failure means the
    /// contract cannot be trusted for this attempt.
    pub fn from_read(err: ChainError) -> Self {
        Self::ContractUnavailable(err.to_string())
    }

    /// A failure while sending or confirming the oracle request.
    pub fn from_submission(err: ChainError) -> Self {
        let detail = err.to_string();
        match err {
            ChainError::Unreachable(_) | ChainError::RequestFailed(_) | ChainError::NoContract(_) => {
                Self::ContractUnavailable(detail)
            }
            ChainError::WalletRejected(_) => Self::TransactionFailed {
                cause: TxFailureCause::WalletRejected,
                detail,
                tx: None,
            },
            ChainError::Reverted(tx) => Self::TransactionFailed {
                cause: TxFailureCause::Reverted,
                detail,
                tx: TxRef::parse(&tx).ok(),
            },
            ChainError::Dropped(tx) => Self::TransactionFailed {
                cause: TxFailureCause::Dropped,
                detail,
                tx: TxRef::parse(&tx).ok(),
            },
            ChainError::ConfirmationTimeout { tx, .. } => Self::TransactionFailed {
                cause: TxFailureCause::ConfirmationTimeout,
                detail,
                tx: TxRef::parse(&tx).ok(),
            },
            ChainError::Rpc { .. } | ChainError::InvalidResponse(_) => Self::TransactionFailed {
                cause: TxFailureCause::Rpc,
                detail,
                tx: None,
            },
        }
    }
}

impl From<ChainError> for EngineError {
    fn from(err: ChainError) -> Self {
        Self::from_submission(err)
    }
}

impl From<VerificationServiceError> for EngineError {
    fn from(err: VerificationServiceError) -> Self {
        Self::NotVerified(NotVerifiedReason::ServiceUnavailable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_errors_keep_their_cause() {
        let rejected = EngineError::from_submission(ChainError::WalletRejected("no".into()));
        assert!(matches!(
            rejected,
            EngineError::TransactionFailed {
                cause: TxFailureCause::WalletRejected,
                ..
            }
        ));

        let unreachable = EngineError::from_submission(ChainError::Unreachable("down".into()));
        assert_eq!(unreachable.kind(), ErrorKind::ContractUnavailable);
    }

    #[test]
    fn confirmation_timeout_keeps_tx() {
        let tx = TxRef::new([9u8; 32]);
        let err = EngineError::from_submission(ChainError::ConfirmationTimeout {
            tx: tx.to_string(),
            waited_secs: 120,
        });
        match err {
            EngineError::TransactionFailed {
                cause: TxFailureCause::ConfirmationTimeout,
                tx: Some(found),
                ..
            } => assert_eq!(found, tx),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn only_unsettled_transactions_are_live() {
        let tx = TxRef::new([9u8; 32]);
        let timed_out = EngineError::from_submission(ChainError::ConfirmationTimeout {
            tx: tx.to_string(),
            waited_secs: 120,
        });
        assert_eq!(timed_out.live_tx(), Some(tx));

        let reverted = EngineError::from_submission(ChainError::Reverted(tx.to_string()));
        assert_eq!(reverted.live_tx(), None);
        let dropped = EngineError::from_submission(ChainError::Dropped(tx.to_string()));
        assert_eq!(dropped.live_tx(), None);
        let rejected = EngineError::from_submission(ChainError::WalletRejected("no".into()));
        assert_eq!(rejected.live_tx(), None);
    }

    #[test]
    fn timeout_is_not_transaction_failure() {
        let err = EngineError::Timeout { attempts: 30 };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_ne!(err.kind(), ErrorKind::TransactionFailed);
    }

    #[test]
    fn read_failures_are_contract_unavailable() {
        let err = EngineError::from_read(ChainError::NoContract("0x11".into()));
        assert_eq!(err.kind(), ErrorKind::ContractUnavailable);
    }
}
