//! The result of one verification request.

use std::fmt;

use timetoken_types::{AccessLevel, ProofRef, TxRef};

use crate::error::EngineError;

/// Outcome of a submission or of a monitoring session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The subject holds the credential.
    Granted { level: AccessLevel, proof: ProofRef },
    /// The oracle request was included on-chain.
    ///
    /// `pending` is `false` when the receipt already showed the mint, in which
    /// case `immediate_level` carries the minted level.
    Submitted {
        tx: TxRef,
        pending: bool,
        immediate_level: Option<AccessLevel>,
    },
    /// The attempt ended without access.
    Failed { reason: EngineError },
}

impl RequestOutcome {
    /// Whether nothing further will happen for this attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted { pending: true, .. })
    }

    /// Whether the subject ended up with access.
    pub fn has_access(&self) -> bool {
        matches!(
            self,
            Self::Granted { .. } | Self::Submitted { pending: false, .. }
        )
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted { level, proof } => write!(f, "granted {level} ({proof})"),
            Self::Submitted {
                tx,
                pending: true,
                ..
            } => write!(f, "submitted {tx}, awaiting oracle callback"),
            Self::Submitted {
                tx,
                immediate_level,
                ..
            } => match immediate_level {
                Some(level) => write!(f, "submitted {tx}, minted {level}"),
                None => write!(f, "submitted {tx}, minted"),
            },
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
