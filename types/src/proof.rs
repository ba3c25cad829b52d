//! References to the evidence behind a granted access decision.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::{TokenId, TxRef};
use crate::subject::Subject;

/// What backs an access grant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofRef {
    /// The access contract at `contract` reported access for the subject.
    Contract { contract: Subject },
    /// A mint event was observed in transaction `tx`.
    Mint { tx: TxRef, token_id: Option<TokenId> },
}

impl fmt::Display for ProofRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contract { contract } => write!(f, "contract {contract}"),
            Self::Mint {
                tx,
                token_id: Some(id),
            } => write!(f, "mint {id} in {tx}"),
            Self::Mint { tx, token_id: None } => write!(f, "mint in {tx}"),
        }
    }
}
