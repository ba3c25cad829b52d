//! Transaction receipts and completion-event detection.
//!
//! After `requestVerification` is included, its logs decide whether the
//! credential was minted in the same transaction (fast path) or whether the
//! DON callback is still outstanding.

use alloy_primitives::{Address, B256};
use alloy_sol_types::SolEvent;
use timetoken_types::{AccessLevel, Subject, TokenId, TxRef};
use tracing::{debug, warn};

use crate::abi::{to_subject, IAccessCredential};

/// A single event log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Subject,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

/// An included transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx: TxRef,
    pub block_number: u64,
    /// `false` if the transaction reverted.
    pub success: bool,
    pub logs: Vec<LogEntry>,
}

impl TxReceipt {
    /// The Chainlink request id, if the FunctionsClient logged one.
    pub fn request_id(&self) -> Option<B256> {
        self.logs.iter().find_map(|log| {
            match IAccessCredential::RequestSent::decode_raw_log(
                log.topics.iter().copied(),
                &log.data,
                true,
            ) {
                Ok(event) => Some(event.id),
                Err(_) => None,
            }
        })
    }
}

/// Which event revealed the mint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionSource {
    /// The contract's own `Minted` event, matched by topic hash.
    Minted,
    /// A generic ERC-721 transfer from the zero address. Lower confidence:
    /// any contract in the transaction could emit one.
    TransferFromZero,
}

/// A mint to the subject found in a receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub source: CompletionSource,
    pub token_id: TokenId,
    /// Known only for [`CompletionSource::Minted`].
    pub level: Option<AccessLevel>,
}

/// Look for a mint to `subject` in `receipt`.
///
/// `Minted` logs from `contract` are decoded first. Only if none names the
/// subject is the `Transfer(0x0 -> subject)` fallback consulted, with a warning.
pub fn find_completion(
    receipt: &TxReceipt,
    contract: &Subject,
    subject: &Subject,
) -> Option<Completion> {
    let from_contract = || receipt.logs.iter().filter(|log| &log.address == contract);

    for log in from_contract() {
        let Ok(event) =
            IAccessCredential::Minted::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        else {
            continue;
        };
        if &to_subject(&event.recipient) == subject {
            debug!(%subject, token = %event.tokenId, level = event.level, "Minted event in receipt");
            return Some(Completion {
                source: CompletionSource::Minted,
                token_id: TokenId::new(event.tokenId.to_string()),
                level: Some(AccessLevel::new(event.level)),
            });
        }
    }

    for log in from_contract() {
        // ERC-20 Transfer shares the topic hash but has only 3 topics.
        if log.topics.len() != 4 {
            continue;
        }
        let Ok(event) =
            IAccessCredential::Transfer::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        else {
            continue;
        };
        if event.from == Address::ZERO && &to_subject(&event.to) == subject {
            warn!(
                %subject,
                tx = %receipt.tx,
                "no Minted event; falling back to Transfer-from-zero (lower confidence)"
            );
            return Some(Completion {
                source: CompletionSource::TransferFromZero,
                token_id: TokenId::new(event.tokenId.to_string()),
                level: None,
            });
        }
    }

    None
}
