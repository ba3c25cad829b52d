//! Nullable access contract: scripted on-chain state and receipts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use timetoken_chain::abi::{minted_log, request_sent_log, transfer_mint_log};
use timetoken_chain::{AccessContract, ChainError, OracleRequestParams, TxReceipt};
use timetoken_types::{AccessLevel, Subject, TxRef};

/// What happens when `requestVerification` is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestBehavior {
    /// The credential is minted in the same transaction; `Minted` is logged.
    MintImmediately { level: AccessLevel },
    /// Minted in the same transaction, but only an ERC-721 `Transfer` is logged.
    MintWithTransferOnly { level: AccessLevel },
    /// The DON callback lands later: the `polls`-th `hasAccess` read after the
    /// request returns `true`.
    MintAfterPolls { polls: u32, level: AccessLevel },
    /// The request is included but the callback never lands.
    NeverMint,
    /// The transaction is included and reverts.
    Revert,
    /// The transaction is sent but no receipt shows up in time.
    Unconfirmed,
    /// The wallet declines to sign.
    WalletRejects,
}

struct State {
    granted: HashMap<Subject, AccessLevel>,
    scheduled: HashMap<Subject, (u32, AccessLevel)>,
    behavior: RequestBehavior,
    unavailable: bool,
    failing_reads: u32,
    request_delay: Option<Duration>,
    has_access_calls: u32,
    request_calls: Vec<Subject>,
    last_params: Option<OracleRequestParams>,
    next_token: u64,
}

/// An in-memory access contract for testing.
/// Thread-safe for use with tokio's multi-threaded runtime.
pub struct NullAccessContract {
    address: Subject,
    state: Mutex<State>,
}

impl NullAccessContract {
    pub fn new(address: Subject) -> Self {
        Self {
            address,
            state: Mutex::new(State {
                granted: HashMap::new(),
                scheduled: HashMap::new(),
                behavior: RequestBehavior::NeverMint,
                unavailable: false,
                failing_reads: 0,
                request_delay: None,
                has_access_calls: 0,
                request_calls: Vec::new(),
                last_params: None,
                next_token: 1,
            }),
        }
    }

    /// Give `subject` the credential directly.
    pub fn grant(&self, subject: &Subject, level: AccessLevel) {
        self.state
            .lock()
            .unwrap()
            .granted
            .insert(subject.clone(), level);
    }

    /// Choose what the next requests do.
    pub fn on_request(&self, behavior: RequestBehavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    /// Make every call fail as if no contract were deployed.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Fail the next `n` `hasAccess` reads with a transient RPC error.
    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().unwrap().failing_reads = n;
    }

    /// Hold `requestVerification` for `delay` before returning the receipt.
    pub fn set_request_delay(&self, delay: Duration) {
        self.state.lock().unwrap().request_delay = Some(delay);
    }

    /// Number of `hasAccess` reads so far.
    pub fn has_access_calls(&self) -> u32 {
        self.state.lock().unwrap().has_access_calls
    }

    /// Number of `requestVerification` transactions sent so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().request_calls.len()
    }

    /// Subjects that had a transaction sent, in order.
    pub fn requested_subjects(&self) -> Vec<Subject> {
        self.state.lock().unwrap().request_calls.clone()
    }

    /// Oracle parameters of the last request.
    pub fn last_params(&self) -> Option<OracleRequestParams> {
        self.state.lock().unwrap().last_params
    }

    fn unavailable_error(&self) -> ChainError {
        ChainError::NoContract(self.address.to_string())
    }

    fn receipt(&self, state: &mut State, subject: &Subject) -> Result<TxReceipt, ChainError> {
        let n = state.request_calls.len() as u8;
        let tx = TxRef::new([n; 32]);
        let mut logs = vec![request_sent_log(&self.address, [n; 32])];

        match state.behavior {
            RequestBehavior::MintImmediately { level } => {
                let token = state.next_token;
                state.next_token += 1;
                state.granted.insert(subject.clone(), level);
                logs.push(minted_log(&self.address, subject, token, level));
            }
            RequestBehavior::MintWithTransferOnly { level } => {
                let token = state.next_token;
                state.next_token += 1;
                state.granted.insert(subject.clone(), level);
                logs.push(transfer_mint_log(&self.address, subject, token));
            }
            RequestBehavior::MintAfterPolls { polls, level } => {
                state.scheduled.insert(subject.clone(), (polls, level));
            }
            RequestBehavior::NeverMint => {}
            RequestBehavior::Revert => return Err(ChainError::Reverted(tx.to_string())),
            RequestBehavior::Unconfirmed => {
                return Err(ChainError::ConfirmationTimeout {
                    tx: tx.to_string(),
                    waited_secs: 120,
                })
            }
            RequestBehavior::WalletRejects => {
                return Err(ChainError::WalletRejected("User rejected the request.".into()))
            }
        }

        Ok(TxReceipt {
            tx,
            block_number: 100 + n as u64,
            success: true,
            logs,
        })
    }
}

#[async_trait]
impl AccessContract for NullAccessContract {
    fn address(&self) -> &Subject {
        &self.address
    }

    async fn has_access(&self, subject: &Subject) -> Result<bool, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.has_access_calls += 1;
        if state.unavailable {
            return Err(self.unavailable_error());
        }
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(ChainError::Unreachable("connection reset".into()));
        }

        let landed = match state.scheduled.get_mut(subject) {
            Some((remaining, level)) => {
                *remaining = remaining.saturating_sub(1);
                (*remaining == 0).then_some(*level)
            }
            None => None,
        };
        if let Some(level) = landed {
            state.scheduled.remove(subject);
            state.granted.insert(subject.clone(), level);
        }

        Ok(state.granted.contains_key(subject))
    }

    async fn level(&self, subject: &Subject) -> Result<AccessLevel, ChainError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(self.unavailable_error());
        }
        Ok(state.granted.get(subject).copied().unwrap_or(AccessLevel::NONE))
    }

    async fn request_verification(
        &self,
        subject: &Subject,
        params: &OracleRequestParams,
    ) -> Result<TxReceipt, ChainError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            if state.unavailable {
                return Err(self.unavailable_error());
            }
            if state.behavior == RequestBehavior::WalletRejects {
                return Err(ChainError::WalletRejected("User rejected the request.".into()));
            }
            state.request_calls.push(subject.clone());
            state.last_params = Some(*params);
            state.request_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        self.receipt(&mut state, subject)
    }
}
