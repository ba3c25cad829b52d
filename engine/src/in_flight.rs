//! The in-flight registry: at most one outstanding oracle request per subject.
//!
//! The check-and-set happens under one mutex, so two concurrent submissions for
//! the same subject cannot both pass. Different subjects never block each other.
//!
//! A [`Claim`] is released when dropped, which covers every early return and
//! error path of a submission. [`Claim::keep_pending`] hands the entry over to
//! the callback monitor instead. Once the transaction may be on its way,
//! [`Claim::hold_on_drop`] makes an unresolved drop park the entry rather than
//! free the subject.
//!
//! An entry left in [`RequestState::AwaitingCallback`] (nobody polling) for
//! longer than the claim TTL is considered abandoned and may be reclaimed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use timetoken_types::{Subject, TxRef};

use crate::error::EngineError;
use crate::events::{EngineEvent, EventNotifier, RequestState};
use crate::metrics::EngineMetrics;

/// A snapshot of one registry entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InFlightEntry {
    pub state: RequestState,
    /// Set once the transaction is included.
    pub tx: Option<TxRef>,
    /// Session id of the monitor polling for this entry.
    pub monitor: Option<u64>,
    /// When the entry last changed state.
    pub since: Instant,
}

pub struct InFlightRegistry {
    entries: Mutex<HashMap<Subject, InFlightEntry>>,
    claim_ttl: Duration,
    notifier: Arc<EventNotifier>,
    metrics: Arc<EngineMetrics>,
}

impl InFlightRegistry {
    pub fn new(claim_ttl: Duration, notifier: Arc<EventNotifier>, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            claim_ttl,
            notifier,
            metrics,
        }
    }

    /// Atomically claim `subject`, or fail with [`EngineError::AlreadyInProgress`].
    pub fn try_claim(self: &Arc<Self>, subject: &Subject) -> Result<Claim, EngineError> {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(existing) = entries.get(subject) {
                let abandoned = existing.state == RequestState::AwaitingCallback
                    && existing.since.elapsed() >= self.claim_ttl;
                if !abandoned {
                    self.metrics.duplicate_submissions.inc();
                    debug!(%subject, state = %existing.state, "submission rejected, request in flight");
                    return Err(EngineError::AlreadyInProgress(subject.clone()));
                }
                warn!(
                    %subject,
                    tx = ?existing.tx,
                    "reclaiming request abandoned without a callback"
                );
            }
            entries.insert(
                subject.clone(),
                InFlightEntry {
                    state: RequestState::Submitting,
                    tx: None,
                    monitor: None,
                    since: Instant::now(),
                },
            );
            self.metrics.in_flight.set(entries.len() as i64);
        }
        self.changed(subject, RequestState::Submitting);
        Ok(Claim {
            registry: Arc::clone(self),
            subject: subject.clone(),
            armed: true,
            hold: false,
        })
    }

    pub fn get(&self, subject: &Subject) -> Option<InFlightEntry> {
        self.entries.lock().unwrap().get(subject).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monitor `session` took over polling. Returns `false` if nothing is in flight.
    pub fn mark_monitoring(&self, subject: &Subject, session: u64) -> bool {
        self.update(subject, |entry| {
            entry.monitor = Some(session);
            entry.state = RequestState::Monitoring;
        })
    }

    /// Monitor `session` stopped without a terminal outcome; the request stays
    /// in flight. A no-op if another session has taken over since.
    pub fn detach(&self, subject: &Subject, session: u64) -> bool {
        self.update(subject, |entry| {
            if entry.monitor == Some(session) {
                entry.monitor = None;
                entry.state = RequestState::AwaitingCallback;
            }
        })
    }

    /// Clear the entry. Returns whether one was present.
    pub fn release(&self, subject: &Subject) -> bool {
        let removed = {
            let mut entries = self.entries.lock().unwrap();
            let removed = entries.remove(subject).is_some();
            self.metrics.in_flight.set(entries.len() as i64);
            removed
        };
        if removed {
            self.changed(subject, RequestState::Idle);
        }
        removed
    }

    /// Apply `f` to the entry, emitting a state change if it moved.
    fn update(&self, subject: &Subject, f: impl FnOnce(&mut InFlightEntry)) -> bool {
        let moved_to = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(subject) else {
                return false;
            };
            let before = entry.state;
            f(entry);
            if entry.state != before {
                entry.since = Instant::now();
                Some(entry.state)
            } else {
                None
            }
        };
        if let Some(state) = moved_to {
            self.changed(subject, state);
        }
        true
    }

    fn changed(&self, subject: &Subject, state: RequestState) {
        debug!(%subject, %state, "in-flight state changed");
        self.notifier.emit(EngineEvent::StateChanged {
            subject: subject.clone(),
            state,
        });
    }
}

/// Exclusive right to submit for one subject.
pub struct Claim {
    registry: Arc<InFlightRegistry>,
    subject: Subject,
    armed: bool,
    hold: bool,
}

impl Claim {
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// From here on, dropping the claim without [`Claim::release`] or
    /// [`Claim::keep_pending`] leaves the entry awaiting a callback.
    ///
    /// Set before broadcasting: if the submitting task is cancelled mid-send
    /// the request may still reach the chain, and only the claim TTL may free
    /// the subject.
    pub fn hold_on_drop(&mut self) {
        self.hold = true;
    }

    /// Free the subject now.
    pub fn release(mut self) {
        self.armed = false;
        self.registry.release(&self.subject);
    }

    /// Keep the entry after the transaction was sent, awaiting the callback.
    pub fn keep_pending(mut self, tx: TxRef) {
        self.armed = false;
        self.registry.update(&self.subject, |entry| {
            entry.tx = Some(tx);
            entry.state = RequestState::AwaitingCallback;
        });
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.hold {
            warn!(subject = %self.subject, "submission abandoned after broadcast, keeping request in flight");
            self.registry.update(&self.subject, |entry| {
                entry.state = RequestState::AwaitingCallback;
            });
        } else {
            self.registry.release(&self.subject);
        }
    }
}
