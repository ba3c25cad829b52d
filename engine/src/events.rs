//! Lifecycle events and their fan-out to the UI layer.
//!
//! Two ways to listen:
//! - [`EventNotifier::set_callbacks`] installs a [`CallbackBag`], one optional
//!   handler per event, replacing whatever bag was there before.
//! - [`EventNotifier::subscribe`] / [`EventNotifier::subscribe_to`] add a
//!   listener and return a [`Subscription`] that detaches it when dropped.
//!
//! Handlers run inline on the emitting task, in emission order. Events with no
//! listener are dropped, nothing is buffered.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use timetoken_types::{AccessLevel, ProofRef, Subject, TxRef};

use crate::error::{EngineError, ErrorKind};

/// Where a subject stands in the request lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// No request in flight.
    Idle,
    /// Claimed; checks and the transaction are in progress.
    Submitting,
    /// Transaction included, oracle callback outstanding, nobody polling.
    AwaitingCallback,
    /// Transaction included and a monitor is polling for the callback.
    Monitoring,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::AwaitingCallback => "awaiting-callback",
            Self::Monitoring => "monitoring",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A submission passed the in-flight guard.
    Start { subject: Subject },
    /// The oracle request was included on-chain.
    Submitted {
        subject: Subject,
        tx: TxRef,
        pending: bool,
    },
    /// The credential mint was observed.
    Completed {
        subject: Subject,
        level: AccessLevel,
        proof: ProofRef,
    },
    /// The subject has access.
    AccessGranted { subject: Subject, level: AccessLevel },
    /// The in-flight state of a subject changed.
    StateChanged { subject: Subject, state: RequestState },
    Error {
        subject: Option<Subject>,
        error: EngineError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Submitted,
    Completed,
    AccessGranted,
    StateChanged,
    Error,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Start { .. } => EventKind::Start,
            Self::Submitted { .. } => EventKind::Submitted,
            Self::Completed { .. } => EventKind::Completed,
            Self::AccessGranted { .. } => EventKind::AccessGranted,
            Self::StateChanged { .. } => EventKind::StateChanged,
            Self::Error { .. } => EventKind::Error,
        }
    }

    pub fn subject(&self) -> Option<&Subject> {
        match self {
            Self::Start { subject }
            | Self::Submitted { subject, .. }
            | Self::Completed { subject, .. }
            | Self::AccessGranted { subject, .. }
            | Self::StateChanged { subject, .. } => Some(subject),
            Self::Error { subject, .. } => subject.as_ref(),
        }
    }

    /// Kind of the carried error, for [`EngineEvent::Error`].
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error { error, .. } => Some(error.kind()),
            _ => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// One optional handler per event kind.
#[derive(Clone, Default)]
pub struct CallbackBag {
    start: Option<Handler>,
    submitted: Option<Handler>,
    completed: Option<Handler>,
    access_granted: Option<Handler>,
    state_changed: Option<Handler>,
    error: Option<Handler>,
}

impl CallbackBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl Fn(&EngineEvent) + Send + Sync + 'static) -> Self {
        self.start = Some(Arc::new(f));
        self
    }

    /// Fires when the oracle request is included, whether or not the mint
    /// happened in the same transaction.
    pub fn on_submitted(mut self, f: impl Fn(&EngineEvent) + Send + Sync + 'static) -> Self {
        self.submitted = Some(Arc::new(f));
        self
    }

    /// Fires when the credential mint is observed.
    pub fn on_completed(mut self, f: impl Fn(&EngineEvent) + Send + Sync + 'static) -> Self {
        self.completed = Some(Arc::new(f));
        self
    }

    pub fn on_access_granted(mut self, f: impl Fn(&EngineEvent) + Send + Sync + 'static) -> Self {
        self.access_granted = Some(Arc::new(f));
        self
    }

    pub fn on_state_changed(mut self, f: impl Fn(&EngineEvent) + Send + Sync + 'static) -> Self {
        self.state_changed = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&EngineEvent) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    fn handler_for(&self, kind: EventKind) -> Option<&Handler> {
        match kind {
            EventKind::Start => self.start.as_ref(),
            EventKind::Submitted => self.submitted.as_ref(),
            EventKind::Completed => self.completed.as_ref(),
            EventKind::AccessGranted => self.access_granted.as_ref(),
            EventKind::StateChanged => self.state_changed.as_ref(),
            EventKind::Error => self.error.as_ref(),
        }
    }
}

impl fmt::Debug for CallbackBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBag")
            .field("start", &self.start.is_some())
            .field("submitted", &self.submitted.is_some())
            .field("completed", &self.completed.is_some())
            .field("access_granted", &self.access_granted.is_some())
            .field("state_changed", &self.state_changed.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

struct Listener {
    id: u64,
    filter: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Listeners {
    bag: CallbackBag,
    subscribers: Vec<Listener>,
    next_id: u64,
}

/// Synchronous fan-out of [`EngineEvent`]s.
#[derive(Default)]
pub struct EventNotifier {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callbacks(bag: CallbackBag) -> Self {
        let notifier = Self::new();
        notifier.set_callbacks(bag);
        notifier
    }

    /// Replace the callback bag. The last bag set wins.
    pub fn set_callbacks(&self, bag: CallbackBag) {
        self.listeners.lock().unwrap().bag = bag;
    }

    /// Listen to every event.
    pub fn subscribe(&self, f: impl Fn(&EngineEvent) + Send + Sync + 'static) -> Subscription {
        self.add(None, Arc::new(f))
    }

    /// Listen to events of one kind.
    pub fn subscribe_to(
        &self,
        kind: EventKind,
        f: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(Some(kind), Arc::new(f))
    }

    fn add(&self, filter: Option<EventKind>, handler: Handler) -> Subscription {
        let mut listeners = self.listeners.lock().unwrap();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.subscribers.push(Listener {
            id,
            filter,
            handler,
        });
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().unwrap().subscribers.len()
    }

    pub fn emit(&self, event: EngineEvent) {
        let kind = event.kind();
        // Collect under the lock, call outside it so handlers may (un)subscribe.
        let handlers: Vec<Handler> = {
            let listeners = self.listeners.lock().unwrap();
            let mut handlers: Vec<Handler> = listeners.bag.handler_for(kind).cloned().into_iter().collect();
            handlers.extend(
                listeners
                    .subscribers
                    .iter()
                    .filter(|l| l.filter.map_or(true, |k| k == kind))
                    .map(|l| l.handler.clone()),
            );
            handlers
        };
        for handler in handlers {
            handler(&event);
        }
    }
}

/// Detaches its listener on [`Subscription::unsubscribe`] or drop.
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap()
                .subscribers
                .retain(|l| l.id != self.id);
        }
    }
}
