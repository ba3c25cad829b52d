//! Oracle-request reconciliation engine.
//!
//! Decides whether a subject has access to the Time Tokenizer, triggers the
//! KYC oracle request when it does not, and follows the request until the
//! oracle network's callback mints the access credential.
//!
//! - [`StatusResolver`]: contract first, then the verification service, then
//!   the session cache as a display hint
//! - [`RequestSubmitter`]: at most one request in flight per subject
//! - [`CallbackMonitor`]: bounded, cancellable polling for the callback
//! - [`EventNotifier`]: lifecycle events for the UI layer
//!
//! [`ReconciliationEngine`] wires them together around one shared
//! [`InFlightRegistry`].

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod in_flight;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod outcome;
pub mod resolver;
pub mod shutdown;
pub mod submitter;
pub mod tracing_spans;

pub use cache::SessionCache;
pub use config::EngineConfig;
pub use engine::ReconciliationEngine;
pub use error::{EngineError, ErrorKind, NotVerifiedReason, TxFailureCause};
pub use events::{
    CallbackBag, EngineEvent, EventKind, EventNotifier, RequestState, Subscription,
};
pub use in_flight::{Claim, InFlightEntry, InFlightRegistry};
pub use logging::{init_logging, LogFormat};
pub use metrics::EngineMetrics;
pub use monitor::{CallbackMonitor, MonitorCanceller, MonitorConfig, MonitorExit, MonitorHandle};
pub use outcome::RequestOutcome;
pub use resolver::StatusResolver;
pub use shutdown::{ShutdownController, ShutdownSignal};
pub use submitter::RequestSubmitter;
