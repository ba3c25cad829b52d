//! The reconciliation engine: one explicitly constructed value owning the
//! resolver, the submitter, the monitor and the shared in-flight registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info};

use timetoken_chain::{AccessContract, JsonRpcClient, RpcAccessContract, RpcContractConfig};
use timetoken_types::{AccessStatus, Subject};
use timetoken_verification::{HttpVerificationService, VerificationService};

use crate::cache::SessionCache;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{CallbackBag, EventNotifier};
use crate::in_flight::{InFlightEntry, InFlightRegistry};
use crate::metrics::EngineMetrics;
use crate::monitor::{CallbackMonitor, MonitorCanceller, MonitorConfig, MonitorExit, MonitorHandle};
use crate::outcome::RequestOutcome;
use crate::resolver::StatusResolver;
use crate::submitter::RequestSubmitter;

struct EngineInner {
    resolver: Arc<StatusResolver>,
    submitter: RequestSubmitter,
    monitor: Arc<CallbackMonitor>,
    registry: Arc<InFlightRegistry>,
    notifier: Arc<EventNotifier>,
    metrics: Arc<EngineMetrics>,
    monitors: Mutex<HashMap<Subject, MonitorCanceller>>,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl ReconciliationEngine {
    /// Build an engine over injected collaborators.
    pub fn new(
        config: &EngineConfig,
        contract: Arc<dyn AccessContract>,
        records: Arc<dyn VerificationService>,
        callbacks: CallbackBag,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let notifier = Arc::new(EventNotifier::with_callbacks(callbacks));
        let cache = Arc::new(SessionCache::new(config.cache_ttl()));
        let registry = Arc::new(InFlightRegistry::new(
            config.claim_ttl(),
            notifier.clone(),
            metrics.clone(),
        ));
        let resolver = Arc::new(StatusResolver::new(
            contract,
            records,
            cache.clone(),
            metrics.clone(),
        ));
        let submitter = RequestSubmitter::new(
            resolver.clone(),
            registry.clone(),
            notifier.clone(),
            cache.clone(),
            metrics.clone(),
            config.oracle_params(),
        );
        let monitor = Arc::new(CallbackMonitor::new(
            resolver.clone(),
            registry.clone(),
            notifier.clone(),
            cache,
            metrics.clone(),
            MonitorConfig {
                interval: config.poll_interval(),
                max_attempts: config.max_poll_attempts,
            },
        ));

        Ok(Self {
            inner: Arc::new(EngineInner {
                resolver,
                submitter,
                monitor,
                registry,
                notifier,
                metrics,
                monitors: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Build an engine talking JSON-RPC and HTTP to the configured endpoints.
    pub fn from_config(config: &EngineConfig, callbacks: CallbackBag) -> Result<Self, EngineError> {
        config.validate()?;
        let rpc = JsonRpcClient::with_timeout(config.rpc_url.clone(), config.http_timeout())
            .map_err(|e| EngineError::Config(format!("rpc client: {e}")))?;
        let contract = RpcAccessContract::new(
            rpc,
            RpcContractConfig {
                contract: config.contract()?,
                sender: config.sender()?,
                confirmation_timeout: config.confirmation_timeout(),
                receipt_poll_interval: config.receipt_poll_interval(),
            },
        );
        let records =
            HttpVerificationService::with_timeout(config.verification_url.clone(), config.http_timeout());
        info!(
            rpc = %config.rpc_url,
            contract = %config.contract_address,
            verification = %config.verification_url,
            "reconciliation engine configured"
        );
        Self::new(config, Arc::new(contract), Arc::new(records), callbacks)
    }

    pub async fn resolve(&self, raw: &str) -> Result<AccessStatus, EngineError> {
        let subject = parse_subject(raw)?;
        self.inner.resolver.resolve(&subject).await
    }

    pub async fn submit(&self, raw: &str) -> Result<RequestOutcome, EngineError> {
        self.inner.submitter.submit(raw).await
    }

    /// Start monitoring `subject`, replacing any session already running for it.
    pub fn watch<F>(&self, subject: &Subject, on_terminal: F) -> MonitorHandle
    where
        F: FnOnce(RequestOutcome) + Send + 'static,
    {
        let handle = self.inner.monitor.watch(subject, on_terminal);
        let previous = {
            let mut monitors = self.inner.monitors.lock().unwrap();
            monitors.retain(|_, canceller| canceller.is_active());
            monitors.insert(subject.clone(), handle.canceller())
        };
        if let Some(previous) = previous {
            debug!(%subject, "replacing running monitor");
            previous.cancel();
        }
        handle
    }

    /// Stop monitoring `subject`. Returns whether a session was running.
    pub fn cancel(&self, subject: &Subject) -> bool {
        let removed = self.inner.monitors.lock().unwrap().remove(subject);
        match removed {
            Some(canceller) => {
                let running = canceller.is_active() && !canceller.is_cancelled();
                canceller.cancel();
                running
            }
            None => false,
        }
    }

    /// Stop every monitoring session. Returns how many were still running.
    pub fn cancel_all(&self) -> usize {
        let monitors: Vec<_> = self.inner.monitors.lock().unwrap().drain().collect();
        let mut running = 0;
        for (subject, canceller) in monitors {
            if canceller.is_active() && !canceller.is_cancelled() {
                running += 1;
            }
            debug!(%subject, "cancelling monitor");
            canceller.cancel();
        }
        running
    }

    /// Submit, and if the request is pending, monitor it to a terminal outcome.
    ///
    /// Returns the pending submission unchanged if monitoring is cancelled.
    pub async fn submit_and_watch(&self, raw: &str) -> Result<RequestOutcome, EngineError> {
        let outcome = self.submit(raw).await?;
        if outcome.is_terminal() {
            return Ok(outcome);
        }

        let subject = parse_subject(raw)?;
        let (tx, rx) = oneshot::channel();
        let handle = self.watch(&subject, move |terminal| {
            let _ = tx.send(terminal);
        });
        let exit = handle.join().await;

        match (exit, rx.await) {
            (MonitorExit::Terminal(_), Ok(terminal)) => Ok(terminal),
            _ => Ok(outcome),
        }
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.inner.notifier
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    pub fn in_flight(&self, subject: &Subject) -> Option<InFlightEntry> {
        self.inner.registry.get(subject)
    }

    pub fn contract_address(&self) -> &Subject {
        self.inner.resolver.contract().address()
    }

    /// Subjects with a running monitoring session.
    pub fn monitored(&self) -> Vec<Subject> {
        let mut monitors = self.inner.monitors.lock().unwrap();
        monitors.retain(|_, canceller| canceller.is_active());
        monitors.keys().cloned().collect()
    }
}

fn parse_subject(raw: &str) -> Result<Subject, EngineError> {
    Subject::parse(raw).map_err(|e| EngineError::InvalidSubject(e.to_string()))
}
