//! Polling for the asynchronous oracle callback.
//!
//! After a pending submission, the DON fulfils the request in a later
//! transaction. [`CallbackMonitor::watch`] spawns a task that reads the
//! contract every `interval` until access shows up or `max_attempts` polls
//! have been made.
//!
//! Stopping a session (through [`MonitorHandle::cancel`] or by dropping every
//! handle to it) is silent: the terminal callback is not invoked and the
//! in-flight claim stays in place, since the on-chain request is still live.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use timetoken_types::{AccessLevel, ProofRef, Subject};
use timetoken_utils::format_duration;

use crate::cache::SessionCache;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventNotifier};
use crate::in_flight::InFlightRegistry;
use crate::metrics::EngineMetrics;
use crate::outcome::RequestOutcome;
use crate::resolver::StatusResolver;
use crate::tracing_spans::monitor_span;

/// How a monitoring session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorExit {
    /// The terminal callback was invoked with this outcome.
    Terminal(RequestOutcome),
    /// Stopped before reaching a terminal outcome.
    Cancelled { attempts: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// A cloneable way to stop a monitoring session.
#[derive(Clone, Debug)]
pub struct MonitorCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl MonitorCanceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Whether the session task is still running.
    pub fn is_active(&self) -> bool {
        !self.tx.is_closed()
    }
}

pub struct MonitorHandle {
    subject: Subject,
    canceller: MonitorCanceller,
    task: JoinHandle<MonitorExit>,
}

impl MonitorHandle {
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> MonitorCanceller {
        self.canceller.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end.
    pub async fn join(self) -> MonitorExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(subject = %self.subject, error = %e, "monitor task aborted");
                MonitorExit::Cancelled { attempts: 0 }
            }
        }
    }
}

pub struct CallbackMonitor {
    resolver: Arc<StatusResolver>,
    registry: Arc<InFlightRegistry>,
    notifier: Arc<EventNotifier>,
    cache: Arc<SessionCache>,
    metrics: Arc<EngineMetrics>,
    config: MonitorConfig,
    next_session: AtomicU64,
}

impl CallbackMonitor {
    pub fn new(
        resolver: Arc<StatusResolver>,
        registry: Arc<InFlightRegistry>,
        notifier: Arc<EventNotifier>,
        cache: Arc<SessionCache>,
        metrics: Arc<EngineMetrics>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            resolver,
            registry,
            notifier,
            cache,
            metrics,
            config,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> MonitorConfig {
        self.config
    }

    /// Start polling for `subject`'s callback.
    ///
    /// `on_terminal` runs at most once, with either a grant or a
    /// [`EngineError::Timeout`] failure. Must be called within a tokio runtime.
    pub fn watch<F>(self: &Arc<Self>, subject: &Subject, on_terminal: F) -> MonitorHandle
    where
        F: FnOnce(RequestOutcome) + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let canceller = MonitorCanceller { tx: Arc::new(tx) };
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let span = monitor_span(subject, self.config.max_attempts);
        let task = tokio::spawn(
            Arc::clone(self)
                .run(subject.clone(), session, rx, on_terminal)
                .instrument(span),
        );
        MonitorHandle {
            subject: subject.clone(),
            canceller,
            task,
        }
    }

    async fn run<F>(
        self: Arc<Self>,
        subject: Subject,
        session: u64,
        mut cancel: watch::Receiver<bool>,
        on_terminal: F,
    ) -> MonitorExit
    where
        F: FnOnce(RequestOutcome) + Send + 'static,
    {
        let started = Instant::now();
        let MonitorConfig {
            interval,
            max_attempts,
        } = self.config;
        self.registry.mark_monitoring(&subject, session);
        debug!(interval = %format_duration(interval), "monitoring for oracle callback");

        let mut attempts = 0;
        loop {
            if is_cancelled(&cancel) {
                return self.stopped(&subject, session, attempts);
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                // Cancellation or every handle dropped; re-checked at the top.
                _ = cancel.changed() => continue,
            }

            if is_cancelled(&cancel) {
                return self.stopped(&subject, session, attempts);
            }
            attempts += 1;

            match self.resolver.resolve_on_chain(&subject).await {
                Ok(status) if status.has_access => {
                    if is_cancelled(&cancel) {
                        // Access is real, so clear the claim, but stay silent.
                        self.record_grant(&subject, status.level);
                        return MonitorExit::Cancelled { attempts };
                    }
                    let elapsed = started.elapsed();
                    self.metrics
                        .callback_latency_secs
                        .observe(elapsed.as_secs_f64());
                    info!(
                        attempts,
                        level = %status.level,
                        elapsed = %format_duration(elapsed),
                        "oracle callback observed"
                    );
                    let outcome = self.grant(&subject, status.level);
                    on_terminal(outcome.clone());
                    return MonitorExit::Terminal(outcome);
                }
                Ok(_) => debug!(attempts, "callback not landed yet"),
                Err(e) => warn!(attempts, error = %e, "callback poll failed, will retry"),
            }

            if attempts >= max_attempts {
                if is_cancelled(&cancel) {
                    return self.stopped(&subject, session, attempts);
                }
                let outcome = self.time_out(&subject, attempts);
                on_terminal(outcome.clone());
                return MonitorExit::Terminal(outcome);
            }
        }
    }

    fn record_grant(&self, subject: &Subject, level: AccessLevel) {
        self.registry.release(subject);
        self.cache.remember(subject, level);
        self.metrics.grants.inc();
    }

    fn grant(&self, subject: &Subject, level: AccessLevel) -> RequestOutcome {
        self.record_grant(subject, level);
        let proof = ProofRef::Contract {
            contract: self.resolver.contract().address().clone(),
        };
        self.notifier.emit(EngineEvent::Completed {
            subject: subject.clone(),
            level,
            proof: proof.clone(),
        });
        self.notifier.emit(EngineEvent::AccessGranted {
            subject: subject.clone(),
            level,
        });
        RequestOutcome::Granted { level, proof }
    }

    fn time_out(&self, subject: &Subject, attempts: u32) -> RequestOutcome {
        warn!(attempts, "oracle callback not observed, giving up");
        self.registry.release(subject);
        self.metrics.monitor_timeouts.inc();
        let reason = EngineError::Timeout { attempts };
        self.notifier.emit(EngineEvent::Error {
            subject: Some(subject.clone()),
            error: reason.clone(),
        });
        RequestOutcome::Failed { reason }
    }

    fn stopped(&self, subject: &Subject, session: u64, attempts: u32) -> MonitorExit {
        debug!(attempts, "monitoring cancelled");
        self.registry.detach(subject, session);
        MonitorExit::Cancelled { attempts }
    }
}

/// Cancelled explicitly, or no handle is left to cancel with.
fn is_cancelled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::RequestState;
    use std::sync::Mutex;
    use timetoken_chain::{AccessContract, OracleRequestParams};
    use timetoken_nullables::{NullAccessContract, NullVerificationService, RequestBehavior};
    use timetoken_types::TxRef;

    fn contract_address() -> Subject {
        Subject::parse("0x1111111111111111111111111111111111111111").unwrap()
    }

    fn alice() -> Subject {
        Subject::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap()
    }

    struct Fixture {
        contract: Arc<NullAccessContract>,
        registry: Arc<InFlightRegistry>,
        monitor: Arc<CallbackMonitor>,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        let contract = Arc::new(NullAccessContract::new(contract_address()));
        let metrics = Arc::new(EngineMetrics::new());
        let notifier = Arc::new(EventNotifier::new());
        let cache = Arc::new(SessionCache::new(Duration::from_secs(300)));
        let resolver = Arc::new(StatusResolver::new(
            contract.clone(),
            Arc::new(NullVerificationService::new()),
            cache.clone(),
            metrics.clone(),
        ));
        let registry = Arc::new(InFlightRegistry::new(
            Duration::from_secs(3600),
            notifier.clone(),
            metrics.clone(),
        ));
        let monitor = Arc::new(CallbackMonitor::new(
            resolver,
            registry.clone(),
            notifier,
            cache,
            metrics,
            MonitorConfig {
                interval: Duration::from_secs(10),
                max_attempts,
            },
        ));
        registry
            .try_claim(&alice())
            .unwrap()
            .keep_pending(TxRef::new([1; 32]));
        Fixture {
            contract,
            registry,
            monitor,
        }
    }

    async fn schedule_mint(contract: &NullAccessContract, polls: u32) {
        contract.on_request(RequestBehavior::MintAfterPolls {
            polls,
            level: AccessLevel::BASIC,
        });
        contract
            .request_verification(
                &alice(),
                &OracleRequestParams {
                    secrets_slot: 0,
                    secrets_version: 0,
                    subscription_id: 0,
                },
            )
            .await
            .unwrap();
    }

    fn recorder() -> (Arc<Mutex<Vec<RequestOutcome>>>, impl FnOnce(RequestOutcome) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        (seen, move |outcome| s.lock().unwrap().push(outcome))
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_exactly_max_attempts() {
        let f = fixture(5);
        let (seen, on_terminal) = recorder();

        let exit = f.monitor.watch(&alice(), on_terminal).join().await;

        assert_eq!(f.contract.has_access_calls(), 5);
        let expected = RequestOutcome::Failed {
            reason: EngineError::Timeout { attempts: 5 },
        };
        assert_eq!(exit, MonitorExit::Terminal(expected.clone()));
        assert_eq!(*seen.lock().unwrap(), vec![expected]);
        assert!(f.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_timeout_before_last_attempt() {
        let f = fixture(5);
        let (seen, on_terminal) = recorder();
        let handle = f.monitor.watch(&alice(), on_terminal);

        // Four intervals in: four polls, still running.
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(f.contract.has_access_calls(), 4);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(f.registry.get(&alice()).unwrap().state, RequestState::Monitoring);

        handle.join().await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn grants_when_callback_lands() {
        let f = fixture(30);
        schedule_mint(&f.contract, 3).await;
        let (seen, on_terminal) = recorder();

        let exit = f.monitor.watch(&alice(), on_terminal).join().await;

        assert_eq!(f.contract.has_access_calls(), 3);
        match exit {
            MonitorExit::Terminal(RequestOutcome::Granted { level, .. }) => {
                assert_eq!(level, AccessLevel::BASIC)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(f.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_do_not_end_the_session() {
        let f = fixture(30);
        schedule_mint(&f.contract, 2).await;
        f.contract.fail_next_reads(3);
        let (_seen, on_terminal) = recorder();

        let exit = f.monitor.watch(&alice(), on_terminal).join().await;

        // Three failed reads, then the two the schedule needs.
        assert_eq!(f.contract.has_access_calls(), 5);
        assert!(matches!(exit, MonitorExit::Terminal(RequestOutcome::Granted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn error_on_final_attempt_is_a_timeout() {
        let f = fixture(3);
        f.contract.fail_next_reads(10);
        let (_seen, on_terminal) = recorder();

        let exit = f.monitor.watch(&alice(), on_terminal).join().await;
        match exit {
            MonitorExit::Terminal(RequestOutcome::Failed { reason }) => {
                assert_eq!(reason.kind(), ErrorKind::Timeout)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_silences_callback_and_keeps_claim() {
        let f = fixture(30);
        schedule_mint(&f.contract, 3).await;
        let (seen, on_terminal) = recorder();
        let handle = f.monitor.watch(&alice(), on_terminal);

        tokio::time::sleep(Duration::from_secs(15)).await;
        handle.cancel();
        let exit = handle.join().await;

        assert_eq!(exit, MonitorExit::Cancelled { attempts: 1 });
        // Let the callback land anyway; nobody is listening.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(
            f.registry.get(&alice()).unwrap().state,
            RequestState::AwaitingCallback
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_session() {
        let f = fixture(30);
        let (seen, on_terminal) = recorder();
        let handle = f.monitor.watch(&alice(), on_terminal);
        drop(handle);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(f.contract.has_access_calls(), 0);
    }
}
