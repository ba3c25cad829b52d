//! Graceful shutdown of the engine's background work.
//!
//! Submissions are awaited by their callers, but monitoring sessions run as
//! detached tasks. [`ShutdownController::attach`] ties an engine to the
//! controller so that a signal (or [`ShutdownController::trigger`]) cancels
//! every session it is running. Cancelled sessions keep their requests in
//! flight: the oracle callback may still land after the process exits.

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::engine::ReconciliationEngine;

pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

/// Resolves once shutdown has been triggered, even if that happened before
/// the signal was obtained.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub async fn wait(&mut self) {
        // A dropped controller can never trigger; treat it as shut down.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Cancel every monitoring session of `engine` once shutdown is triggered.
    pub fn attach(&self, engine: ReconciliationEngine) -> JoinHandle<()> {
        let mut signal = self.subscribe();
        tokio::spawn(async move {
            signal.wait().await;
            let cancelled = engine.cancel_all();
            info!(cancelled, "monitoring stopped for shutdown");
        })
    }

    /// Wait for SIGTERM or SIGINT, then trigger shutdown.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, relying on SIGINT");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => { info!("received SIGINT, shutting down"); }
            _ = terminate => { info!("received SIGTERM, shutting down"); }
        }

        self.trigger();
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
