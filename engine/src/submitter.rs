//! Guarded submission of the oracle-triggering transaction.
//!
//! A submission runs these steps, stopping at the first that decides:
//!
//! 1. validate the subject
//! 2. claim the subject in the [`InFlightRegistry`]
//! 3. resolve: a subject that already has access is granted, no transaction
//! 4. require an approved off-chain record
//! 5. send `requestVerification` and wait for inclusion
//! 6. look for the mint in the receipt (`Minted`, else a `Transfer` from zero)
//! 7. otherwise report the request as pending and keep the claim
//!
//! The claim is released on every terminal outcome, errors included, except
//! where a broadcast transaction may still land: then it stays in flight.

use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use timetoken_chain::{find_completion, CompletionSource, OracleRequestParams, TxReceipt};
use timetoken_types::{AccessLevel, ProofRef, Subject};

use crate::cache::SessionCache;
use crate::error::{EngineError, ErrorKind};
use crate::events::{EngineEvent, EventNotifier};
use crate::in_flight::InFlightRegistry;
use crate::metrics::EngineMetrics;
use crate::outcome::RequestOutcome;
use crate::resolver::StatusResolver;
use crate::tracing_spans::submit_span;

pub struct RequestSubmitter {
    resolver: Arc<StatusResolver>,
    registry: Arc<InFlightRegistry>,
    notifier: Arc<EventNotifier>,
    cache: Arc<SessionCache>,
    metrics: Arc<EngineMetrics>,
    params: OracleRequestParams,
}

impl RequestSubmitter {
    pub fn new(
        resolver: Arc<StatusResolver>,
        registry: Arc<InFlightRegistry>,
        notifier: Arc<EventNotifier>,
        cache: Arc<SessionCache>,
        metrics: Arc<EngineMetrics>,
        params: OracleRequestParams,
    ) -> Self {
        Self {
            resolver,
            registry,
            notifier,
            cache,
            metrics,
            params,
        }
    }

    /// Submit a verification request for the raw address `raw`.
    pub async fn submit(&self, raw: &str) -> Result<RequestOutcome, EngineError> {
        match Subject::parse(raw) {
            Ok(subject) => self.submit_subject(&subject).await,
            Err(e) => {
                let err = EngineError::InvalidSubject(e.to_string());
                self.report(None, &err);
                Err(err)
            }
        }
    }

    pub async fn submit_subject(&self, subject: &Subject) -> Result<RequestOutcome, EngineError> {
        let result = self.run(subject).instrument(submit_span(subject)).await;
        if let Err(err) = &result {
            self.report(Some(subject), err);
        }
        result
    }

    async fn run(&self, subject: &Subject) -> Result<RequestOutcome, EngineError> {
        let mut claim = self.registry.try_claim(subject)?;
        self.notifier.emit(EngineEvent::Start {
            subject: subject.clone(),
        });

        let status = self.resolver.resolve(subject).await?;
        if status.has_access {
            info!(level = %status.level, "subject already holds the credential");
            self.cache.remember(subject, status.level);
            self.metrics.grants.inc();
            self.notifier.emit(EngineEvent::AccessGranted {
                subject: subject.clone(),
                level: status.level,
            });
            drop(claim);
            return Ok(RequestOutcome::Granted {
                level: status.level,
                proof: ProofRef::Contract {
                    contract: self.resolver.contract().address().clone(),
                },
            });
        }

        let record = self.resolver.check_off_chain(subject).await?;
        debug!(level = record.level, "off-chain verification confirmed");

        self.metrics.submissions.inc();
        claim.hold_on_drop();
        let receipt = match self
            .resolver
            .contract()
            .request_verification(subject, &self.params)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                let err = EngineError::from_submission(e);
                match err.live_tx() {
                    Some(tx) => {
                        warn!(%tx, error = %err, "request sent but unconfirmed, stays in flight");
                        claim.keep_pending(tx);
                    }
                    None => claim.release(),
                }
                return Err(err);
            }
        };

        let tx = receipt.tx;
        match receipt.request_id() {
            Some(id) => info!(%tx, request_id = %id, "oracle request included"),
            None => info!(%tx, "oracle request included"),
        }

        match self.immediate_completion(subject, &receipt).await {
            Some((level, proof)) => {
                info!(%tx, %level, "credential minted in the request transaction");
                self.metrics.immediate_mints.inc();
                self.metrics.grants.inc();
                self.cache.remember(subject, level);
                self.notifier.emit(EngineEvent::Submitted {
                    subject: subject.clone(),
                    tx,
                    pending: false,
                });
                self.notifier.emit(EngineEvent::Completed {
                    subject: subject.clone(),
                    level,
                    proof,
                });
                self.notifier.emit(EngineEvent::AccessGranted {
                    subject: subject.clone(),
                    level,
                });
                claim.release();
                Ok(RequestOutcome::Submitted {
                    tx,
                    pending: false,
                    immediate_level: Some(level),
                })
            }
            None => {
                claim.keep_pending(tx);
                self.notifier.emit(EngineEvent::Submitted {
                    subject: subject.clone(),
                    tx,
                    pending: true,
                });
                Ok(RequestOutcome::Submitted {
                    tx,
                    pending: true,
                    immediate_level: None,
                })
            }
        }
    }

    /// The level minted by the request transaction itself, if any.
    async fn immediate_completion(
        &self,
        subject: &Subject,
        receipt: &TxReceipt,
    ) -> Option<(AccessLevel, ProofRef)> {
        let contract = self.resolver.contract();
        let completion = find_completion(receipt, contract.address(), subject)?;
        let proof = ProofRef::Mint {
            tx: receipt.tx,
            token_id: Some(completion.token_id.clone()),
        };

        if let (CompletionSource::Minted, Some(level)) = (completion.source, completion.level) {
            return Some((level, proof));
        }

        // A bare Transfer carries no level; ask the contract.
        match contract.level(subject).await {
            Ok(level) if !level.is_none() => {
                debug!(token = %completion.token_id, %level, "Transfer mint confirmed on-chain");
                Some((level, proof))
            }
            Ok(_) => {
                warn!(
                    token = %completion.token_id,
                    "Transfer from zero seen but the contract reports no level, treating as pending"
                );
                None
            }
            Err(e) => {
                self.metrics.resolver_errors.inc();
                warn!(error = %e, "could not confirm Transfer mint, treating as pending");
                None
            }
        }
    }

    fn report(&self, subject: Option<&Subject>, err: &EngineError) {
        match err.kind() {
            ErrorKind::AlreadyInProgress | ErrorKind::NotVerified | ErrorKind::InvalidSubject => {
                info!(subject = ?subject, error = %err, "submission refused")
            }
            _ => warn!(subject = ?subject, error = %err, "submission failed"),
        }
        self.notifier.emit(EngineEvent::Error {
            subject: subject.cloned(),
            error: err.clone(),
        });
    }
}
