//! Access status resolution across the contract, the verification service and
//! the session cache.
//!
//! The contract is authoritative and consulted first. The verification service
//! is a weaker signal; the cache only ever provides a display level.

use std::sync::Arc;
use tracing::{debug, warn, Instrument};

use timetoken_chain::AccessContract;
use timetoken_types::{AccessLevel, AccessStatus, StatusSource, Subject};
use timetoken_verification::{RecordStatus, VerificationRecord, VerificationService};

use crate::cache::SessionCache;
use crate::error::{EngineError, NotVerifiedReason};
use crate::metrics::EngineMetrics;
use crate::tracing_spans::resolve_span;

pub struct StatusResolver {
    contract: Arc<dyn AccessContract>,
    records: Arc<dyn VerificationService>,
    cache: Arc<SessionCache>,
    metrics: Arc<EngineMetrics>,
}

impl StatusResolver {
    pub fn new(
        contract: Arc<dyn AccessContract>,
        records: Arc<dyn VerificationService>,
        cache: Arc<SessionCache>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            contract,
            records,
            cache,
            metrics,
        }
    }

    pub fn contract(&self) -> &Arc<dyn AccessContract> {
        &self.contract
    }

    /// Resolve `subject` against every source, contract first.
    ///
    /// A contract failure is returned as [`EngineError::ContractUnavailable`];
    /// it is never masked by an off-chain answer. A verification service
    /// failure only downgrades the answer to "not verified".
    pub async fn resolve(&self, subject: &Subject) -> Result<AccessStatus, EngineError> {
        async {
            let on_chain = self.resolve_on_chain(subject).await?;
            if on_chain.has_access {
                return Ok(on_chain);
            }

            match self.records.lookup(subject).await {
                Ok(Some(record)) if record.level > 0 => {
                    debug!(verified = record.is_verified(), status = %record.status, "off-chain record found");
                    let level = AccessLevel::new(record.level);
                    return Ok(AccessStatus::denied(level, StatusSource::OffChainHint));
                }
                Ok(_) => {}
                Err(e) => {
                    self.metrics.resolver_errors.inc();
                    warn!(error = %e, "verification service lookup failed, treating as not verified");
                }
            }

            Ok(match self.cache.level(subject) {
                Some(level) => AccessStatus::denied(level, StatusSource::LocalCache),
                None => AccessStatus::none(),
            })
        }
        .instrument(resolve_span(subject))
        .await
    }

    /// Ask only the contract. Used by the callback monitor.
    pub async fn resolve_on_chain(&self, subject: &Subject) -> Result<AccessStatus, EngineError> {
        let has_access = self.contract.has_access(subject).await.map_err(|e| {
            self.metrics.resolver_errors.inc();
            EngineError::from_read(e)
        })?;
        if !has_access {
            return Ok(AccessStatus::denied(AccessLevel::NONE, StatusSource::OnChain));
        }

        let level = self.contract.level(subject).await.map_err(|e| {
            self.metrics.resolver_errors.inc();
            EngineError::from_read(e)
        })?;
        // hasAccess is the gate; a zero level read alongside it still means access.
        let level = if level.is_none() { AccessLevel::BASIC } else { level };
        Ok(AccessStatus::granted(level))
    }

    /// The off-chain precondition for sending a request.
    pub async fn check_off_chain(&self, subject: &Subject) -> Result<VerificationRecord, EngineError> {
        let record = match self.records.lookup(subject).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(EngineError::NotVerified(NotVerifiedReason::NoRecord)),
            Err(e) => {
                self.metrics.resolver_errors.inc();
                warn!(%subject, error = %e, "verification service unavailable");
                return Err(e.into());
            }
        };

        if record.status != RecordStatus::Approved {
            return Err(EngineError::NotVerified(NotVerifiedReason::NotApproved(
                record.status,
            )));
        }
        if !record.verified {
            return Err(EngineError::NotVerified(NotVerifiedReason::FlagUnset));
        }
        Ok(record)
    }
}
