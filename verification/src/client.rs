//! HTTP client for the verification records endpoint.

use crate::error::VerificationServiceError;
use crate::types::VerificationRecord;
use crate::VerificationService;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use timetoken_types::Subject;
use tracing::debug;

/// Default timeout for verification lookups.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the off-chain verification service.
///
/// Sends `GET {base_url}/records/{address}`; 200 carries a
/// [`VerificationRecord`], 404 means no record.
pub struct HttpVerificationService {
    /// HTTP client (reusable connection pool).
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpVerificationService {
    /// Create a client with default timeout settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }

    fn record_url(&self, subject: &Subject) -> String {
        format!(
            "{}/records/{}",
            self.base_url.trim_end_matches('/'),
            subject.as_str()
        )
    }
}

#[async_trait]
impl VerificationService for HttpVerificationService {
    async fn lookup(
        &self,
        subject: &Subject,
    ) -> Result<Option<VerificationRecord>, VerificationServiceError> {
        let url = self.record_url(subject);

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                VerificationServiceError::Unreachable(format!("request timed out: {e}"))
            } else if e.is_connect() {
                VerificationServiceError::Unreachable(format!("connection failed: {e}"))
            } else {
                VerificationServiceError::RequestFailed(e.to_string())
            }
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(%subject, "no off-chain verification record");
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(VerificationServiceError::RequestFailed(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        let record: VerificationRecord = response.json().await.map_err(|e| {
            VerificationServiceError::InvalidResponse(format!("failed to parse record: {e}"))
        })?;

        // The service is keyed by address; a record for someone else is a service bug.
        if !subject.matches(&record.address) {
            return Err(VerificationServiceError::InvalidResponse(format!(
                "record address {} does not match {subject}",
                record.address
            )));
        }

        Ok(Some(record))
    }
}
