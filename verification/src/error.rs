use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VerificationServiceError {
    #[error("HTTP request to verification service failed: {0}")]
    RequestFailed(String),

    #[error("invalid response from verification service: {0}")]
    InvalidResponse(String),

    #[error("verification service unreachable: {0}")]
    Unreachable(String),
}
