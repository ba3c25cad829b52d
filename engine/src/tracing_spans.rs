//! Span constructors with consistent names and fields.

use tracing::{info_span, Span};

use timetoken_types::Subject;

/// One call to `submit`, from guard to outcome.
pub fn submit_span(subject: &Subject) -> Span {
    info_span!("submit", subject = %subject)
}

/// One monitoring session.
pub fn monitor_span(subject: &Subject, max_attempts: u32) -> Span {
    info_span!("monitor", subject = %subject, max_attempts)
}

pub fn resolve_span(subject: &Subject) -> Span {
    info_span!("resolve", subject = %subject)
}
