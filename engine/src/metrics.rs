//! Prometheus metrics for the reconciliation engine.
//!
//! [`EngineMetrics`] owns its own [`Registry`] so embedders can expose it next
//! to their own metrics or encode it on demand.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

pub struct EngineMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Oracle-request transactions sent.
    pub submissions: IntCounter,
    /// Submissions rejected because a request was already in flight.
    pub duplicate_submissions: IntCounter,
    /// Subjects observed gaining access, by any path.
    pub grants: IntCounter,
    /// Mints observed in the request's own receipt.
    pub immediate_mints: IntCounter,
    /// Monitoring sessions that ran out of attempts.
    pub monitor_timeouts: IntCounter,
    /// Failed on-chain or off-chain reads.
    pub resolver_errors: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Subjects with a request in flight.
    pub in_flight: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Time from monitor start to observed callback, in seconds.
    pub callback_latency_secs: Histogram,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let submissions = register_int_counter_with_registry!(
            Opts::new(
                "timetoken_submissions_total",
                "Verification request transactions sent"
            ),
            registry
        )
        .expect("failed to register submissions counter");

        let duplicate_submissions = register_int_counter_with_registry!(
            Opts::new(
                "timetoken_duplicate_submissions_total",
                "Submissions rejected because a request was already in flight"
            ),
            registry
        )
        .expect("failed to register duplicate_submissions counter");

        let grants = register_int_counter_with_registry!(
            Opts::new("timetoken_grants_total", "Access grants observed"),
            registry
        )
        .expect("failed to register grants counter");

        let immediate_mints = register_int_counter_with_registry!(
            Opts::new(
                "timetoken_immediate_mints_total",
                "Credential mints found in the request receipt"
            ),
            registry
        )
        .expect("failed to register immediate_mints counter");

        let monitor_timeouts = register_int_counter_with_registry!(
            Opts::new(
                "timetoken_monitor_timeouts_total",
                "Monitoring sessions that exhausted their attempts"
            ),
            registry
        )
        .expect("failed to register monitor_timeouts counter");

        let resolver_errors = register_int_counter_with_registry!(
            Opts::new(
                "timetoken_resolver_errors_total",
                "Failed reads against the contract or verification service"
            ),
            registry
        )
        .expect("failed to register resolver_errors counter");

        let in_flight = register_int_gauge_with_registry!(
            Opts::new("timetoken_in_flight", "Subjects with a request in flight"),
            registry
        )
        .expect("failed to register in_flight gauge");

        // Oracle callbacks take seconds to minutes: 1 s → ~17 min.
        let callback_latency_secs = register_histogram_with_registry!(
            HistogramOpts::new(
                "timetoken_callback_latency_secs",
                "Time from monitor start to observed oracle callback"
            )
            .buckets(prometheus::exponential_buckets(1.0, 2.0, 11).unwrap()),
            registry
        )
        .expect("failed to register callback_latency_secs histogram");

        Self {
            registry,
            submissions,
            duplicate_submissions,
            grants,
            immediate_mints,
            monitor_timeouts,
            resolver_errors,
            in_flight,
            callback_latency_secs,
        }
    }

    /// Encode every metric in the Prometheus text exposition format.
    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
