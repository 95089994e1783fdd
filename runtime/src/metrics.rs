//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for all client components:
//! - HTTP requests and their status codes
//! - Token refresh outcomes and session teardowns
//! - Query cache hits, fetches and retries
//! - Optimistic mutation commits and rollbacks
//!
//! # Example
//!
//! ```rust,no_run
//! use lms_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // ... run the client ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder.
///
/// Installs the global recorder and renders the text exposition format on
/// demand. A client library has no listener of its own; the host decides
/// where the rendered text goes.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. by another test), this logs a
    /// warning and succeeds without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this instance.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // HTTP
    describe_counter!(
        "lms_http_requests_total",
        "Total number of HTTP requests sent, by method and status"
    );
    describe_histogram!(
        "lms_http_request_duration_seconds",
        "Time taken by a single HTTP round trip"
    );

    // Session
    describe_counter!(
        "lms_token_refresh_total",
        "Token refresh attempts, by outcome"
    );
    describe_counter!(
        "lms_session_teardown_total",
        "Sessions torn down after an unrecoverable 401"
    );

    // Query cache
    describe_counter!(
        "lms_query_cache_hits_total",
        "Reads served from fresh cached data"
    );
    describe_counter!(
        "lms_query_fetch_total",
        "Query fetches, by outcome"
    );

    // Retry
    describe_counter!(
        "lms_retry_attempts_total",
        "Retries scheduled after a retryable failure"
    );
    describe_counter!(
        "lms_retry_exhausted_total",
        "Operations that failed after exhausting their retries"
    );

    // Mutations
    describe_counter!(
        "lms_mutation_total",
        "Optimistic mutations, by outcome (committed or rolled_back)"
    );
}

/// HTTP metrics recorder.
pub struct HttpMetrics;

impl HttpMetrics {
    /// Record one HTTP round trip.
    pub fn record_request(method: &str, status: u16, duration: Duration) {
        counter!(
            "lms_http_requests_total",
            "method" => method.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!("lms_http_request_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Session metrics recorder.
pub struct SessionMetrics;

impl SessionMetrics {
    /// Record a refresh attempt outcome (`success` or `failure`).
    pub fn record_refresh(outcome: &'static str) {
        counter!("lms_token_refresh_total", "outcome" => outcome).increment(1);
    }

    /// Record a session teardown.
    pub fn record_teardown() {
        counter!("lms_session_teardown_total").increment(1);
    }
}

/// Query cache metrics recorder.
pub struct QueryMetrics;

impl QueryMetrics {
    /// Record a read served from fresh data.
    pub fn record_cache_hit() {
        counter!("lms_query_cache_hits_total").increment(1);
    }

    /// Record a fetch outcome (`success`, `error` or `cancelled`).
    pub fn record_fetch(outcome: &'static str) {
        counter!("lms_query_fetch_total", "outcome" => outcome).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a scheduled retry.
    pub fn record_attempt() {
        counter!("lms_retry_attempts_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("lms_retry_exhausted_total").increment(1);
    }
}

/// Mutation metrics recorder.
pub struct MutationMetrics;

impl MutationMetrics {
    /// Record a committed mutation.
    pub fn record_commit() {
        counter!("lms_mutation_total", "outcome" => "committed").increment(1);
    }

    /// Record a rolled back mutation.
    pub fn record_rollback() {
        counter!("lms_mutation_total", "outcome" => "rolled_back").increment(1);
    }
}
