//! # LMS Runtime
//!
//! Async building blocks shared by the HTTP client and the query cache.
//!
//! ## Core Components
//!
//! - **Retry**: exponential backoff with a delay cap and a retryability predicate
//! - **Debounce**: last-submission-wins coalescing of rapid input
//! - **Single flight**: one shared in-flight execution for concurrent callers
//! - **Metrics**: metric descriptions and the Prometheus recorder
//!
//! ## Example
//!
//! ```ignore
//! use lms_runtime::{RetryPolicy, SingleFlight};
//!
//! let refresh: SingleFlight<TokenPair, ClientError> = SingleFlight::new();
//! let pair = refresh.run(|| exchange(refresh_token)).await?;
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Trailing-edge debouncing
pub mod debounce;

/// Shared in-flight execution
pub mod single_flight;

/// Prometheus metrics for observability
pub mod metrics;

pub use debounce::Debouncer;
pub use retry::{RetryPolicy, retry_with_predicate};
pub use single_flight::SingleFlight;
