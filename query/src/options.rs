//! Per-query options.

use lms_runtime::RetryPolicy;
use lms_runtime::retry::RetryDelayFn;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Base delay of the default retry backoff.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Cap of the retry backoff.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Knobs of one query observer.
///
/// # Default Values
///
/// - `stale_time`: 0 (data is stale as soon as it arrives)
/// - `retry`: 3
/// - `retry_delay`: `min(1s * 2^attempt, 30s)`
/// - `refetch_interval`: none
/// - `refetch_interval_in_background`: false
/// - `refetch_on_window_focus`: true
/// - `refetch_on_reconnect`: true
/// - `keep_previous_data`: false
/// - `enabled`: true
#[derive(Clone)]
pub struct QueryOptions {
    /// How long fetched data counts as fresh
    pub stale_time: Duration,
    /// Retries after the first failed attempt
    pub retry: usize,
    /// Custom backoff, replacing the exponential default (still capped)
    pub retry_delay: Option<RetryDelayFn>,
    /// Polling period
    pub refetch_interval: Option<Duration>,
    /// Keep polling while the window is unfocused
    pub refetch_interval_in_background: bool,
    /// Revalidate stale data when the window regains focus
    pub refetch_on_window_focus: bool,
    /// Revalidate stale data when the network comes back
    pub refetch_on_reconnect: bool,
    /// Show the previous key's data while a new key loads
    pub keep_previous_data: bool,
    /// Automatic fetching is allowed
    pub enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            retry: 3,
            retry_delay: None,
            refetch_interval: None,
            refetch_interval_in_background: false,
            refetch_on_window_focus: true,
            refetch_on_reconnect: true,
            keep_previous_data: false,
            enabled: true,
        }
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("stale_time", &self.stale_time)
            .field("retry", &self.retry)
            .field("retry_delay", &self.retry_delay.as_ref().map(|_| "custom"))
            .field("refetch_interval", &self.refetch_interval)
            .field(
                "refetch_interval_in_background",
                &self.refetch_interval_in_background,
            )
            .field("refetch_on_window_focus", &self.refetch_on_window_focus)
            .field("refetch_on_reconnect", &self.refetch_on_reconnect)
            .field("keep_previous_data", &self.keep_previous_data)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl QueryOptions {
    /// Set `stale_time`.
    #[must_use]
    pub const fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Set the retry count.
    #[must_use]
    pub const fn retry(mut self, retry: usize) -> Self {
        self.retry = retry;
        self
    }

    /// Set a custom backoff.
    #[must_use]
    pub fn retry_delay(mut self, delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.retry_delay = Some(Arc::new(delay));
        self
    }

    /// Poll every `interval`.
    #[must_use]
    pub const fn refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    /// Keep polling while unfocused.
    #[must_use]
    pub const fn refetch_interval_in_background(mut self, enabled: bool) -> Self {
        self.refetch_interval_in_background = enabled;
        self
    }

    /// Revalidate on window focus.
    #[must_use]
    pub const fn refetch_on_window_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_window_focus = enabled;
        self
    }

    /// Revalidate on reconnect.
    #[must_use]
    pub const fn refetch_on_reconnect(mut self, enabled: bool) -> Self {
        self.refetch_on_reconnect = enabled;
        self
    }

    /// Keep previous data as a placeholder across key changes.
    #[must_use]
    pub const fn keep_previous_data(mut self, enabled: bool) -> Self {
        self.keep_previous_data = enabled;
        self
    }

    /// Allow or suppress automatic fetching.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Retry policy derived from `retry` and `retry_delay`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::builder()
            .max_retries(self.retry)
            .initial_delay(DEFAULT_RETRY_DELAY)
            .max_delay(MAX_RETRY_DELAY)
            .multiplier(2.0)
            .build();
        policy.delay_fn.clone_from(&self.retry_delay);
        policy
    }
}
