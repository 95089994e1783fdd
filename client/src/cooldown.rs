//! Rate-limit cooldown.
//!
//! A 429 arms the cooldown; submissions are refused until it elapses. The
//! countdown reads the injected clock, so tests drive it with a manual clock.

use chrono::{DateTime, Utc};
use lms_core::environment::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Cooldown used when the server does not send `Retry-After`.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Countdown armed by a rate-limited response.
pub struct Cooldown {
    clock: Arc<dyn Clock>,
    until: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for Cooldown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cooldown")
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl Cooldown {
    /// Inactive cooldown reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            until: Mutex::new(None),
        }
    }

    /// Arm the cooldown for `wait` (or [`DEFAULT_COOLDOWN`]).
    ///
    /// An already running cooldown is only ever extended, never shortened.
    pub fn trip(&self, wait: Option<Duration>) {
        let wait = wait.unwrap_or(DEFAULT_COOLDOWN);
        let Ok(wait) = chrono::Duration::from_std(wait) else {
            return;
        };
        let candidate = self.clock.now() + wait;

        let mut until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        if until.is_none_or(|current| current < candidate) {
            *until = Some(candidate);
        }
        tracing::warn!(wait_secs = wait.num_seconds(), "Rate limited, cooling down");
    }

    /// Time left before submissions are allowed again.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let until = (*self.until.lock().unwrap_or_else(PoisonError::into_inner))?;
        (until - self.clock.now())
            .to_std()
            .ok()
            .filter(|left| !left.is_zero())
    }

    /// Whether submissions are currently refused.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.remaining().is_some()
    }

    /// Countdown message, rounded up to whole seconds.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.remaining().map(|left| {
            let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            format!("Too many attempts. Try again in {secs} seconds.")
        })
    }

    /// Disarm the cooldown.
    pub fn reset(&self) {
        *self.until.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
