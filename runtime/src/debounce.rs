//! Trailing-edge debouncing for rapid input.
//!
//! Search boxes fire on every keystroke; the network should only see the last
//! value once typing pauses. Each submission waits out the window and runs only
//! if no newer submission arrived in the meantime.
//!
//! # Example
//!
//! ```rust
//! use lms_runtime::debounce::Debouncer;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let debouncer = Debouncer::new(Duration::from_millis(500));
//! let hits = debouncer.run(|| async { vec!["Matematika"] }).await;
//! assert_eq!(hits, Some(vec!["Matematika"]));
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Default window used by list pages.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Last-submission-wins debouncer.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    generation: AtomicU64,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Debouncer {
    /// Create a debouncer with the given quiet window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            generation: AtomicU64::new(0),
        }
    }

    /// The quiet window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Submit `action`.
    ///
    /// Resolves to `Some(output)` if no newer submission arrived within the
    /// window, or `None` (without running `action`) if this one was superseded.
    pub async fn run<F, Fut, T>(&self, action: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        sleep(self.window).await;

        if self.generation.load(Ordering::SeqCst) != ticket {
            tracing::trace!(ticket, "Debounced submission superseded");
            return None;
        }

        Some(action().await)
    }

    /// Drop any pending submission.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
