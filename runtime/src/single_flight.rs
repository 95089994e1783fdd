//! Single in-flight execution shared by concurrent callers.
//!
//! When several tasks need the same expensive, side-effecting operation at the
//! same time (a token refresh after a burst of 401s), only the first caller
//! starts it; everyone else awaits the same shared future and receives a clone
//! of its result. The slot is cleared once the operation completes, so the next
//! call after that starts a fresh operation.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Deduplicates concurrent executions of one operation.
pub struct SingleFlight<T, E> {
    slot: Mutex<Option<(u64, SharedResult<T, E>)>>,
    next_id: AtomicU64,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T, E> std::fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

impl<T, E> SingleFlight<T, E> {
    /// Whether an execution is currently in flight.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an idle single-flight slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` unless an execution is already in flight, in which case
    /// join it. `start` is only called by the caller that begins a new flight.
    ///
    /// # Errors
    ///
    /// Returns a clone of the shared operation's error.
    pub async fn run<F, Fut>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (id, flight) = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((id, flight)) = slot.as_ref() {
                tracing::debug!(flight = id, "Joining in-flight operation");
                (*id, flight.clone())
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let flight = start().boxed().shared();
                *slot = Some((id, flight.clone()));
                (id, flight)
            }
        };

        let result = flight.await;

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            *slot = None;
        }

        result
    }
}
