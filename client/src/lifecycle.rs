//! Per-request retry bookkeeping.
//!
//! Each logical request owns a [`RequestLifecycle`]. It records how far the
//! request got through the send / refresh / resend cycle and is the only thing
//! that decides whether a 401 may still be recovered. The transport request is
//! never annotated.
//!
//! ```text
//! Initial -> Sent -> Success
//!                 -> FailedOther
//!                 -> Failed401First -> Refreshing -> RetriedSuccess
//!                                                 -> RetriedFailed
//! ```

use std::fmt;

/// Where a logical request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Not sent yet.
    Initial,
    /// First attempt in flight.
    Sent,
    /// First attempt succeeded.
    Success,
    /// First attempt was rejected with a recoverable 401.
    Failed401First,
    /// Session recovery and the single resend are in progress.
    Refreshing,
    /// The resend succeeded.
    RetriedSuccess,
    /// Recovery failed or the resend failed.
    RetriedFailed,
    /// First attempt failed for any other reason.
    FailedOther,
}

impl RequestState {
    /// No transition leaves a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::RetriedSuccess | Self::RetriedFailed | Self::FailedOther
        )
    }
}

/// Result of one HTTP attempt, as seen by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx.
    Succeeded,
    /// 401 on an endpoint that takes part in session recovery.
    Unauthorized,
    /// Anything else (including 401 on auth endpoints and transport errors).
    Failed,
}

/// Inputs that move a lifecycle forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// An attempt is about to be dispatched.
    Dispatch,
    /// An attempt finished.
    Completed(AttemptOutcome),
    /// Session recovery started.
    RefreshStarted,
    /// Session recovery failed; nothing will be resent.
    RefreshFailed,
}

/// Rejected transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    /// State the lifecycle was in.
    pub from: RequestState,
    /// Event that does not apply to it.
    pub event: Event,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid request transition {:?} on {:?}", self.event, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

/// State machine for one logical request.
#[derive(Debug, Clone)]
pub struct RequestLifecycle {
    state: RequestState,
    attempts: u8,
}

impl Default for RequestLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLifecycle {
    /// Start a new lifecycle in [`RequestState::Initial`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RequestState::Initial,
            attempts: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// Number of attempts dispatched so far (at most 2).
    #[must_use]
    pub const fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Whether the request has already been resent after a refresh.
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        matches!(
            self.state,
            RequestState::Refreshing | RequestState::RetriedSuccess | RequestState::RetriedFailed
        ) && self.attempts > 1
    }

    /// Apply `event`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if `event` does not apply to the current
    /// state; the state is left unchanged.
    pub fn apply(&mut self, event: Event) -> Result<RequestState, InvalidTransition> {
        use AttemptOutcome::{Failed, Succeeded, Unauthorized};
        use RequestState::{
            FailedOther, Failed401First, Initial, Refreshing, RetriedFailed, RetriedSuccess, Sent,
            Success,
        };

        let next = match (self.state, event) {
            (Initial, Event::Dispatch) => Sent,
            (Sent, Event::Completed(Succeeded)) => Success,
            (Sent, Event::Completed(Unauthorized)) => Failed401First,
            (Sent, Event::Completed(Failed)) => FailedOther,
            (Failed401First, Event::RefreshStarted) => Refreshing,
            // The resend happens while still in Refreshing.
            (Refreshing, Event::Dispatch) if self.attempts == 1 => Refreshing,
            (Refreshing, Event::Completed(Succeeded)) if self.attempts == 2 => RetriedSuccess,
            (Refreshing, Event::Completed(Unauthorized | Failed)) if self.attempts == 2 => {
                RetriedFailed
            }
            (Refreshing, Event::RefreshFailed) if self.attempts == 1 => RetriedFailed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        if matches!(event, Event::Dispatch) {
            self.attempts += 1;
        }
        tracing::trace!(from = ?self.state, to = ?next, ?event, "Request transition");
        self.state = next;
        Ok(next)
    }
}
