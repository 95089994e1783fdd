//! # LMS Testing
//!
//! Test doubles and fixtures for the LMS client crates.
//!
//! This crate provides:
//! - Clocks: [`FixedClock`] and the steppable [`ManualClock`]
//! - [`RecordingNavigator`]: a router that remembers every redirect
//! - Session fixtures
//!
//! ## Example
//!
//! ```
//! use lms_core::Navigator;
//! use lms_testing::RecordingNavigator;
//!
//! let navigator = RecordingNavigator::at("/kelas");
//! navigator.redirect("/sign-in");
//!
//! assert_eq!(navigator.current_path(), "/sign-in");
//! assert_eq!(navigator.redirects(), vec!["/sign-in".to_string()]);
//! ```

use chrono::{DateTime, Utc};
use lms_core::environment::Clock;

/// Mock implementations of the injected seams.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use lms_core::Navigator;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use lms_testing::mocks::FixedClock;
    /// use lms_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Clock that only moves when told to.
    ///
    /// Starts at the same instant as [`test_clock`].
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(epoch())
        }
    }

    impl ManualClock {
        /// Clock stopped at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time = time.checked_add_signed(by).unwrap_or(*time);
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Router double that records redirects.
    ///
    /// A redirect also moves [`Navigator::current_path`], like a real router.
    #[derive(Debug)]
    pub struct RecordingNavigator {
        path: Mutex<String>,
        redirects: Mutex<Vec<String>>,
    }

    impl RecordingNavigator {
        /// Navigator currently showing `path`.
        #[must_use]
        pub fn at(path: impl Into<String>) -> Self {
            Self {
                path: Mutex::new(path.into()),
                redirects: Mutex::new(Vec::new()),
            }
        }

        /// Every redirect so far, oldest first.
        #[must_use]
        pub fn redirects(&self) -> Vec<String> {
            self.redirects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Number of redirects so far.
        #[must_use]
        pub fn redirect_count(&self) -> usize {
            self.redirects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        /// Move to `path` without recording a redirect (user navigation).
        pub fn visit(&self, path: impl Into<String>) {
            *self.path.lock().unwrap_or_else(PoisonError::into_inner) = path.into();
        }
    }

    impl Navigator for RecordingNavigator {
        fn current_path(&self) -> String {
            self.path
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn redirect(&self, path: &str) {
            self.redirects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(path.to_string());
            self.visit(path);
        }
    }
}

/// Session fixtures.
pub mod fixtures {
    use lms_core::{RecordId, Role, Session, TokenPair, UserRecord};

    /// A user with the given id and role.
    #[must_use]
    pub fn user(id: i64, role: Role) -> UserRecord {
        UserRecord {
            id: RecordId::from(id),
            name: format!("User {id}"),
            email: format!("user{id}@sekolah.id"),
            role,
            extra: serde_json::Map::new(),
        }
    }

    /// A teacher session holding the given tokens.
    #[must_use]
    pub fn session(access_token: &str, refresh_token: &str) -> Session {
        Session::new(
            TokenPair {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
            },
            user(1, Role::Teacher),
        )
    }

    /// Login response body for [`session`].
    #[must_use]
    pub fn login_body(access_token: &str, refresh_token: &str) -> serde_json::Value {
        serde_json::json!({
            "accessToken": access_token,
            "refreshToken": refresh_token,
            "user": {
                "id": 1,
                "name": "User 1",
                "email": "user1@sekolah.id",
                "role": "teacher"
            }
        })
    }
}

/// Install a test subscriber once; later calls are no-ops.
///
/// Honors `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use fixtures::{login_body, session, user};
pub use mocks::{FixedClock, ManualClock, RecordingNavigator, test_clock};
