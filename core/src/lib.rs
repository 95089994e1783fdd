//! # LMS Core
//!
//! Core types shared by the LMS API client crates.
//!
//! This crate holds the pieces every other crate depends on and that carry no
//! I/O of their own:
//!
//! - **Session**: access/refresh token pair plus the signed-in user
//! - **`SessionStore`**: injected token store with atomic clear
//! - **Navigator**: where the client sends the user when the session ends
//! - **`QueryKey`**: composite cache key `(resource, params...)`
//! - **`ErrorBody`**: the normalized error payload returned by the API
//! - **Clock**: abstracted time for deterministic tests
//!
//! ## Example
//!
//! ```
//! use lms_core::query_key::QueryKey;
//! use serde_json::json;
//!
//! let a = QueryKey::new("classes").with(json!({ "page": 1, "search": "math" }));
//! let b = QueryKey::new("classes").with(json!({ "search": "math", "page": 1 }));
//! assert_eq!(a, b);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod error;
pub mod id;
pub mod navigator;
pub mod query_key;
pub mod session;

pub use error::ErrorBody;
pub use id::RecordId;
pub use navigator::Navigator;
pub use query_key::QueryKey;
pub use session::{MemorySessionStore, Role, Session, SessionStore, TokenPair, UserRecord};

/// Environment module - injected dependencies that abstract the outside world
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
