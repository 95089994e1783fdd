//! # LMS Query
//!
//! Stale-while-revalidate cache for API reads, with optimistic writes.
//!
//! - **`QueryCache`**: shared entries keyed by `QueryKey`, fetch generations
//!   so cancelled fetches never write
//! - **`Query`**: observer returning cached data immediately plus freshness,
//!   with background revalidation, focus/reconnect refetch and polling
//! - **`Mutation`** / **`OptimisticUpdate`**: patch, call, then commit or
//!   roll back to the exact captured value
//!
//! ## Example
//!
//! ```
//! use lms_core::QueryKey;
//! use lms_query::{QueryCache, QueryOptions, Query};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = QueryCache::new();
//! let query = Query::new(
//!     cache.clone(),
//!     QueryKey::new("badges"),
//!     QueryOptions::default().retry(0),
//!     |_key| async { Ok::<_, String>(vec!["Rajin", "Teladan"]) },
//! );
//!
//! let first = query.revalidate();
//! assert!(first.snapshot.is_loading);
//! if let Some(task) = first.task {
//!     let _ = task.await;
//! }
//!
//! assert_eq!(query.snapshot().data.map(|badges| badges.len()), Some(2));
//! # }
//! ```

pub mod cache;
pub mod mutation;
pub mod observer;
pub mod options;

pub use cache::{QueryCache, QueryState, QueryStatus};
pub use mutation::{Mutation, OptimisticUpdate};
pub use observer::{PollHandle, Query, QuerySnapshot, Revalidation};
pub use options::QueryOptions;
