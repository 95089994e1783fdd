//! Shared query cache.
//!
//! Entries are keyed by [`QueryKey`] and hold type-erased data behind an
//! `Arc`, so a snapshot taken before an optimistic patch can be put back as the
//! very same value. Every fetch carries a generation number; cancelling or
//! restarting a fetch bumps it, and a result from an older generation is
//! dropped instead of written.

use chrono::{DateTime, Utc};
use lms_core::QueryKey;
use lms_core::environment::{Clock, SystemClock};
use lms_runtime::RetryPolicy;
use lms_runtime::metrics::QueryMetrics;
use lms_runtime::retry_with_predicate;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub(crate) type AnyData = Arc<dyn Any + Send + Sync>;

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryStatus {
    /// Never fetched.
    #[default]
    Idle,
    /// First fetch in flight, no data yet.
    Loading,
    /// Data present from the last successful fetch or write.
    Success,
    /// Last fetch failed (previous data, if any, is kept).
    Error,
}

/// Metadata of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryState {
    /// Entry status
    pub status: QueryStatus,
    /// When data was last written
    pub updated_at: Option<DateTime<Utc>>,
    /// Marked for refetch by an invalidation
    pub is_invalidated: bool,
    /// A fetch is in flight
    pub is_fetching: bool,
    /// Whether data is present
    pub has_data: bool,
}

impl QueryState {
    /// Whether the data is older than `stale_time` (or missing or invalidated).
    #[must_use]
    pub fn is_stale(&self, stale_time: Duration, now: DateTime<Utc>) -> bool {
        if self.is_invalidated || !self.has_data {
            return true;
        }
        let Some(updated_at) = self.updated_at else {
            return true;
        };
        (now - updated_at)
            .to_std()
            .is_ok_and(|age| age >= stale_time)
    }
}

#[derive(Default)]
struct Entry {
    data: Option<AnyData>,
    error: Option<AnyData>,
    status: QueryStatus,
    updated_at: Option<DateTime<Utc>>,
    invalidated: bool,
    fetching: bool,
    generation: u64,
    pending: Vec<PendingUpdate>,
}

impl Entry {
    fn state(&self) -> QueryState {
        QueryState {
            status: self.status,
            updated_at: self.updated_at,
            is_invalidated: self.invalidated,
            is_fetching: self.fetching,
            has_data: self.data.is_some(),
        }
    }

    fn write(&mut self, data: AnyData, now: DateTime<Utc>) {
        self.data = Some(data);
        self.error = None;
        self.status = QueryStatus::Success;
        self.updated_at = Some(now);
        self.invalidated = false;
    }

    /// Pop failed updates off the top of the stack, restoring each snapshot.
    /// Returns whether anything was restored.
    fn unwind_failed(&mut self) -> bool {
        let mut restored = false;
        while self.pending.last().is_some_and(|update| update.failed) {
            let Some(update) = self.pending.pop() else {
                break;
            };
            self.data = update.data;
            self.updated_at = update.updated_at;
            self.status = if self.data.is_some() {
                QueryStatus::Success
            } else {
                QueryStatus::Idle
            };
            restored = true;
        }
        restored
    }
}

/// An optimistic patch that has not settled yet, oldest first per key.
struct PendingUpdate {
    id: u64,
    data: Option<AnyData>,
    updated_at: Option<DateTime<Utc>>,
    failed: bool,
}

struct Inner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    clock: Arc<dyn Clock>,
    focused: AtomicBool,
    online: AtomicBool,
    next_mutation: AtomicU64,
}

/// Process-wide query cache.
///
/// Cheap to clone; all clones share the same entries.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .field("focused", &self.is_focused())
            .field("online", &self.is_online())
            .finish()
    }
}

impl QueryCache {
    /// Empty cache on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty cache on an explicit clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                clock,
                focused: AtomicBool::new(true),
                online: AtomicBool::new(true),
                next_mutation: AtomicU64::new(0),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current time on the cache clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether the cache has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Cached data for `key`, if present and of type `T`.
    #[must_use]
    pub fn get_query_data<T: Any + Send + Sync>(&self, key: &QueryKey) -> Option<Arc<T>> {
        let data = self.entries().get(key)?.data.clone()?;
        data.downcast::<T>().ok()
    }

    /// Replace the data for `key`.
    pub fn set_query_data<T: Any + Send + Sync>(&self, key: &QueryKey, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let now = self.now();
        self.entries()
            .entry(key.clone())
            .or_default()
            .write(Arc::clone(&value) as AnyData, now);
        value
    }

    /// Derive new data for `key` from the current data.
    ///
    /// `update` runs under the cache lock and must not touch the cache. When it
    /// returns `None` the entry is left as it is.
    pub fn update_query_data<T, F>(&self, key: &QueryKey, update: F) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let now = self.now();
        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_default();
        let current = entry.data.clone().and_then(|data| data.downcast::<T>().ok());
        let next = Arc::new(update(current.as_deref())?);
        entry.write(Arc::clone(&next) as AnyData, now);
        Some(next)
    }

    /// Metadata for `key`.
    #[must_use]
    pub fn state(&self, key: &QueryKey) -> Option<QueryState> {
        self.entries().get(key).map(Entry::state)
    }

    /// Mark every entry under `prefix` for refetch. Data stays visible.
    ///
    /// Returns the number of entries marked.
    pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
        let mut count = 0;
        for (key, entry) in self.entries().iter_mut() {
            if key.starts_with(prefix) {
                entry.invalidated = true;
                count += 1;
            }
        }
        tracing::debug!(%prefix, count, "Invalidated queries");
        count
    }

    /// Drop every entry under `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let count = before - entries.len();
        tracing::debug!(%prefix, count, "Removed queries");
        count
    }

    /// Cancel in-flight fetches under `prefix`; their results will not be
    /// written.
    ///
    /// Returns the number of fetches cancelled.
    pub fn cancel_queries(&self, prefix: &QueryKey) -> usize {
        let mut count = 0;
        for (key, entry) in self.entries().iter_mut() {
            if !key.starts_with(prefix) || !entry.fetching {
                continue;
            }
            entry.generation += 1;
            entry.fetching = false;
            if entry.status == QueryStatus::Loading {
                entry.status = QueryStatus::Idle;
            }
            count += 1;
        }
        if count > 0 {
            tracing::debug!(%prefix, count, "Cancelled in-flight fetches");
        }
        count
    }

    /// Record window focus. Polling without `refetch_interval_in_background`
    /// pauses while unfocused.
    pub fn set_focused(&self, focused: bool) {
        self.inner.focused.store(focused, Ordering::Relaxed);
    }

    /// Whether the window is focused.
    #[must_use]
    pub fn is_focused(&self) -> bool {
        self.inner.focused.load(Ordering::Relaxed)
    }

    /// Record network connectivity.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::Relaxed);
    }

    /// Whether the network is reachable.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Relaxed)
    }

    /// Fetch `key` and store the result, retrying every error per `policy`.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's last error once retries are exhausted. The
    /// previous data is kept and the error is recorded on the entry.
    pub async fn fetch_query<T, E, F, Fut>(
        &self,
        key: &QueryKey,
        policy: &RetryPolicy,
        fetcher: F,
    ) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        E: Clone + Display + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.fetch_query_with(key, policy, fetcher, |_| true).await
    }

    /// Like [`QueryCache::fetch_query`], retrying only errors accepted by
    /// `is_retryable`.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's last error.
    pub async fn fetch_query_with<T, E, F, Fut, P>(
        &self,
        key: &QueryKey,
        policy: &RetryPolicy,
        fetcher: F,
        is_retryable: P,
    ) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        E: Clone + Display + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let generation = self.begin_fetch(key);
        self.run_fetch(key, generation, policy, fetcher, is_retryable)
            .await
    }

    pub(crate) fn begin_fetch(&self, key: &QueryKey) -> u64 {
        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_default();
        entry.generation += 1;
        entry.fetching = true;
        if entry.data.is_none() {
            entry.status = QueryStatus::Loading;
        }
        entry.generation
    }

    pub(crate) async fn run_fetch<T, E, F, Fut, P>(
        &self,
        key: &QueryKey,
        generation: u64,
        policy: &RetryPolicy,
        fetcher: F,
        is_retryable: P,
    ) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        E: Clone + Display + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        tracing::debug!(%key, generation, "Fetching query");
        match retry_with_predicate(policy, fetcher, is_retryable).await {
            Ok(value) => {
                let value = Arc::new(value);
                if self.finish(key, generation, Ok(Arc::clone(&value) as AnyData)) {
                    QueryMetrics::record_fetch("success");
                } else {
                    tracing::debug!(%key, generation, "Discarding result of cancelled fetch");
                    QueryMetrics::record_fetch("cancelled");
                }
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(%key, error = %err, "Query fetch failed");
                if self.finish(key, generation, Err(Arc::new(err.clone()) as AnyData)) {
                    QueryMetrics::record_fetch("error");
                } else {
                    QueryMetrics::record_fetch("cancelled");
                }
                Err(err)
            }
        }
    }

    fn finish(&self, key: &QueryKey, generation: u64, outcome: Result<AnyData, AnyData>) -> bool {
        let now = self.now();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if entry.generation != generation {
            return false;
        }

        entry.fetching = false;
        match outcome {
            Ok(data) => entry.write(data, now),
            Err(error) => {
                entry.error = Some(error);
                entry.status = QueryStatus::Error;
            }
        }
        true
    }

    /// State, data and error of `key` read under one lock.
    pub(crate) fn view<T, E>(&self, key: &QueryKey) -> Option<(QueryState, Option<Arc<T>>, Option<E>)>
    where
        T: Any + Send + Sync,
        E: Any + Send + Sync + Clone,
    {
        let entries = self.entries();
        let entry = entries.get(key)?;
        let data = entry.data.clone().and_then(|data| data.downcast::<T>().ok());
        let error = entry
            .error
            .as_ref()
            .and_then(|error| error.downcast_ref::<E>())
            .cloned();
        Some((entry.state(), data, error))
    }

    /// Start an optimistic write: cancel fetches, capture the current data
    /// and apply `patch`. Returns the update id and whether data was present.
    pub(crate) fn begin_optimistic<T, F>(&self, key: &QueryKey, patch: F) -> (u64, bool)
    where
        T: Any + Send + Sync,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        self.cancel_queries(key);

        let id = self.inner.next_mutation.fetch_add(1, Ordering::Relaxed);
        let now = self.now();
        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_default();
        if !entry.pending.is_empty() {
            tracing::debug!(%key, id, pending = entry.pending.len(), "Optimistic update stacks on pending ones");
        }
        entry.pending.push(PendingUpdate {
            id,
            data: entry.data.clone(),
            updated_at: entry.updated_at,
            failed: false,
        });
        let had_data = entry.data.is_some();

        let current = entry.data.clone().and_then(|data| data.downcast::<T>().ok());
        if let Some(next) = patch(current.as_deref()) {
            entry.write(Arc::new(next) as AnyData, now);
        }
        (id, had_data)
    }

    /// Mark update `id` failed.
    ///
    /// Failed updates are unwound from the newest down: if no newer update of
    /// the key is pending, the snapshot is restored now (together with any
    /// older failed ones right below it). Otherwise the restore waits until
    /// the newer updates settle, and the key is invalidated meanwhile.
    pub(crate) fn rollback_optimistic(&self, key: &QueryKey, id: u64) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let Some(update) = entry.pending.iter_mut().find(|update| update.id == id) else {
            return false;
        };
        update.failed = true;

        let restored = entry.unwind_failed();
        if !restored {
            entry.invalidated = true;
        }
        restored
    }

    /// Settle update `id` as accepted and mark the key for refetch. Older
    /// failed updates waiting on it are unwound.
    pub(crate) fn commit_optimistic(&self, key: &QueryKey, id: u64) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            entry.pending.retain(|update| update.id != id);
            entry.unwind_failed();
            entry.invalidated = true;
        }
    }
}
