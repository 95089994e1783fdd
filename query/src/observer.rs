//! Query observers.
//!
//! A [`Query`] binds a key, a fetcher and [`QueryOptions`] to a shared
//! [`QueryCache`]. Reading never waits for the network: [`Query::snapshot`]
//! returns whatever the cache holds together with its freshness, and the
//! revalidation helpers start a background fetch when the data is stale.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use lms_core::QueryKey;
use lms_runtime::metrics::QueryMetrics;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::{QueryCache, QueryStatus};
use crate::options::QueryOptions;

type Fetcher<T, E> = Arc<dyn Fn(QueryKey) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type RetryIf<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// What an observer shows at one instant.
#[derive(Debug)]
pub struct QuerySnapshot<T, E> {
    /// Data to render (possibly a placeholder from the previous key)
    pub data: Option<Arc<T>>,
    /// Error of the last failed fetch
    pub error: Option<E>,
    /// Entry status
    pub status: QueryStatus,
    /// No data to show yet and a fetch is in flight
    pub is_loading: bool,
    /// A fetch for this key is in flight
    pub is_fetching: bool,
    /// Data is missing, invalidated or older than `stale_time`
    pub is_stale: bool,
    /// `data` belongs to the previous key
    pub is_placeholder_data: bool,
    /// When the data was written
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T, E: Clone> Clone for QuerySnapshot<T, E> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            status: self.status,
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            is_placeholder_data: self.is_placeholder_data,
            updated_at: self.updated_at,
        }
    }
}

/// Snapshot plus the background fetch it started, if any.
#[derive(Debug)]
pub struct Revalidation<T, E> {
    /// State at the time of the call
    pub snapshot: QuerySnapshot<T, E>,
    /// Background fetch
    pub task: Option<JoinHandle<Result<Arc<T>, E>>>,
}

/// Running poller. Dropping the handle stops polling.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop polling.
    pub fn stop(self) {
        drop(self);
    }

    /// Whether the poller has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Observer of one query.
///
/// Cheap to clone; clones share the current key, so a key change is seen by
/// a running poller too.
pub struct Query<T, E> {
    cache: QueryCache,
    key: Arc<RwLock<QueryKey>>,
    previous: Arc<Mutex<Option<Arc<T>>>>,
    options: QueryOptions,
    fetcher: Fetcher<T, E>,
    retry_if: RetryIf<E>,
}

impl<T, E> Clone for Query<T, E> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            key: Arc::clone(&self.key),
            previous: Arc::clone(&self.previous),
            options: self.options.clone(),
            fetcher: Arc::clone(&self.fetcher),
            retry_if: Arc::clone(&self.retry_if),
        }
    }
}

impl<T, E> fmt::Debug for Query<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T, E> Query<T, E> {
    /// Current key.
    #[must_use]
    pub fn key(&self) -> QueryKey {
        self.key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Options of this observer.
    #[must_use]
    pub const fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Cache this observer reads from.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }
}

impl<T, E> Query<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Display + Send + Sync + 'static,
{
    /// Observe `key`, loading it with `fetcher`.
    pub fn new<F, Fut>(cache: QueryCache, key: QueryKey, options: QueryOptions, fetcher: F) -> Self
    where
        F: Fn(QueryKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            cache,
            key: Arc::new(RwLock::new(key)),
            previous: Arc::new(Mutex::new(None)),
            options,
            fetcher: Arc::new(move |key| fetcher(key).boxed()),
            retry_if: Arc::new(|_: &E| true),
        }
    }

    /// Only retry errors accepted by `predicate` (every error by default).
    #[must_use]
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Arc::new(predicate);
        self
    }

    /// Current view of the cache for this key.
    #[must_use]
    pub fn snapshot(&self) -> QuerySnapshot<T, E> {
        let key = self.key();
        let now = self.cache.now();
        let view = self.cache.view::<T, E>(&key);

        let (state, cached, error) = match view {
            Some((state, data, error)) => (Some(state), data, error),
            None => (None, None, None),
        };
        if cached.is_some() {
            QueryMetrics::record_cache_hit();
        }

        let placeholder = if cached.is_none() && self.options.keep_previous_data {
            self.previous
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        } else {
            None
        };
        let is_placeholder_data = placeholder.is_some();
        let data = cached.or(placeholder);
        let is_fetching = state.is_some_and(|state| state.is_fetching);

        QuerySnapshot {
            is_loading: data.is_none() && is_fetching,
            is_fetching,
            is_stale: state.is_none_or(|state| state.is_stale(self.options.stale_time, now)),
            is_placeholder_data,
            status: state.map_or(QueryStatus::Idle, |state| state.status),
            updated_at: state.and_then(|state| state.updated_at),
            data,
            error,
        }
    }

    /// Whether reading now should start a fetch: the key is new, stale or
    /// invalidated, fetching is enabled, and no fetch is already running.
    #[must_use]
    pub fn needs_fetch(&self) -> bool {
        if !self.options.enabled {
            return false;
        }
        match self.cache.state(&self.key()) {
            None => true,
            Some(state) => {
                !state.is_fetching && state.is_stale(self.options.stale_time, self.cache.now())
            }
        }
    }

    /// Fetch now and wait for the result.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's last error after retries.
    pub async fn refetch(&self) -> Result<Arc<T>, E> {
        let key = self.key();
        let generation = self.cache.begin_fetch(&key);
        self.run(key, generation).await
    }

    async fn run(&self, key: QueryKey, generation: u64) -> Result<Arc<T>, E> {
        let fetcher = Arc::clone(&self.fetcher);
        let retry_if = Arc::clone(&self.retry_if);
        let fetch_key = key.clone();
        self.cache
            .run_fetch(
                &key,
                generation,
                &self.options.retry_policy(),
                move || fetcher(fetch_key.clone()),
                move |err| retry_if(err),
            )
            .await
    }

    fn spawn_fetch(&self) -> JoinHandle<Result<Arc<T>, E>> {
        let key = self.key();
        let generation = self.cache.begin_fetch(&key);
        let this = self.clone();
        tokio::spawn(async move { this.run(key, generation).await })
    }

    /// Stale-while-revalidate read: return the cached state at once and, if
    /// it needs a fetch, start one in the background.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn revalidate(&self) -> Revalidation<T, E> {
        let task = self.needs_fetch().then(|| self.spawn_fetch());
        Revalidation {
            snapshot: self.snapshot(),
            task,
        }
    }

    /// The window regained focus.
    pub fn on_window_focus(&self) -> Option<JoinHandle<Result<Arc<T>, E>>> {
        self.cache.set_focused(true);
        if !self.options.refetch_on_window_focus || !self.needs_fetch() {
            return None;
        }
        tracing::debug!(key = %self.key(), "Revalidating on focus");
        Some(self.spawn_fetch())
    }

    /// The network came back.
    pub fn on_reconnect(&self) -> Option<JoinHandle<Result<Arc<T>, E>>> {
        self.cache.set_online(true);
        if !self.options.refetch_on_reconnect || !self.needs_fetch() {
            return None;
        }
        tracing::debug!(key = %self.key(), "Revalidating on reconnect");
        Some(self.spawn_fetch())
    }

    /// Start polling every `refetch_interval`; `None` when no interval is set
    /// or fetching is disabled.
    ///
    /// Ticks are skipped while the window is unfocused unless
    /// `refetch_interval_in_background` is set.
    #[must_use]
    pub fn start_polling(&self) -> Option<PollHandle> {
        let period = self.options.refetch_interval.filter(|p| !p.is_zero())?;
        if !self.options.enabled {
            return None;
        }

        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !this.options.refetch_interval_in_background && !this.cache.is_focused() {
                    tracing::trace!(key = %this.key(), "Window hidden, skipping poll");
                    continue;
                }
                if let Err(err) = this.refetch().await {
                    tracing::debug!(key = %this.key(), error = %err, "Poll failed");
                }
            }
        });
        Some(PollHandle { task })
    }

    /// Switch to another key.
    ///
    /// With `keep_previous_data`, the old key's data is shown as a placeholder
    /// until the new key has data of its own.
    pub fn set_key(&self, key: QueryKey) {
        let mut current = self.key.write().unwrap_or_else(PoisonError::into_inner);
        if *current == key {
            return;
        }
        if self.options.keep_previous_data {
            if let Some(data) = self.cache.get_query_data::<T>(&current) {
                *self.previous.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
            }
        }
        tracing::debug!(from = %*current, to = %key, "Query key changed");
        *current = key;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lms_testing::ManualClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_query(
        cache: &QueryCache,
        key: QueryKey,
        options: QueryOptions,
    ) -> (Query<String, String>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let query = Query::new(cache.clone(), key, options, move |key: QueryKey| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, String>(format!("{key}#{n}")) }
        });
        (query, calls)
    }

    #[tokio::test]
    async fn test_stale_while_revalidate() {
        let cache = QueryCache::new();
        let key = QueryKey::new("classes");
        cache.set_query_data(&key, "cached".to_string());
        let (query, calls) = counting_query(&cache, key, QueryOptions::default());

        let revalidation = query.revalidate();

        assert_eq!(revalidation.snapshot.data.as_deref().map(String::as_str), Some("cached"));
        assert!(!revalidation.snapshot.is_loading);
        assert!(revalidation.snapshot.is_fetching);

        revalidation.task.unwrap().await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            query.snapshot().data.as_deref().map(String::as_str),
            Some("[\"classes\"]#1")
        );
    }

    #[tokio::test]
    async fn test_fresh_data_is_not_refetched() {
        let clock = Arc::new(ManualClock::default());
        let cache = QueryCache::with_clock(clock.clone());
        let options = QueryOptions::default().stale_time(Duration::from_secs(60));
        let (query, calls) = counting_query(&cache, QueryKey::new("badges"), options);

        let first = query.revalidate();
        assert!(first.snapshot.is_loading);
        first.task.unwrap().await.unwrap().unwrap();
        assert!(query.revalidate().task.is_none());
        assert!(query.on_window_focus().is_none());

        clock.advance(Duration::from_secs(61));
        assert!(query.needs_fetch());
        query.on_window_focus().unwrap().await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidation_forces_refetch() {
        let cache = QueryCache::new();
        let options = QueryOptions::default().stale_time(Duration::from_secs(3600));
        let (query, _) = counting_query(&cache, QueryKey::new("exams"), options);
        query.refetch().await.unwrap();
        assert!(!query.needs_fetch());

        cache.invalidate_queries(&QueryKey::new("exams"));
        let snapshot = query.snapshot();
        assert!(snapshot.is_stale);
        assert!(snapshot.data.is_some());
        assert!(query.needs_fetch());
    }

    #[tokio::test]
    async fn test_disabled_focus_refetch() {
        let cache = QueryCache::new();
        let options = QueryOptions::default()
            .refetch_on_window_focus(false)
            .refetch_on_reconnect(false);
        let (query, calls) = counting_query(&cache, QueryKey::new("quizzes"), options);

        assert!(query.on_window_focus().is_none());
        assert!(query.on_reconnect().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keep_previous_data() {
        let cache = QueryCache::new();
        let page1 = QueryKey::new("classes").with(json!({ "page": 1 }));
        let page2 = QueryKey::new("classes").with(json!({ "page": 2 }));
        let options = QueryOptions::default().keep_previous_data(true);
        let (query, _) = counting_query(&cache, page1, options);
        query.refetch().await.unwrap();

        query.set_key(page2);
        let revalidation = query.revalidate();
        assert!(revalidation.snapshot.is_placeholder_data);
        assert!(!revalidation.snapshot.is_loading);
        assert!(
            revalidation
                .snapshot
                .data
                .as_deref()
                .is_some_and(|data| data.contains("\"page\":1"))
        );

        revalidation.task.unwrap().await.unwrap().unwrap();
        let snapshot = query.snapshot();
        assert!(!snapshot.is_placeholder_data);
        assert!(snapshot.data.as_deref().is_some_and(|data| data.contains("\"page\":2")));
    }

    #[tokio::test]
    async fn test_without_keep_previous_data_new_key_loads() {
        let cache = QueryCache::new();
        let (query, _) = counting_query(&cache, QueryKey::new("a"), QueryOptions::default());
        query.refetch().await.unwrap();

        query.set_key(QueryKey::new("b"));
        let snapshot = query.revalidate().snapshot;
        assert!(snapshot.data.is_none());
        assert!(snapshot.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_on_drop() {
        let cache = QueryCache::new();
        let options = QueryOptions::default().refetch_interval(Duration::from_secs(5));
        let (query, calls) = counting_query(&cache, QueryKey::new("parent-reports"), options);

        let handle = query.start_polling().unwrap();
        tokio::time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_pauses_in_background() {
        let cache = QueryCache::new();
        let options = QueryOptions::default().refetch_interval(Duration::from_secs(5));
        let (query, calls) = counting_query(&cache, QueryKey::new("badges"), options);

        cache.set_focused(false);
        let _handle = query.start_polling().unwrap();
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cache.set_focused(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_polling_without_interval() {
        let cache = QueryCache::new();
        let (query, _) = counting_query(&cache, QueryKey::new("x"), QueryOptions::default());
        assert!(query.start_polling().is_none());
    }
}
