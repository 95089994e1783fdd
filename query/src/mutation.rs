//! Optimistic mutations.
//!
//! A write that should show up before the server confirms it runs in three
//! explicit phases:
//!
//! 1. [`OptimisticUpdate::begin`] cancels in-flight fetches for the key,
//!    captures the current data and applies the patch;
//! 2. the network call runs;
//! 3. [`OptimisticUpdate::commit`] marks the key for refetch, or
//!    [`OptimisticUpdate::rollback`] puts the captured data back unchanged.
//!
//! [`Mutation`] wires the three phases around a mutation function.
//!
//! Updates of one key stack up: each captures the data as the previous one
//! left it. A failed update is unwound as soon as no newer update of the key
//! is pending, so once every update has settled the cache never shows the
//! patch of a failed one. Until then the key is invalidated.

use futures::future::{BoxFuture, FutureExt};
use lms_core::QueryKey;
use lms_runtime::metrics::MutationMetrics;
use std::any::Any;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;

use crate::cache::QueryCache;

/// An applied optimistic patch awaiting the server's verdict.
#[must_use = "an optimistic update must be committed or rolled back"]
pub struct OptimisticUpdate {
    cache: QueryCache,
    key: QueryKey,
    id: u64,
    had_data: bool,
}

impl fmt::Debug for OptimisticUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticUpdate")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("had_data", &self.had_data)
            .finish()
    }
}

impl OptimisticUpdate {
    /// Cancel fetches for `key`, capture its data and apply `patch`.
    ///
    /// If another update of the same key is still pending, the capture is the
    /// already-patched data. `patch` runs under the cache lock; returning
    /// `None` leaves the data as it is.
    pub fn begin<T, F>(cache: &QueryCache, key: &QueryKey, patch: F) -> Self
    where
        T: Any + Send + Sync,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let (id, had_data) = cache.begin_optimistic(key, patch);
        tracing::debug!(%key, id, "Applied optimistic update");
        Self {
            cache: cache.clone(),
            key: key.clone(),
            id,
            had_data,
        }
    }

    /// Key this update patched.
    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The server accepted the write: mark the key for refetch.
    pub fn commit(self) {
        self.cache.commit_optimistic(&self.key, self.id);
        tracing::debug!(key = %self.key, id = self.id, "Committed optimistic update");
    }

    /// The server rejected the write: restore the captured data.
    ///
    /// Returns `false` when a newer update of the key is still pending; the
    /// restore then happens once that update settles, and the key is
    /// invalidated meanwhile.
    pub fn rollback(self) -> bool {
        MutationMetrics::record_rollback();
        let restored = self.cache.rollback_optimistic(&self.key, self.id);
        if restored {
            tracing::info!(key = %self.key, id = self.id, "Rolled back optimistic update");
        } else {
            tracing::info!(
                key = %self.key,
                id = self.id,
                "Rollback deferred until newer updates settle"
            );
        }
        restored
    }
}

type MutateFn<V, R, E> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;
type ApplyFn<V> = Arc<dyn Fn(&V, &QueryCache) -> OptimisticUpdate + Send + Sync>;

/// A write with optional optimistic patch and invalidation on success.
pub struct Mutation<V, R, E> {
    cache: QueryCache,
    mutate: MutateFn<V, R, E>,
    optimistic: Option<ApplyFn<V>>,
    invalidates: Vec<QueryKey>,
}

impl<V, R, E> Clone for Mutation<V, R, E> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            mutate: Arc::clone(&self.mutate),
            optimistic: self.optimistic.clone(),
            invalidates: self.invalidates.clone(),
        }
    }
}

impl<V, R, E> fmt::Debug for Mutation<V, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("optimistic", &self.optimistic.is_some())
            .field("invalidates", &self.invalidates)
            .finish_non_exhaustive()
    }
}

impl<V, R, E> Mutation<V, R, E>
where
    V: Send + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    /// Mutation running `mutate` against `cache`.
    pub fn new<F, Fut>(cache: QueryCache, mutate: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Self {
            cache,
            mutate: Arc::new(move |vars| mutate(vars).boxed()),
            optimistic: None,
            invalidates: Vec::new(),
        }
    }

    /// Patch `key` optimistically from the variables before the call runs.
    #[must_use]
    pub fn optimistic<T, P>(mut self, key: QueryKey, patch: P) -> Self
    where
        T: Any + Send + Sync,
        P: Fn(&V, Option<&T>) -> Option<T> + Send + Sync + 'static,
    {
        self.optimistic = Some(Arc::new(move |vars: &V, cache: &QueryCache| {
            OptimisticUpdate::begin::<T, _>(cache, &key, |current| patch(vars, current))
        }));
        self
    }

    /// Also invalidate every key under `prefix` on success.
    #[must_use]
    pub fn invalidates(mut self, prefix: QueryKey) -> Self {
        self.invalidates.push(prefix);
        self
    }

    /// Run the mutation.
    ///
    /// # Errors
    ///
    /// Returns the mutation function's error after the optimistic patch has
    /// been rolled back.
    pub async fn execute(&self, vars: V) -> Result<R, E> {
        let update = self
            .optimistic
            .as_ref()
            .map(|apply| apply(&vars, &self.cache));

        match (self.mutate)(vars).await {
            Ok(response) => {
                if let Some(update) = update {
                    update.commit();
                }
                for prefix in &self.invalidates {
                    self.cache.invalidate_queries(prefix);
                }
                MutationMetrics::record_commit();
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Mutation failed");
                if let Some(update) = update {
                    update.rollback();
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio_test::{assert_err, assert_ok};

    fn list_key() -> QueryKey {
        QueryKey::new("assignments").with("list")
    }

    #[test]
    fn test_rollback_restores_same_value() {
        let cache = QueryCache::new();
        let key = list_key();
        let before = cache.set_query_data(&key, json!({ "rows": ["A", "B"], "total": 2 }));

        let update = OptimisticUpdate::begin(&cache, &key, |current: Option<&Value>| {
            let mut next = current.cloned()?;
            next["total"] = json!(1);
            Some(next)
        });
        assert_eq!(cache.get_query_data::<Value>(&key).unwrap()["total"], 1);

        assert!(update.rollback());
        let after = cache.get_query_data::<Value>(&key).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(*after, json!({ "rows": ["A", "B"], "total": 2 }));
    }

    #[test]
    fn test_commit_invalidates() {
        let cache = QueryCache::new();
        let key = list_key();
        cache.set_query_data(&key, vec![1_u32, 2]);

        let update = OptimisticUpdate::begin(&cache, &key, |current: Option<&Vec<u32>>| {
            current.map(|rows| rows.iter().copied().filter(|&n| n != 2).collect())
        });
        update.commit();

        assert_eq!(cache.get_query_data::<Vec<u32>>(&key).as_deref(), Some(&vec![1]));
        assert!(cache.state(&key).unwrap().is_invalidated);
    }

    fn remove(target: &'static str) -> impl FnOnce(Option<&Vec<&'static str>>) -> Option<Vec<&'static str>> {
        move |current| current.map(|rows| rows.iter().copied().filter(|row| *row != target).collect())
    }

    #[test]
    fn test_newest_failure_first_unwinds_both() {
        let cache = QueryCache::new();
        let key = list_key();
        cache.set_query_data(&key, vec!["A", "B", "C"]);

        let first = OptimisticUpdate::begin(&cache, &key, remove("B"));
        let second = OptimisticUpdate::begin(&cache, &key, remove("C"));
        assert_eq!(cache.get_query_data::<Vec<&str>>(&key).as_deref(), Some(&vec!["A"]));

        assert!(second.rollback());
        assert_eq!(cache.get_query_data::<Vec<&str>>(&key).as_deref(), Some(&vec!["A", "C"]));

        assert!(first.rollback());
        assert_eq!(
            cache.get_query_data::<Vec<&str>>(&key).as_deref(),
            Some(&vec!["A", "B", "C"])
        );
    }

    #[test]
    fn test_older_failure_waits_for_newer_update() {
        let cache = QueryCache::new();
        let key = list_key();
        cache.set_query_data(&key, vec!["A", "B", "C"]);

        let first = OptimisticUpdate::begin(&cache, &key, remove("B"));
        let second = OptimisticUpdate::begin(&cache, &key, remove("C"));

        // The newer patch is still pending, so nothing is restored yet.
        assert!(!first.rollback());
        assert_eq!(cache.get_query_data::<Vec<&str>>(&key).as_deref(), Some(&vec!["A"]));
        assert!(cache.state(&key).unwrap().is_invalidated);

        assert!(second.rollback());
        assert_eq!(
            cache.get_query_data::<Vec<&str>>(&key).as_deref(),
            Some(&vec!["A", "B", "C"])
        );
    }

    #[test]
    fn test_commit_releases_older_failed_update() {
        let cache = QueryCache::new();
        let key = list_key();
        cache.set_query_data(&key, vec!["A", "B", "C"]);

        let first = OptimisticUpdate::begin(&cache, &key, remove("B"));
        let second = OptimisticUpdate::begin(&cache, &key, remove("C"));

        assert!(!first.rollback());
        second.commit();

        // The failed removal of B is gone; the key refetches for C.
        let rows = cache.get_query_data::<Vec<&str>>(&key).unwrap();
        assert!(rows.contains(&"B"));
        assert!(cache.state(&key).unwrap().is_invalidated);
    }

    #[tokio::test]
    async fn test_failed_delete_rolls_back() {
        let cache = QueryCache::new();
        let key = list_key();
        cache.set_query_data(&key, vec!["A".to_string(), "B".to_string(), "C".to_string()]);

        let delete = Mutation::new(cache.clone(), |_id: String| async {
            Err::<(), _>("500 Internal Server Error".to_string())
        })
        .optimistic(key.clone(), |id: &String, rows: Option<&Vec<String>>| {
            rows.map(|rows| rows.iter().filter(|row| *row != id).cloned().collect())
        });

        assert_err!(delete.execute("B".to_string()).await);
        assert_eq!(
            cache.get_query_data::<Vec<String>>(&key).as_deref(),
            Some(&vec!["A".to_string(), "B".to_string(), "C".to_string()])
        );
    }

    #[tokio::test]
    async fn test_success_invalidates_related_keys() {
        let cache = QueryCache::new();
        let list = list_key();
        let detail = QueryKey::new("assignments").with("detail").with(7);
        cache.set_query_data(&list, vec![7_u32]);
        cache.set_query_data(&detail, 7_u32);

        let archive = Mutation::new(cache.clone(), |id: u32| async move { Ok::<_, String>(id) })
            .optimistic(list.clone(), |id: &u32, rows: Option<&Vec<u32>>| {
                rows.map(|rows| rows.iter().copied().filter(|row| row != id).collect())
            })
            .invalidates(QueryKey::new("assignments").with("detail"));

        assert_eq!(assert_ok!(archive.execute(7).await), 7);
        assert!(cache.get_query_data::<Vec<u32>>(&list).unwrap().is_empty());
        assert!(cache.state(&list).unwrap().is_invalidated);
        assert!(cache.state(&detail).unwrap().is_invalidated);
    }
}
