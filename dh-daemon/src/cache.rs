//! Result cache for aggregation pipelines.
//!
//! Results are memoized per `(resource, pipeline)` for a configurable TTL.
//! Concurrent requests for the same key share a single engine call: the
//! first caller starts it, later callers join it and receive the same result,
//! including the same failure. The engine call runs as its own task, so a
//! caller that stops waiting does not cancel it for the others.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use dh_core::{CacheKey, EngineError, Pipeline, Row};

use crate::engine::AggregationEngine;

/// How long a result stays fresh unless configured otherwise.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Shared, immutable engine output.
pub type Rows = Arc<Vec<Row>>;

type Fetch = Shared<BoxFuture<'static, Result<Rows, EngineError>>>;
type Table = Arc<Mutex<HashMap<CacheKey, Slot>>>;

/// A stored engine result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub rows: Rows,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

enum Slot {
    Ready(CacheEntry),
    Pending(Fetch),
}

enum Lookup {
    Hit(Rows),
    Join(Fetch),
    Miss,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    engine_calls: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub joins: u64,
    pub engine_calls: u64,
    pub failures: u64,
}

/// Deduplicating TTL cache in front of an [`AggregationEngine`].
pub struct ResultCache {
    engine: Arc<dyn AggregationEngine>,
    ttl: Duration,
    table: Table,
    counters: Arc<Counters>,
}

impl ResultCache {
    pub fn new(engine: Arc<dyn AggregationEngine>, ttl: Duration) -> Self {
        Self {
            engine,
            ttl,
            table: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Key under which `pipeline` run against `resource` is stored.
    pub fn key_for(resource: &str, pipeline: &Pipeline) -> CacheKey {
        CacheKey::derive(resource, pipeline)
    }

    /// Rows for `pipeline` run against `resource`.
    ///
    /// Serves a fresh entry when there is one, joins the in-flight engine
    /// call for the key when there is one, and otherwise starts a new call.
    pub async fn get(&self, resource: &str, pipeline: &Pipeline) -> Result<Rows, EngineError> {
        let key = Self::key_for(resource, pipeline);

        let fetch = {
            let mut table = lock_table(&self.table);
            let lookup = match table.get(&key) {
                Some(Slot::Ready(entry)) if entry.is_fresh_at(Instant::now()) => {
                    Lookup::Hit(Arc::clone(&entry.rows))
                }
                Some(Slot::Pending(fetch)) => Lookup::Join(fetch.clone()),
                _ => Lookup::Miss,
            };

            match lookup {
                Lookup::Hit(rows) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, resource, "aggregation cache hit");
                    return Ok(rows);
                }
                Lookup::Join(fetch) => {
                    self.counters.joins.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, resource, "joining in-flight aggregation");
                    fetch
                }
                Lookup::Miss => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, resource, "aggregation cache miss");
                    let fetch = self.start_fetch(key, resource, pipeline);
                    table.insert(key, Slot::Pending(fetch.clone()));
                    fetch
                }
            }
        };

        fetch.await
    }

    /// Spawn the engine call for `key`. The task stores its own result, so it
    /// completes even if every caller has gone away.
    fn start_fetch(&self, key: CacheKey, resource: &str, pipeline: &Pipeline) -> Fetch {
        let engine = Arc::clone(&self.engine);
        let table = Arc::clone(&self.table);
        let counters = Arc::clone(&self.counters);
        let ttl = self.ttl;
        let resource = resource.to_string();
        let pipeline = pipeline.clone();

        let task = tokio::spawn(async move {
            counters.engine_calls.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            let result = engine.aggregate(&resource, &pipeline).await.map(Arc::new);

            let mut slots = lock_table(&table);
            match &result {
                Ok(rows) => {
                    debug!(
                        %key,
                        resource = %resource,
                        rows = rows.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "aggregation stored"
                    );
                    slots.insert(
                        key,
                        Slot::Ready(CacheEntry {
                            key,
                            rows: Arc::clone(rows),
                            inserted_at: Instant::now(),
                            ttl,
                        }),
                    );
                }
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(%key, resource = %resource, "aggregation failed: {}", e);
                    slots.remove(&key);
                }
            }
            result
        });

        let table = Arc::clone(&self.table);
        async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    lock_table(&table).remove(&key);
                    Err(EngineError::new(format!(
                        "aggregation task aborted: {}",
                        join_error
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Stored entry for `key`, fresh or not.
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        match lock_table(&self.table).get(key) {
            Some(Slot::Ready(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Number of stored entries, including stale ones awaiting refresh.
    pub fn len(&self) -> usize {
        lock_table(&self.table)
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, in_flight) = {
            let table = lock_table(&self.table);
            let in_flight = table
                .values()
                .filter(|slot| matches!(slot, Slot::Pending(_)))
                .count();
            (table.len() - in_flight, in_flight)
        };
        CacheStats {
            entries,
            in_flight,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            joins: self.counters.joins.load(Ordering::Relaxed),
            engine_calls: self.counters.engine_calls.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

/// Acquire the table lock, recovering from a poisoned mutex. Slots are only
/// ever replaced whole, so a panicked holder cannot leave one half-written.
fn lock_table(table: &Mutex<HashMap<CacheKey, Slot>>) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
    match table.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Recovering from poisoned aggregation cache mutex");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineFuture;
    use dh_core::PipelineBuilder;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Engine stub that sleeps, counts calls and returns a fixed outcome.
    struct SlowEngine {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl SlowEngine {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AggregationEngine for SlowEngine {
        fn aggregate<'a>(
            &'a self,
            _resource: &'a str,
            _pipeline: &'a Pipeline,
        ) -> EngineFuture<'a, Vec<Row>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(self.delay).await;
                if self.fail {
                    return Err(EngineError::new("engine unavailable"));
                }
                let row = json!({"@type": "Ready", "count": call});
                Ok(vec![row.as_object().cloned().unwrap_or_default()])
            })
        }
    }

    fn census() -> Pipeline {
        PipelineBuilder::type_census()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_engine_call() {
        let engine = SlowEngine::new(Duration::from_millis(100), false);
        let cache = Arc::new(ResultCache::new(engine.clone(), DEFAULT_TTL));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get("devices", &census()).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(engine.calls(), 1);
        assert!(results.iter().all(|rows| Arc::ptr_eq(rows, &results[0])));

        let stats = cache.stats();
        assert_eq!(stats.engine_calls, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.joins, 49);
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_without_engine_call() {
        let engine = SlowEngine::new(Duration::from_millis(1), false);
        let cache = ResultCache::new(engine.clone(), DEFAULT_TTL);

        let first = cache.get("devices", &census()).await.unwrap();
        let second = cache.get("devices", &census()).await.unwrap();

        assert_eq!(engine.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_distinct_resources_are_cached_separately() {
        let engine = SlowEngine::new(Duration::from_millis(1), false);
        let cache = ResultCache::new(engine.clone(), DEFAULT_TTL);

        cache.get("devices", &census()).await.unwrap();
        cache.get("computers", &census()).await.unwrap();

        assert_eq!(engine.calls(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_recomputed() {
        let engine = SlowEngine::new(Duration::from_millis(1), false);
        let cache = ResultCache::new(engine.clone(), Duration::from_millis(40));

        let first = cache.get("devices", &census()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let key = ResultCache::key_for("devices", &census());
        let stale = cache.entry(&key).unwrap();
        assert!(!stale.is_fresh_at(Instant::now()));

        let second = cache.get("devices", &census()).await.unwrap();
        assert_eq!(engine.calls(), 2);
        assert_ne!(first, second);
        assert!(cache.entry(&key).unwrap().is_fresh_at(Instant::now()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_reaches_every_joiner() {
        let engine = SlowEngine::new(Duration::from_millis(100), true);
        let cache = Arc::new(ResultCache::new(engine.clone(), DEFAULT_TTL));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get("devices", &census()).await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.message(), "engine unavailable");
        }
        assert_eq!(engine.calls(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().failures, 1);

        // Failures are not cached: the next request calls the engine again.
        assert!(cache.get("devices", &census()).await.is_err());
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_computation() {
        let engine = SlowEngine::new(Duration::from_millis(50), false);
        let cache = ResultCache::new(engine.clone(), DEFAULT_TTL);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(5), cache.get("devices", &census())).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let key = ResultCache::key_for("devices", &census());
        assert!(cache.entry(&key).is_some());

        cache.get("devices", &census()).await.unwrap();
        assert_eq!(engine.calls(), 1);
        assert_eq!(cache.stats().in_flight, 0);
    }
}
