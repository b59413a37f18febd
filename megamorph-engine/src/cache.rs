//! Keyed cache for query results
//!
//! [`QueryCache::query`] runs a caller-supplied fetcher and optionally stores
//! its result under a cache key. The reload flags select between serving the
//! cached value, refetching and waiting, or serving the cached value while a
//! background task refreshes it:
//!
//! | entry | reload | background | behavior                                |
//! |-------|--------|------------|-----------------------------------------|
//! | no    |   -    |     -      | fetch, store, resolve                   |
//! | yes   | false  |   false    | resolve with cached value               |
//! | yes   | true   |     -      | fetch, await, replace on success        |
//! | yes   | false  |   true     | resolve with cached value, fetch behind |
//!
//! At most one fetch per key is in flight. Callers arriving while a fetch is
//! pending attach to it through a [`Shared`] future. Entries are evicted
//! whole as soon as any member model unloads. Membership is tracked per
//! model instance, so unloading a nested model that shares an identity with
//! a cached top-level record leaves that record's entries alone.

use crate::collection::RecordCollection;
use crate::error::{QueryError, QueryResult};
use crate::invalidation::UnloadListener;
use crate::metrics::EngineMetrics;
use crate::model::{InstanceId, MegamorphicModel};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use megamorph_types::ModelIdentity;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A query result: one model or a collection of them
#[derive(Debug, Clone)]
pub enum QueryValue {
    Model(Arc<MegamorphicModel>),
    Collection(Arc<RecordCollection>),
}

impl QueryValue {
    pub fn as_model(&self) -> Option<&Arc<MegamorphicModel>> {
        match self {
            QueryValue::Model(model) => Some(model),
            QueryValue::Collection(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Arc<RecordCollection>> {
        match self {
            QueryValue::Collection(collection) => Some(collection),
            QueryValue::Model(_) => None,
        }
    }

    /// Identities of the member models
    pub fn members(&self) -> HashSet<ModelIdentity> {
        match self {
            QueryValue::Model(model) => HashSet::from([model.identity().clone()]),
            QueryValue::Collection(collection) => collection.depends_on().clone(),
        }
    }

    /// Model instances whose unload evicts this value
    pub fn instances(&self) -> HashSet<InstanceId> {
        match self {
            QueryValue::Model(model) => HashSet::from([model.instance()]),
            QueryValue::Collection(collection) => {
                collection.models().map(|m| m.instance()).collect()
            }
        }
    }

    /// Whether any member model is already unloaded
    pub fn has_unloaded_member(&self) -> bool {
        match self {
            QueryValue::Model(model) => model.is_unloaded(),
            QueryValue::Collection(collection) => collection.models().any(|m| m.is_unloaded()),
        }
    }

    /// Same model or collection instance
    pub fn same_as(&self, other: &QueryValue) -> bool {
        match (self, other) {
            (QueryValue::Model(a), QueryValue::Model(b)) => Arc::ptr_eq(a, b),
            (QueryValue::Collection(a), QueryValue::Collection(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Arc<MegamorphicModel>> for QueryValue {
    fn from(model: Arc<MegamorphicModel>) -> Self {
        QueryValue::Model(model)
    }
}

impl From<Arc<RecordCollection>> for QueryValue {
    fn from(collection: Arc<RecordCollection>) -> Self {
        QueryValue::Collection(collection)
    }
}

/// Reload flags for [`QueryCache::query`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Refetch and wait for the fresh value
    pub reload: bool,

    /// Serve the cached value and refetch in the background
    pub background_reload: bool,
}

impl QueryOptions {
    pub fn reload() -> Self {
        QueryOptions {
            reload: true,
            background_reload: false,
        }
    }

    pub fn background_reload() -> Self {
        QueryOptions {
            reload: false,
            background_reload: true,
        }
    }
}

/// Query cache settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCacheConfig {
    /// Maximum stored entries; 0 means unbounded. The oldest insert is
    /// evicted first.
    #[serde(default)]
    pub max_entries: usize,
}

/// A cached query result with metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: QueryValue,

    /// Identities of the member models
    pub members: HashSet<ModelIdentity>,

    /// Member instances; unloading any of them evicts this entry
    pub instances: HashSet<InstanceId>,

    /// When this entry was stored
    pub created_at: Instant,

    /// Number of times served
    pub access_count: u64,

    /// Last time served
    pub last_accessed: Instant,

    sequence: u64,
}

impl CacheEntry {
    fn new(value: QueryValue, sequence: u64) -> Self {
        let now = Instant::now();
        CacheEntry {
            members: value.members(),
            instances: value.instances(),
            value,
            created_at: now,
            access_count: 0,
            last_accessed: now,
            sequence,
        }
    }

    fn record_access(&mut self) {
        self.access_count += 1;
        self.last_accessed = Instant::now();
    }

    /// Get the age of this entry
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Get time since last access
    pub fn idle_time(&self) -> Duration {
        self.last_accessed.elapsed()
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub pending: usize,
    pub tracked_members: usize,
}

impl CacheStats {
    /// Get cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Query Cache Statistics:")?;
        writeln!(
            f,
            "  Hits: {} | Misses: {} | Hit Rate: {:.1}%",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Entries: {} | Pending: {} | Tracked Members: {}",
            self.entries, self.pending, self.tracked_members
        )?;
        Ok(())
    }
}

type PendingFetch = Shared<BoxFuture<'static, QueryResult<QueryValue>>>;

struct Pending {
    id: u64,
    fetch: PendingFetch,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    pending: HashMap<String, Pending>,
    /// Reverse index: member instance -> keys of entries containing it
    members: HashMap<InstanceId, HashSet<String>>,
    hits: u64,
    misses: u64,
    next_sequence: u64,
}

impl CacheState {
    fn sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn serve(&mut self, key: &str) -> Option<QueryValue> {
        let entry = self.entries.get_mut(key)?;
        entry.record_access();
        Some(entry.value.clone())
    }

    /// Store `value` under `key`, returning how many entries the capacity
    /// limit evicted
    fn store(&mut self, key: &str, value: QueryValue, max_entries: usize) -> usize {
        self.remove_entry(key);
        let sequence = self.sequence();
        let entry = CacheEntry::new(value, sequence);
        for member in &entry.instances {
            self.members
                .entry(*member)
                .or_default()
                .insert(key.to_string());
        }
        self.entries.insert(key.to_string(), entry);

        let mut evicted = 0;
        while max_entries > 0 && self.entries.len() > max_entries {
            let oldest = self
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .min_by_key(|(_, entry)| entry.sequence)
                .map(|(k, _)| k.clone());
            let Some(oldest) = oldest else { break };
            self.remove_entry(&oldest);
            evicted += 1;
        }
        evicted
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        for member in &entry.instances {
            if let Some(keys) = self.members.get_mut(member) {
                keys.remove(key);
                if keys.is_empty() {
                    self.members.remove(member);
                }
            }
        }
        Some(entry)
    }
}

struct CacheInner {
    state: Mutex<CacheState>,
    config: QueryCacheConfig,
    metrics: Arc<EngineMetrics>,
}

impl CacheInner {
    /// Settle a fetch started under `key`
    fn complete(
        &self,
        key: &str,
        id: u64,
        result: anyhow::Result<QueryValue>,
    ) -> QueryResult<QueryValue> {
        let mut state = self.state.lock();
        let current = state.pending.get(key).is_some_and(|pending| pending.id == id);
        if current {
            state.pending.remove(key);
        }

        match result {
            Ok(value) => {
                if !current {
                    debug!(cache_key = key, "fetch superseded; result not stored");
                } else if value.has_unloaded_member() {
                    debug!(cache_key = key, "fetched value has unloaded members; not stored");
                } else {
                    let evicted = state.store(key, value.clone(), self.config.max_entries);
                    if evicted > 0 {
                        self.metrics.record_evictions(evicted as u64);
                        info!(cache_key = key, evicted, "query cache over capacity");
                    }
                    debug!(cache_key = key, "query result stored");
                }
                Ok(value)
            }
            Err(err) => {
                warn!(cache_key = key, error = %format!("{err:#}"), "query fetch failed");
                Err(QueryError::fetch(Some(key), err))
            }
        }
    }
}

impl UnloadListener for CacheInner {
    fn on_unload(&self, model: &MegamorphicModel) {
        let mut state = self.state.lock();
        let Some(keys) = state.members.remove(&model.instance()) else {
            return;
        };

        let evicted = keys
            .iter()
            .filter(|key| state.remove_entry(key).is_some())
            .count();
        if evicted > 0 {
            self.metrics.record_evictions(evicted as u64);
            info!(identity = %model.identity(), evicted, "evicted cached queries");
        }
    }
}

/// Keyed, self-evicting cache of query results
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

enum Plan {
    Cached(QueryValue),
    Await(PendingFetch),
    Background(QueryValue, Option<PendingFetch>),
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        Self::with_metrics(config, Arc::new(EngineMetrics::new()))
    }

    pub fn with_metrics(config: QueryCacheConfig, metrics: Arc<EngineMetrics>) -> Self {
        QueryCache {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                config,
                metrics,
            }),
        }
    }

    /// Handle to subscribe this cache to unload notifications
    pub fn listener(&self) -> Weak<dyn UnloadListener> {
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        weak
    }

    /// Run or reuse a fetch for `cache_key`
    ///
    /// Without a key the fetcher always runs and nothing is stored. The
    /// fetcher is only invoked if a fetch actually starts.
    pub async fn query<F, Fut>(
        &self,
        cache_key: Option<&str>,
        fetcher: F,
        options: QueryOptions,
    ) -> QueryResult<QueryValue>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<QueryValue>> + Send + 'static,
    {
        let Some(key) = cache_key else {
            self.inner.metrics.record_fetch();
            return fetcher().await.map_err(|err| {
                warn!(error = %format!("{err:#}"), "uncached query fetch failed");
                QueryError::fetch(None, err)
            });
        };

        let plan = {
            let mut state = self.inner.state.lock();
            match state.serve(key) {
                Some(value) if !options.reload && !options.background_reload => {
                    state.hits += 1;
                    self.inner.metrics.record_query_hit();
                    debug!(cache_key = key, "query cache hit");
                    Plan::Cached(value)
                }
                Some(value) if !options.reload => {
                    state.hits += 1;
                    self.inner.metrics.record_query_hit();
                    let refresh = if state.pending.contains_key(key) {
                        None
                    } else if tokio::runtime::Handle::try_current().is_err() {
                        warn!(cache_key = key, "no async runtime; background reload skipped");
                        None
                    } else {
                        self.inner.metrics.record_background_reload();
                        Some(self.start_fetch(&mut state, key, fetcher))
                    };
                    Plan::Background(value, refresh)
                }
                cached => {
                    if cached.is_some() {
                        state.hits += 1;
                        self.inner.metrics.record_query_hit();
                    } else {
                        state.misses += 1;
                        self.inner.metrics.record_query_miss();
                    }
                    let in_flight = state.pending.get(key).map(|pending| pending.fetch.clone());
                    let fetch = match in_flight {
                        Some(fetch) => {
                            debug!(cache_key = key, "attaching to in-flight fetch");
                            fetch
                        }
                        None => self.start_fetch(&mut state, key, fetcher),
                    };
                    Plan::Await(fetch)
                }
            }
        };

        match plan {
            Plan::Cached(value) => Ok(value),
            Plan::Await(fetch) => fetch.await,
            Plan::Background(value, refresh) => {
                if let Some(fetch) = refresh {
                    debug!(cache_key = key, "background reload started");
                    tokio::spawn(async move {
                        // Failures are logged by the fetch itself
                        let _ = fetch.await;
                    });
                }
                Ok(value)
            }
        }
    }

    fn start_fetch<F, Fut>(&self, state: &mut CacheState, key: &str, fetcher: F) -> PendingFetch
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<QueryValue>> + Send + 'static,
    {
        let id = state.sequence();
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();

        let fetch = async move {
            inner.metrics.record_fetch();
            let result = fetcher().await;
            inner.complete(&owned_key, id, result)
        }
        .boxed()
        .shared();

        state.pending.insert(
            key.to_string(),
            Pending {
                id,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    /// The cached value, without fetching or counting a hit
    pub fn peek(&self, cache_key: &str) -> Option<QueryValue> {
        let state = self.inner.state.lock();
        state.entries.get(cache_key).map(|entry| entry.value.clone())
    }

    /// Metadata for a cached entry
    pub fn entry(&self, cache_key: &str) -> Option<CacheEntry> {
        self.inner.state.lock().entries.get(cache_key).cloned()
    }

    pub fn contains(&self, cache_key: &str) -> bool {
        self.inner.state.lock().entries.contains_key(cache_key)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    /// Whether a fetch for this key is in flight
    pub fn is_pending(&self, cache_key: &str) -> bool {
        self.inner.state.lock().pending.contains_key(cache_key)
    }

    /// Drop one entry; an in-flight fetch for the key still stores its result
    pub fn evict(&self, cache_key: &str) -> bool {
        let removed = self.inner.state.lock().remove_entry(cache_key).is_some();
        if removed {
            self.inner.metrics.record_evictions(1);
        }
        removed
    }

    /// Drop every entry and forget in-flight fetches
    ///
    /// Fetches already running still resolve their callers but no longer
    /// store their results.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        let evicted = state.entries.len();
        state.entries.clear();
        state.members.clear();
        state.pending.clear();
        state.hits = 0;
        state.misses = 0;
        drop(state);

        self.inner.metrics.record_evictions(evicted as u64);
        info!(evicted, "query cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
            pending: state.pending.len(),
            tracked_members: state.members.len(),
        }
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.inner.metrics
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(QueryCacheConfig::default())
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
