//! Keyed cache of asynchronous read results.
//!
//! Each [`QueryKey`] owns one entry holding the last fetched value, when it
//! was fetched, the last error, and at most one in-flight fetch. Concurrent
//! readers of the same key share that fetch.
//!
//! Bookkeeping lives behind a single mutex that is never held across an
//! `.await`. Fetches run on spawned tasks so dropping a reader does not
//! cancel the network call. Every fetch gets an id; an entry only applies the
//! result of the fetch it currently records, so results for removed or
//! re-created entries are discarded.

use chrono::{DateTime, TimeDelta, Utc};
use erp_core::{Clock, ErpError, QueryKey, Result, SystemClock};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, trace, warn};

use crate::events::LifecycleEvent;
use crate::policy::CacheConfig;

type Value = Arc<dyn Any + Send + Sync>;
type FetchResult = Result<Value>;
type InFlight = Shared<BoxFuture<'static, FetchResult>>;
type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchResult> + Send + Sync>;

fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

fn erase<T, F, Fut>(fetch: F) -> Fetcher
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move || {
        let fut = fetch();
        async move { fut.await.map(|value| Arc::new(value) as Value) }.boxed()
    })
}

fn downcast<T: Send + Sync + 'static>(key: &QueryKey, value: Value) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| ErpError::Other(format!("Cached value for {key} has a different type")))
}

struct Entry {
    data: Option<Value>,
    fetched_at: Option<DateTime<Utc>>,
    error: Option<ErpError>,
    invalidated: bool,
    // Set when an invalidation lands while a fetch is in flight.
    invalidate_pending: bool,
    in_flight: Option<(u64, InFlight)>,
    fetcher: Option<Fetcher>,
    last_read: DateTime<Utc>,
    subscribers: usize,
}

impl Entry {
    const fn new(now: DateTime<Utc>) -> Self {
        Self {
            data: None,
            fetched_at: None,
            error: None,
            invalidated: false,
            invalidate_pending: false,
            in_flight: None,
            fetcher: None,
            last_read: now,
            subscribers: 0,
        }
    }

    fn is_stale(&self, stale_time: Duration, now: DateTime<Utc>) -> bool {
        self.invalidated
            || self
                .fetched_at
                .is_none_or(|at| now.signed_duration_since(at) > delta(stale_time))
    }

    const fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }
}

struct Inner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<QueryKey, Entry>>,
    next_fetch_id: AtomicU64,
    updates: broadcast::Sender<QueryKey>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, key: &QueryKey, entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.is_stale(self.config.staleness.stale_time(key), now)
    }

    /// Joins the entry's in-flight fetch or starts a new one.
    ///
    /// Returns `None` when the entry has no registered fetcher or there is no
    /// runtime to drive the fetch.
    fn start_fetch(self: &Arc<Self>, key: &QueryKey, entry: &mut Entry) -> Option<InFlight> {
        if let Some((_, in_flight)) = &entry.in_flight {
            return Some(in_flight.clone());
        }
        let fetcher = entry.fetcher.clone()?;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %key, "No async runtime, refetch skipped");
            return None;
        };

        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed) + 1;
        let retry = self.config.read_retry;
        let inner = Arc::clone(self);
        let task_key = key.clone();
        let fetch = async move {
            let result = retry.run(&*fetcher).await;
            inner.complete(&task_key, id, &result);
            result
        }
        .boxed()
        .shared();

        runtime.spawn(fetch.clone());
        entry.in_flight = Some((id, fetch.clone()));
        debug!(key = %key, fetch_id = id, "Fetch started");
        Some(fetch)
    }

    fn complete(self: &Arc<Self>, key: &QueryKey, id: u64, result: &FetchResult) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            trace!(key = %key, fetch_id = id, "Entry gone, result discarded");
            return;
        };
        if !matches!(entry.in_flight, Some((current, _)) if current == id) {
            trace!(key = %key, fetch_id = id, "Superseded fetch, result discarded");
            return;
        }
        entry.in_flight = None;

        match result {
            Ok(value) => {
                entry.data = Some(Arc::clone(value));
                entry.error = None;
                entry.fetched_at = Some(self.clock.now());
                entry.invalidated = entry.invalidate_pending;
                debug!(key = %key, fetch_id = id, "Fetch applied");
            }
            Err(e) => {
                warn!(key = %key, fetch_id = id, error = %e, has_data = entry.data.is_some(), "Fetch failed");
                entry.error = Some(e.clone());
            }
        }

        if std::mem::take(&mut entry.invalidate_pending) && entry.subscribers > 0 {
            self.start_fetch(key, entry);
        }
        drop(entries);
        let _ = self.updates.send(key.clone());
    }
}

/// Snapshot of a cached read.
#[derive(Debug)]
pub struct QueryState<T> {
    /// Last successfully fetched value.
    pub data: Option<Arc<T>>,
    /// Whether the value is past its freshness window or was invalidated.
    pub is_stale: bool,
    /// Error from the last fetch, if it failed.
    pub error: Option<ErpError>,
    /// Whether a fetch is in flight.
    pub is_fetching: bool,
}

impl<T> QueryState<T> {
    /// True while the first fetch is running.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.data.is_none() && self.is_fetching
    }

    /// Returns the value, or the error when there is none.
    pub fn into_result(self) -> Result<Arc<T>> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(e)) => Err(e),
            (None, None) => Err(ErpError::Other("No data loaded".to_string())),
        }
    }

    fn from_outcome(key: &QueryKey, result: FetchResult) -> Self
    where
        T: Send + Sync + 'static,
    {
        let (data, error) = match result.and_then(|value| downcast::<T>(key, value)) {
            Ok(data) => (Some(data), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            data,
            is_stale: false,
            error,
            is_fetching: false,
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_stale: true,
            error: None,
            is_fetching: false,
        }
    }
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            is_stale: self.is_stale,
            error: self.error.clone(),
            is_fetching: self.is_fetching,
        }
    }
}

/// Outcome of one [`QueryCache::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Polled keys whose refetch was started.
    pub polled: usize,
    /// Entries evicted.
    pub evicted: usize,
}

/// Process-wide keyed cache of read results.
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl QueryCache {
    /// Creates a cache using the system clock.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a cache reading time from `clock`.
    #[must_use]
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                entries: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
                updates,
            }),
        }
    }

    /// The cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Reads `key`, fetching with `fetch` when needed.
    ///
    /// Without cached data this waits for a fetch (joining one already in
    /// flight). With cached data it returns immediately and, if the data is
    /// stale, starts a background refetch unless one is already running.
    #[instrument(skip(self, fetch), fields(key = %key))]
    pub async fn read<T, F, Fut>(&self, key: QueryKey, fetch: F) -> QueryState<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let fetcher = erase(fetch);
        let pending = {
            let mut entries = self.inner.lock();
            let now = self.inner.clock.now();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(now));
            entry.last_read = now;
            entry.fetcher = Some(fetcher);

            if entry.data.is_none() {
                debug!("Cache miss");
                self.inner.start_fetch(&key, entry)
            } else {
                if self.inner.is_stale(&key, entry, now) && !entry.is_fetching() {
                    debug!("Serving stale data, refetching in background");
                    self.inner.start_fetch(&key, entry);
                } else {
                    trace!("Cache hit");
                }
                None
            }
        };

        let Some(fetch) = pending else {
            return self.peek(&key);
        };
        let outcome = fetch.await;
        let state = self.peek::<T>(&key);
        if state.data.is_some() || state.error.is_some() {
            state
        } else {
            QueryState::from_outcome(&key, outcome)
        }
    }

    /// Marks `key` as currently displayed and keeps its fetcher registered.
    ///
    /// Subscribed keys are refetched eagerly on invalidation, take part in
    /// focus/reconnect/polling refetches and are never evicted. A fetch is
    /// started right away if the key has no fresh data.
    pub fn subscribe<T, F, Fut>(&self, key: QueryKey, fetch: F) -> Subscription
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut entries = self.inner.lock();
        let now = self.inner.clock.now();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(now));
        entry.subscribers += 1;
        entry.last_read = now;
        entry.fetcher = Some(erase(fetch));
        if self.inner.is_stale(&key, entry, now) && !entry.is_fetching() {
            self.inner.start_fetch(&key, entry);
        }
        debug!(key = %key, subscribers = entry.subscribers, "Subscribed");
        drop(entries);

        Subscription {
            cache: self.clone(),
            key,
        }
    }

    /// Returns the current state of `key` without fetching.
    #[must_use]
    pub fn peek<T: Send + Sync + 'static>(&self, key: &QueryKey) -> QueryState<T> {
        let entries = self.inner.lock();
        let Some(entry) = entries.get(key) else {
            return QueryState::default();
        };
        let now = self.inner.clock.now();
        let (data, type_error) = match entry.data.clone().map(|v| downcast::<T>(key, v)) {
            Some(Ok(data)) => (Some(data), None),
            Some(Err(e)) => (None, Some(e)),
            None => (None, None),
        };
        QueryState {
            data,
            is_stale: self.inner.is_stale(key, entry, now),
            error: type_error.or_else(|| entry.error.clone()),
            is_fetching: entry.is_fetching(),
        }
    }

    /// Returns the cached value for `key`, if any.
    #[must_use]
    pub fn get_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        self.peek(key).data
    }

    /// Stores `value` under `key` as freshly fetched.
    pub fn set_data<T: Send + Sync + 'static>(&self, key: QueryKey, value: T) {
        let mut entries = self.inner.lock();
        let now = self.inner.clock.now();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(now));
        entry.data = Some(Arc::new(value));
        entry.fetched_at = Some(now);
        entry.error = None;
        entry.invalidated = false;
        drop(entries);
        let _ = self.inner.updates.send(key);
    }

    /// Marks every key starting with `prefix` stale. See [`Self::invalidate_many`].
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        self.invalidate_many(std::slice::from_ref(prefix))
    }

    /// Marks every key starting with any of `prefixes` stale, under one lock.
    ///
    /// Subscribed keys are refetched immediately; if a fetch is already in
    /// flight its result is applied but left stale and a follow-up fetch is
    /// started once it lands. Returns the number of entries marked.
    #[instrument(skip(self, prefixes), fields(prefixes = prefixes.len()))]
    pub fn invalidate_many(&self, prefixes: &[QueryKey]) -> usize {
        let mut marked = Vec::new();
        {
            let mut entries = self.inner.lock();
            for (key, entry) in entries.iter_mut() {
                if !prefixes.iter().any(|p| key.starts_with(p)) {
                    continue;
                }
                entry.invalidated = true;
                if entry.is_fetching() {
                    entry.invalidate_pending = true;
                } else if entry.subscribers > 0 {
                    self.inner.start_fetch(key, entry);
                }
                marked.push(key.clone());
            }
        }
        debug!(marked = marked.len(), "Invalidated keys");
        let count = marked.len();
        for key in marked {
            let _ = self.inner.updates.send(key);
        }
        count
    }

    /// Drops every entry starting with `prefix`. Returns how many were dropped.
    pub fn remove(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.inner.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        debug!(prefix = %prefix, removed, "Removed keys");
        removed
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
        debug!("Cleared query cache");
    }

    /// Evicts entries with no subscribers that were not read within the
    /// retention window. Returns how many were evicted.
    pub fn collect_garbage(&self) -> usize {
        let now = self.inner.clock.now();
        let retention = delta(self.inner.config.gc_time);
        let mut entries = self.inner.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.subscribers > 0
                || entry.is_fetching()
                || now.signed_duration_since(entry.last_read) <= retention
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "Evicted unused cache entries");
        }
        evicted
    }

    /// Refetches stale subscribed keys that the event applies to. Returns how
    /// many refetches were started.
    #[instrument(skip(self))]
    pub fn handle(&self, event: LifecycleEvent) -> usize {
        let pattern = match event {
            LifecycleEvent::Focus => &self.inner.config.focus_refetch,
            LifecycleEvent::Reconnect => &self.inner.config.reconnect_refetch,
        };
        let now = self.inner.clock.now();
        let mut started = 0;
        let mut entries = self.inner.lock();
        for (key, entry) in entries.iter_mut() {
            if entry.subscribers > 0
                && !entry.is_fetching()
                && pattern.matches(key)
                && self.inner.is_stale(key, entry, now)
                && self.inner.start_fetch(key, entry).is_some()
            {
                started += 1;
            }
        }
        debug!(started, "Lifecycle refetch");
        started
    }

    /// One maintenance step: refetch subscribed polled keys whose interval
    /// elapsed, then evict unused entries.
    pub fn tick(&self) -> MaintenanceReport {
        let now = self.inner.clock.now();
        let mut polled = 0;
        {
            let mut entries = self.inner.lock();
            for (key, entry) in entries.iter_mut() {
                if entry.subscribers == 0 || entry.is_fetching() {
                    continue;
                }
                let Some(every) = self.inner.config.polling_interval(key) else {
                    continue;
                };
                let due = entry
                    .fetched_at
                    .is_none_or(|at| now.signed_duration_since(at) >= delta(every));
                if due && self.inner.start_fetch(key, entry).is_some() {
                    polled += 1;
                }
            }
        }
        let evicted = self.collect_garbage();
        if polled > 0 {
            trace!(polled, evicted, "Maintenance tick");
        }
        MaintenanceReport { polled, evicted }
    }

    /// Runs [`Self::tick`] every `period` until the cache is dropped.
    pub fn spawn_maintenance(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Self { inner }.tick();
            }
        })
    }

    /// Receives the key of every entry whose data, error or staleness changed.
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<QueryKey> {
        self.inner.updates.subscribe()
    }

    /// Returns true if `key` has an entry.
    #[must_use]
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unsubscribe(&self, key: &QueryKey) {
        let mut entries = self.inner.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            entry.last_read = self.inner.clock.now();
            trace!(key = %key, subscribers = entry.subscribers, "Unsubscribed");
        }
    }
}

/// Keeps a key subscribed until dropped.
#[derive(Debug)]
pub struct Subscription {
    cache: QueryCache,
    key: QueryKey,
}

impl Subscription {
    /// The subscribed key.
    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Current state of the subscribed key.
    #[must_use]
    pub fn state<T: Send + Sync + 'static>(&self) -> QueryState<T> {
        self.cache.peek(&self.key)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cache.unsubscribe(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StalenessPolicy;
    use erp_core::{ManualClock, Resource};
    use std::sync::atomic::AtomicUsize;

    type Fetch = Arc<dyn Fn() -> BoxFuture<'static, Result<u32>> + Send + Sync>;

    fn setup() -> (QueryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = QueryCache::with_clock(CacheConfig::default(), clock.clone());
        (cache, clock)
    }

    /// Fetch that counts calls, waits `latency`, then returns the call number.
    fn counting(
        calls: &Arc<AtomicUsize>,
        latency: Duration,
    ) -> impl Fn() -> BoxFuture<'static, Result<u32>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            async move {
                tokio::time::sleep(latency).await;
                Ok(n)
            }
            .boxed()
        }
    }

    fn failing(calls: &Arc<AtomicUsize>, error: ErpError) -> Fetch {
        let calls = Arc::clone(calls);
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let error = error.clone();
            async move { Err(error) }.boxed()
        })
    }

    fn inventory() -> QueryKey {
        QueryKey::new(Resource::Inventory)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_share_one_fetch() {
        let (cache, _) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = tokio::join!(
            cache.read(inventory(), counting(&calls, Duration::from_millis(100))),
            cache.read(inventory(), counting(&calls, Duration::from_millis(100))),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.data.as_deref(), Some(&1));
        assert_eq!(b.data.as_deref(), Some(&1));
        assert!(!a.is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_reads_do_not_fetch() {
        let (cache, clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.read(inventory(), counting(&calls, Duration::ZERO)).await;
        clock.advance(Duration::from_secs(60));
        let state = cache.read(inventory(), counting(&calls, Duration::ZERO)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.data.as_deref(), Some(&1));
        assert!(!state.is_fetching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_read_returns_cached_and_refetches_in_background() {
        let (cache, clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut updates = cache.updates();
        cache.read(inventory(), counting(&calls, Duration::ZERO)).await;
        updates.recv().await.unwrap();

        clock.advance(Duration::from_secs(121));
        let state = cache
            .read(inventory(), counting(&calls, Duration::from_millis(50)))
            .await;
        assert_eq!(state.data.as_deref(), Some(&1));
        assert!(state.is_stale);
        assert!(state.is_fetching);

        assert_eq!(updates.recv().await.unwrap(), inventory());
        let state = cache.peek::<u32>(&inventory());
        assert_eq!(state.data.as_deref(), Some(&2));
        assert!(!state.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_staleness_is_monotonic_in_age() {
        let (cache, clock) = setup();
        let key = QueryKey::new(Resource::Clients);
        cache.set_data(key.clone(), 7u32);
        assert!(!cache.peek::<u32>(&key).is_stale);
        clock.advance(Duration::from_secs(600));
        assert!(!cache.peek::<u32>(&key).is_stale);
        clock.advance(Duration::from_secs(1));
        assert!(cache.peek::<u32>(&key).is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_retries_transient_failures() {
        let (cache, _) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let state = cache
            .read(inventory(), move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ErpError::Remote("connection reset".into()))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.data.as_deref(), Some(&42));
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_without_data_surfaces_error() {
        let (cache, _) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = failing(&calls, ErpError::Auth("expired".into()));
        let state = cache.read(inventory(), move || fetch()).await;
        assert!(state.data.is_none());
        assert!(matches!(state.error, Some(ErpError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(state.into_result().is_err());
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_value() {
        let (cache, _) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut updates = cache.updates();
        cache.set_data(inventory(), 5u32);
        updates.recv().await.unwrap();
        cache.invalidate(&inventory());
        updates.recv().await.unwrap();

        let fetch = failing(&calls, ErpError::Validation("bad filter".into()));
        let state = cache.read(inventory(), move || fetch()).await;
        assert_eq!(state.data.as_deref(), Some(&5));

        updates.recv().await.unwrap();
        let state = cache.peek::<u32>(&inventory());
        assert_eq!(state.data.as_deref(), Some(&5));
        assert!(state.error.is_some());
        assert!(state.is_stale);
    }

    #[tokio::test]
    async fn test_invalidating_missing_key_is_noop() {
        let (cache, _) = setup();
        assert_eq!(cache.invalidate(&inventory()), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidation_is_scoped_to_prefix() {
        let (cache, _) = setup();
        let page = QueryKey::new(Resource::Supplies).with(1u32).with(10u32);
        let stats = QueryKey::new(Resource::Supplies).with("statistics");
        let movements = QueryKey::new(Resource::SupplyMovements);
        let clients = QueryKey::new(Resource::Clients);
        for key in [&page, &stats, &movements, &clients] {
            cache.set_data(key.clone(), 1u32);
        }

        assert_eq!(cache.invalidate(&Resource::Supplies.into()), 2);
        assert!(cache.peek::<u32>(&page).is_stale);
        assert!(cache.peek::<u32>(&stats).is_stale);
        assert!(!cache.peek::<u32>(&movements).is_stale);
        assert!(!cache.peek::<u32>(&clients).is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribed_keys_refetch_on_invalidation() {
        let (cache, _) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut updates = cache.updates();
        let sub = cache.subscribe(inventory(), counting(&calls, Duration::ZERO));
        updates.recv().await.unwrap();
        assert_eq!(sub.state::<u32>().data.as_deref(), Some(&1));

        cache.invalidate(&inventory());
        // One update for the invalidation, one for the refetch result.
        updates.recv().await.unwrap();
        updates.recv().await.unwrap();
        let state = sub.state::<u32>();
        assert_eq!(state.data.as_deref(), Some(&2));
        assert!(!state.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_fetch_schedules_one_follow_up() {
        let (cache, _) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut updates = cache.updates();
        let sub = cache.subscribe(inventory(), counting(&calls, Duration::from_secs(1)));
        tokio::task::yield_now().await;

        cache.invalidate(&inventory());
        cache.invalidate(&inventory());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        updates.recv().await.unwrap();
        updates.recv().await.unwrap();

        // First result applied but left stale, follow-up in flight.
        updates.recv().await.unwrap();
        let state = sub.state::<u32>();
        assert_eq!(state.data.as_deref(), Some(&1));
        assert!(state.is_stale);
        assert!(state.is_fetching);

        updates.recv().await.unwrap();
        let state = sub.state::<u32>();
        assert_eq!(state.data.as_deref(), Some(&2));
        assert!(!state.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_for_removed_entry_is_discarded() {
        let (cache, _) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = cache.subscribe(inventory(), counting(&calls, Duration::from_secs(1)));
        tokio::task::yield_now().await;
        drop(sub);

        cache.remove(&inventory());
        cache.set_data(inventory(), 99u32);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.get_data::<u32>(&inventory()).as_deref(), Some(&99));
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_collection_spares_subscribed_keys() {
        let (cache, clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut updates = cache.updates();
        let clients = QueryKey::new(Resource::Clients);
        cache.set_data(clients.clone(), 1u32);
        let _sub = cache.subscribe(inventory(), counting(&calls, Duration::ZERO));
        updates.recv().await.unwrap();
        updates.recv().await.unwrap();

        clock.advance(Duration::from_secs(30 * 60));
        assert_eq!(cache.collect_garbage(), 0);
        clock.advance(Duration::from_secs(31 * 60));
        assert_eq!(cache.collect_garbage(), 1);
        assert!(!cache.contains(&clients));
        assert!(cache.contains(&inventory()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_refetches_only_stale_critical_keys() {
        let (cache, clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut updates = cache.updates();
        let _inventory = cache.subscribe(inventory(), counting(&calls, Duration::ZERO));
        let _clients = cache.subscribe(
            QueryKey::new(Resource::Clients),
            counting(&calls, Duration::ZERO),
        );
        updates.recv().await.unwrap();
        updates.recv().await.unwrap();

        assert_eq!(cache.handle(LifecycleEvent::Focus), 0);
        clock.advance(Duration::from_secs(11 * 60));
        assert_eq!(cache.handle(LifecycleEvent::Focus), 1);
        updates.recv().await.unwrap();
        assert_eq!(cache.handle(LifecycleEvent::Reconnect), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_polls_recent_sales() {
        let (cache, clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut updates = cache.updates();
        let recent = QueryKey::new(Resource::Sales).with("recent").with(10u32);
        let _sub = cache.subscribe(recent, counting(&calls, Duration::ZERO));
        updates.recv().await.unwrap();

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.tick().polled, 0);
        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.tick().polled, 1);
        updates.recv().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_task_polls_until_cache_dropped() {
        let (cache, clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut updates = cache.updates();
        let recent = QueryKey::new(Resource::Sales).with("recent").with(10u32);
        let sub = cache.subscribe(recent.clone(), counting(&calls, Duration::ZERO));
        updates.recv().await.unwrap();

        let handle = cache.spawn_maintenance(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(2 * 60));
        updates.recv().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_data::<u32>(&recent).as_deref(), Some(&2));

        drop(sub);
        drop(cache);
        tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .expect("maintenance task outlived the cache")
            .unwrap();
    }

    #[tokio::test]
    async fn test_uniform_policy_and_type_mismatch() {
        let clock = Arc::new(ManualClock::default());
        let config = CacheConfig::default().with_staleness(StalenessPolicy::uniform(Duration::ZERO));
        let cache = QueryCache::with_clock(config, clock);
        cache.set_data(inventory(), "text".to_string());
        let state = cache.peek::<u32>(&inventory());
        assert!(state.data.is_none());
        assert!(matches!(state.error, Some(ErpError::Other(_))));
        assert!(!cache.peek::<String>(&inventory()).is_stale);
    }
}
