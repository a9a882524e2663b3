//! TTL cache with per-category limits and in-flight request de-duplication.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::policy::{CachePolicy, Category, PolicyTable};
use super::storage::{CacheEntry, CacheStorage, MemoryStorage};
use super::traits::{CacheStats, Cacheable, FetchFailure};

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, FetchFailure>>>;

/// An in-flight fetch for one key.
struct Pending {
  id: u64,
  /// Type-erased `SharedFetch<T>`
  handle: Box<dyn Any + Send + Sync>,
}

/// Invalidation count for a key while fetches for it are running.
#[derive(Debug, Default)]
struct Epoch {
  generation: u64,
  in_flight: usize,
}

struct State {
  policies: PolicyTable,
  pending: HashMap<String, Pending>,
  /// Keys with running fetches, including detached ones. A fetch that
  /// started under an older generation resolves its waiters but does not
  /// write the cache. Entries go away with the last fetch for the key.
  epochs: HashMap<String, Epoch>,
  next_request_id: u64,
}

impl State {
  /// Record a fetch starting for `key` and return its generation.
  fn begin_fetch(&mut self, key: &str) -> u64 {
    let epoch = self.epochs.entry(key.to_string()).or_default();
    epoch.in_flight += 1;
    epoch.generation
  }

  /// Record a fetch ending. True when `key` was not invalidated meanwhile.
  fn end_fetch(&mut self, key: &str, generation: u64) -> bool {
    let Some(epoch) = self.epochs.get_mut(key) else {
      return false;
    };
    let current = epoch.generation == generation;
    epoch.in_flight = epoch.in_flight.saturating_sub(1);
    if epoch.in_flight == 0 {
      self.epochs.remove(key);
    }
    current
  }

  /// Mark running fetches for keys matching `matches` as stale.
  fn bump_generations(&mut self, matches: impl Fn(&str) -> bool) {
    for (key, epoch) in self.epochs.iter_mut() {
      if matches(key) {
        epoch.generation += 1;
      }
    }
  }
}

struct Inner {
  storage: Arc<dyn CacheStorage>,
  state: Mutex<State>,
}

/// Process-wide response cache.
///
/// Cheap to clone; every clone shares the same entries and pending requests.
/// All bookkeeping happens synchronously under one lock that is never held
/// across an `.await`.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<Inner>,
}

impl CacheStore {
  /// Create a store backed by in-memory storage.
  pub fn new(policies: PolicyTable) -> Self {
    Self::with_storage(MemoryStorage::new(), policies)
  }

  pub fn with_storage<S: CacheStorage + 'static>(storage: S, policies: PolicyTable) -> Self {
    Self {
      inner: Arc::new(Inner {
        storage: Arc::new(storage),
        state: Mutex::new(State {
          policies,
          pending: HashMap::new(),
          epochs: HashMap::new(),
          next_request_id: 0,
        }),
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Return a valid cached value, evicting it if it has expired.
  pub fn get<T: Cacheable>(&self, key: &str) -> Option<T> {
    let state = self.lock();
    self.read_valid(&state, key)
  }

  /// Insert or overwrite an entry.
  pub fn set<T: Cacheable>(&self, key: &str, value: &T, category: Category) {
    let state = self.lock();
    self.write_entry(&state, key, value, category);
  }

  /// Fetch through the cache.
  ///
  /// 1. Unless `force_refresh`, return a valid cached value
  /// 2. If a request for `key` is already in flight, wait for that one
  /// 3. Otherwise run `fetcher` on its own task and register it as pending
  ///
  /// Successful results are cached; failures are passed through unchanged and
  /// never cached. `fetcher` is invoked while the store is locked, so it must
  /// only build its future and not call back into the store synchronously.
  pub async fn cached_request<T, F, Fut>(
    &self,
    key: &str,
    category: Category,
    fetcher: F,
    force_refresh: bool,
  ) -> Result<T>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let request = {
      let mut state = self.lock();

      if !force_refresh {
        if let Some(value) = self.read_valid::<T>(&state, key) {
          debug!(key, "cache hit");
          return Ok(value);
        }
      }

      let in_flight = state
        .pending
        .get(key)
        .and_then(|p| p.handle.downcast_ref::<SharedFetch<T>>())
        .cloned();

      match in_flight {
        Some(shared) => {
          debug!(key, "joining in-flight request");
          shared
        }
        None => self.start_fetch(&mut state, key, category, fetcher()),
      }
    };

    request.await.map_err(Report::new)
  }

  /// Spawn the fetch and register it as pending. Must be called with the
  /// state lock held so that settlement cannot run before registration.
  fn start_fetch<T, Fut>(
    &self,
    state: &mut State,
    key: &str,
    category: Category,
    future: Fut,
  ) -> SharedFetch<T>
  where
    T: Cacheable,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    state.next_request_id += 1;
    let id = state.next_request_id;
    let generation = state.begin_fetch(key);

    debug!(key, id, generation, "starting fetch");

    let store = self.clone();
    let owned_key = key.to_string();
    let task = tokio::spawn(async move {
      let result = match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(eyre!("Fetch for {} panicked", owned_key)),
      };
      store.settle(&owned_key, id, generation, category, &result);
      result.map_err(FetchFailure::new)
    });

    let task_key = key.to_string();
    let shared = async move {
      match task.await {
        Ok(result) => result,
        Err(e) => Err(FetchFailure::new(eyre!(
          "Fetch task for {} did not complete: {}",
          task_key,
          e
        ))),
      }
    }
    .boxed()
    .shared();

    state.pending.insert(
      key.to_string(),
      Pending {
        id,
        handle: Box::new(shared.clone()),
      },
    );

    shared
  }

  fn settle<T: Cacheable>(
    &self,
    key: &str,
    id: u64,
    generation: u64,
    category: Category,
    result: &Result<T>,
  ) {
    let mut state = self.lock();

    if state.pending.get(key).is_some_and(|p| p.id == id) {
      state.pending.remove(key);
    }
    let current = state.end_fetch(key, generation);

    match result {
      Ok(value) if current => {
        self.write_entry(&state, key, value, category);
      }
      Ok(_) => {
        debug!(key, "discarding result of a request invalidated while in flight");
      }
      Err(e) => {
        debug!(key, error = %e, "fetch failed, not caching");
      }
    }
  }

  /// Force-expire one key. In-flight requests for it are detached: their
  /// waiters still get a result, but it will not be cached, and the next
  /// caller starts a fresh fetch.
  pub fn invalidate(&self, key: &str) -> bool {
    let mut state = self.lock();
    state.bump_generations(|k| k == key);
    state.pending.remove(key);

    let removed = self.inner.storage.remove(key);
    if removed {
      debug!(key, "invalidated");
    }
    removed
  }

  /// Invalidate every key containing `pattern`. Returns the number of cached
  /// entries removed.
  pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
    let mut state = self.lock();
    state.bump_generations(|k| k.contains(pattern));
    state.pending.retain(|k, _| !k.contains(pattern));

    let mut removed = 0;
    for meta in self.inner.storage.entries() {
      if meta.key.contains(pattern) && self.inner.storage.remove(&meta.key) {
        removed += 1;
      }
    }

    if removed > 0 {
      debug!(pattern, removed, "invalidated by pattern");
    }
    removed
  }

  /// Drop every entry in one category.
  pub fn clear_category(&self, category: Category) -> usize {
    let mut state = self.lock();
    let mut removed = 0;
    for meta in self.inner.storage.entries() {
      if meta.category == category {
        state.bump_generations(|k| k == meta.key);
        if self.inner.storage.remove(&meta.key) {
          removed += 1;
        }
      }
    }
    info!(%category, removed, "cleared cache category");
    removed
  }

  /// Drop every expired entry.
  pub fn clear_expired(&self) -> usize {
    let state = self.lock();
    let removed = self.evict_expired(&state);
    debug!(removed, "cleared expired cache entries");
    removed
  }

  /// Drop everything, including pending registrations.
  pub fn clear_all(&self) -> usize {
    let mut state = self.lock();
    state.bump_generations(|_| true);
    state.pending.clear();

    let removed = self.inner.storage.clear();
    info!(removed, "cleared all cache entries");
    removed
  }

  pub fn stats(&self) -> CacheStats {
    let state = self.lock();
    let entries = self.inner.storage.entries();

    let mut stats = CacheStats {
      total: entries.len(),
      pending: state.pending.len(),
      ..Default::default()
    };
    for meta in entries {
      *stats.by_category.entry(meta.category).or_insert(0) += 1;
    }
    stats
  }

  pub fn policy(&self, category: Category) -> CachePolicy {
    self.lock().policies.get(category)
  }

  pub fn update_policy(&self, category: Category, policy: CachePolicy) {
    self.lock().policies.set(category, policy);
    debug!(%category, ?policy, "updated cache policy");
  }

  /// Prefetch a batch of resources. Failures are logged and ignored.
  pub async fn warmup<I>(&self, requests: I)
  where
    I: IntoIterator<Item = (String, BoxFuture<'static, Result<()>>)>,
  {
    info!("warming up cache");
    let requests = requests.into_iter().map(|(key, request)| async move {
      match request.await {
        Ok(()) => debug!(key, "warmup succeeded"),
        Err(e) => warn!(key, error = %e, "warmup failed"),
      }
    });
    futures::future::join_all(requests).await;
    info!(entries = self.stats().total, "cache warmup finished");
  }

  fn read_valid<T: Cacheable>(&self, state: &State, key: &str) -> Option<T> {
    let entry = self.inner.storage.read(key)?;
    let ttl = state.policies.get(entry.category).ttl();

    if Instant::now().duration_since(entry.stored_at) >= ttl {
      self.inner.storage.remove(key);
      debug!(key, "cache entry expired");
      return None;
    }

    match serde_json::from_slice(&entry.data) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(key, error = %e, "cached value has an unexpected shape, dropping it");
        self.inner.storage.remove(key);
        None
      }
    }
  }

  fn write_entry<T: Cacheable>(&self, state: &State, key: &str, value: &T, category: Category) {
    let data = match serde_json::to_vec(value) {
      Ok(data) => data,
      Err(e) => {
        warn!(key, error = %e, "failed to serialize value for cache");
        return;
      }
    };

    self.make_room(state, key, category);

    let entry = CacheEntry {
      category,
      data,
      stored_at: Instant::now(),
    };

    if let Err(e) = self.inner.storage.write(key, entry.clone()) {
      warn!(key, error = %e, "cache write failed, cleaning up and retrying once");
      self.evict_expired(state);
      if let Err(e) = self.inner.storage.write(key, entry) {
        warn!(key, error = %e, "cache write failed again, dropping entry");
        return;
      }
    }

    debug!(key, %category, "cached");
  }

  /// Evict the oldest entry of `category` if inserting `key` would exceed the
  /// category's size limit.
  fn make_room(&self, state: &State, key: &str, category: Category) {
    let Some(max_size) = state.policies.get(category).max_size else {
      return;
    };

    let in_category: Vec<_> = self
      .inner
      .storage
      .entries()
      .into_iter()
      .filter(|m| m.category == category)
      .collect();

    if in_category.iter().any(|m| m.key == key) || in_category.len() < max_size {
      return;
    }

    if let Some(oldest) = in_category.iter().min_by_key(|m| m.stored_at) {
      self.inner.storage.remove(&oldest.key);
      debug!(key = %oldest.key, %category, "evicted oldest cache entry");
    }
  }

  fn evict_expired(&self, state: &State) -> usize {
    let now = Instant::now();
    let mut removed = 0;
    for meta in self.inner.storage.entries() {
      let ttl = state.policies.get(meta.category).ttl();
      if now.duration_since(meta.stored_at) >= ttl && self.inner.storage.remove(&meta.key) {
        removed += 1;
      }
    }
    removed
  }
}
