//! Keyed batch loader.
//!
//! Every `load(key)` issued before the calling task yields to the executor
//! lands in the same batch. The batch is dispatched once, from a task
//! spawned with `spawn_local`, and each caller receives the value at its own
//! position in the bulk function's result.

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;
use std::sync::Arc;

use fuel_observability::DataLayerMetrics;
use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::slot::Pending;

/// Loader settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderOptions {
    /// Remember loaded values and answer repeat keys without a batch.
    #[serde(default = "default_cache")]
    pub cache: bool,
    /// Largest number of keys handed to one bulk call; `0` means unbounded.
    ///
    /// Reaching the limit never dispatches early. A larger batch is split
    /// into consecutive chunks at dispatch time.
    #[serde(default = "default_loader_batch_size")]
    pub max_batch_size: usize,
}

fn default_cache() -> bool {
    true
}

fn default_loader_batch_size() -> usize {
    100
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            cache: default_cache(),
            max_batch_size: default_loader_batch_size(),
        }
    }
}

impl LoaderOptions {
    /// Disable the value cache.
    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }
}

/// Lifecycle of the batch currently owned by a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// No keys queued.
    Created,
    /// Keys queued, dispatch scheduled for the next turn.
    Accumulating,
    /// The queued keys were handed to the bulk function.
    Dispatched,
}

type BulkFn<K, V, E> = Box<dyn Fn(Vec<K>) -> LocalBoxFuture<'static, Result<Vec<V>, E>>>;
type Slot<V, E> = oneshot::Sender<Result<V, LoadError<E>>>;

struct LoaderState<K, V, E> {
    queue: Vec<(K, Slot<V, E>)>,
    phase: BatchPhase,
    values: HashMap<K, V>,
}

struct Shared<K, V, E> {
    bulk_fn: BulkFn<K, V, E>,
    options: LoaderOptions,
    state: RefCell<LoaderState<K, V, E>>,
    metrics: OnceCell<Arc<DataLayerMetrics>>,
}

/// Coalesces per-key loads into bulk fetches.
///
/// The bulk function must return exactly one value per key, in key order.
/// Keys are not deduplicated within a batch: loading the same key twice in
/// one turn sends it twice.
///
/// Cloning is cheap; clones share the queue and the value cache.
pub struct KeyedBatchLoader<K, V, E> {
    shared: Rc<Shared<K, V, E>>,
}

impl<K, V, E> Clone for KeyedBatchLoader<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<K, V, E> KeyedBatchLoader<K, V, E>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + 'static,
    E: 'static,
{
    /// Create a loader around a bulk function.
    pub fn new<F, Fut>(bulk_fn: F, options: LoaderOptions) -> Self
    where
        F: Fn(Vec<K>) -> Fut + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + 'static,
    {
        Self {
            shared: Rc::new(Shared {
                bulk_fn: Box::new(move |keys| bulk_fn(keys).boxed_local()),
                options,
                state: RefCell::new(LoaderState {
                    queue: Vec::new(),
                    phase: BatchPhase::Created,
                    values: HashMap::new(),
                }),
                metrics: OnceCell::new(),
            }),
        }
    }

    /// Record batches and cache hits into `metrics`.
    ///
    /// Applies to every clone. Only the first attached sink is kept.
    pub fn with_metrics(self, metrics: Arc<DataLayerMetrics>) -> Self {
        if self.shared.metrics.set(metrics).is_err() {
            warn!("loader metrics already attached, keeping the first");
        }
        self
    }

    /// Queue a key for the current batch.
    ///
    /// The key is queued when this is called, not when the returned future
    /// is first polled. Must be called inside a `LocalSet`.
    pub fn load(&self, key: K) -> Pending<V, LoadError<E>> {
        let mut state = self.shared.state.borrow_mut();

        if self.shared.options.cache {
            if let Some(value) = state.values.get(&key) {
                if let Some(metrics) = self.shared.metrics.get() {
                    metrics.record_loader_cache_hit();
                }
                return Pending::ready(Ok(value.clone()), LoadError::dropped);
            }
        }

        let (tx, rx) = oneshot::channel();
        state.queue.push((key, tx));

        if state.phase != BatchPhase::Accumulating {
            state.phase = BatchPhase::Accumulating;
            drop(state);
            self.schedule_dispatch();
        }

        Pending::new(rx, LoadError::dropped)
    }

    /// Load several keys, results in key order.
    pub fn load_many<I>(&self, keys: I) -> impl Future<Output = Vec<Result<V, LoadError<E>>>>
    where
        I: IntoIterator<Item = K>,
    {
        let pending: Vec<_> = keys.into_iter().map(|key| self.load(key)).collect();
        join_all(pending)
    }

    /// Forget the cached value for one key.
    pub fn clear(&self, key: &K) -> &Self {
        self.shared.state.borrow_mut().values.remove(key);
        self
    }

    /// Forget every cached value.
    pub fn clear_all(&self) -> &Self {
        self.shared.state.borrow_mut().values.clear();
        self
    }

    /// Seed the cache. An already cached value is kept.
    pub fn prime(&self, key: K, value: V) -> &Self {
        self.shared
            .state
            .borrow_mut()
            .values
            .entry(key)
            .or_insert(value);
        self
    }

    /// Keys queued and not yet dispatched.
    pub fn pending(&self) -> usize {
        self.shared.state.borrow().queue.len()
    }

    pub fn phase(&self) -> BatchPhase {
        self.shared.state.borrow().phase
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.shared.options
    }

    fn schedule_dispatch(&self) {
        let shared = Rc::clone(&self.shared);
        tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            shared.dispatch().await;
        });
    }
}

impl<K, V, E> Shared<K, V, E>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + 'static,
    E: 'static,
{
    async fn dispatch(self: Rc<Self>) {
        let mut entries = {
            let mut state = self.state.borrow_mut();
            state.phase = BatchPhase::Dispatched;
            std::mem::take(&mut state.queue)
        };

        let chunk_size = match self.options.max_batch_size {
            0 => entries.len().max(1),
            n => n,
        };

        let mut chunks = Vec::new();
        while !entries.is_empty() {
            let rest = entries.split_off(chunk_size.min(entries.len()));
            let chunk = std::mem::replace(&mut entries, rest);
            chunks.push(Self::dispatch_chunk(&self, chunk));
        }
        join_all(chunks).await;

        let mut state = self.state.borrow_mut();
        if state.phase == BatchPhase::Dispatched {
            state.phase = BatchPhase::Created;
        }
    }

    fn dispatch_chunk(
        shared: &Rc<Self>,
        chunk: Vec<(K, Slot<V, E>)>,
    ) -> impl Future<Output = ()> + 'static {
        let (keys, slots): (Vec<K>, Vec<Slot<V, E>>) = chunk.into_iter().unzip();
        let expected = keys.len();
        debug!(keys = expected, "dispatching batch");
        if let Some(metrics) = shared.metrics.get() {
            metrics.record_batch(expected);
        }

        let cached_keys = shared.options.cache.then(|| keys.clone());
        let call = (shared.bulk_fn)(keys);
        let shared = Rc::clone(shared);

        async move {
            match call.await {
                Ok(values) if values.len() == expected => {
                    if let Some(keys) = cached_keys {
                        let mut state = shared.state.borrow_mut();
                        for (key, value) in keys.into_iter().zip(&values) {
                            state.values.insert(key, value.clone());
                        }
                    }
                    for (slot, value) in slots.into_iter().zip(values) {
                        let _ = slot.send(Ok(value));
                    }
                }
                Ok(values) => {
                    let actual = values.len();
                    warn!(expected, actual, "batch function broke the length contract");
                    shared.reject(slots, LoadError::ContractViolation { expected, actual });
                }
                Err(error) => {
                    warn!(keys = expected, "batch function failed");
                    shared.reject(slots, LoadError::Batch(Arc::new(error)));
                }
            }
        }
    }

    fn reject(&self, slots: Vec<Slot<V, E>>, error: LoadError<E>) {
        if let Some(metrics) = self.metrics.get() {
            metrics.record_batch_failure();
        }
        for slot in slots {
            let _ = slot.send(Err(error.clone()));
        }
    }
}

impl<K, V, E> std::fmt::Debug for KeyedBatchLoader<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("KeyedBatchLoader")
            .field("options", &self.shared.options)
            .field("phase", &state.phase)
            .field("pending", &state.queue.len())
            .field("cached", &state.values.len())
            .finish()
    }
}
