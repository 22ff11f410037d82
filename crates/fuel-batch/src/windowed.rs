//! Time-windowed request batcher.
//!
//! Request thunks are queued and run together either when the window timer
//! fires or as soon as the queue reaches `max_batch_size`. Each item settles
//! on its own outcome; a failing request never fails its neighbours.

use std::cell::{OnceCell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use fuel_observability::DataLayerMetrics;
use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::BatchError;
use crate::slot::Pending;

/// Batcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherOptions {
    /// How long the first queued item waits for company.
    pub batch_delay: Duration,
    /// Queue length that flushes without waiting, and the most items run per flush.
    pub max_batch_size: usize,
}

impl BatcherOptions {
    /// A `max_batch_size` of zero is raised to one.
    pub fn new(batch_delay: Duration, max_batch_size: usize) -> Self {
        Self {
            batch_delay,
            max_batch_size: max_batch_size.max(1),
        }
    }
}

impl Default for BatcherOptions {
    /// 10ms window, at most 50 requests per flush.
    fn default() -> Self {
        Self::new(Duration::from_millis(10), 50)
    }
}

type Thunk<T, E> = Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<T, E>>>;

struct QueueItem<T, E> {
    thunk: Thunk<T, E>,
    slot: oneshot::Sender<Result<T, BatchError<E>>>,
}

struct BatcherState<T, E> {
    queue: VecDeque<QueueItem<T, E>>,
    timer: Option<AbortHandle>,
}

struct Shared<T, E> {
    options: BatcherOptions,
    state: RefCell<BatcherState<T, E>>,
    metrics: OnceCell<Arc<DataLayerMetrics>>,
}

/// Queues request thunks and runs them in windows.
///
/// Identical thunks are not deduplicated; each one runs.
pub struct WindowedRequestBatcher<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for WindowedRequestBatcher<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: 'static, E: 'static> WindowedRequestBatcher<T, E> {
    pub fn new(options: BatcherOptions) -> Self {
        Self {
            shared: Rc::new(Shared {
                options: BatcherOptions::new(options.batch_delay, options.max_batch_size),
                state: RefCell::new(BatcherState {
                    queue: VecDeque::new(),
                    timer: None,
                }),
                metrics: OnceCell::new(),
            }),
        }
    }

    /// Record flushes into `metrics`.
    ///
    /// Applies to every clone. Only the first attached sink is kept.
    pub fn with_metrics(self, metrics: Arc<DataLayerMetrics>) -> Self {
        if self.shared.metrics.set(metrics).is_err() {
            warn!("batcher metrics already attached, keeping the first");
        }
        self
    }

    /// Queue a request.
    ///
    /// The thunk is not called until its batch flushes. Must be called
    /// inside a `LocalSet`.
    pub fn add<F, Fut>(&self, thunk: F) -> Pending<T, BatchError<E>>
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let max = self.shared.options.max_batch_size;

        let mut state = self.shared.state.borrow_mut();
        state.queue.push_back(QueueItem {
            thunk: Box::new(move || thunk().boxed_local()),
            slot: tx,
        });

        if state.queue.len() >= max {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            let batch = take_batch(&mut state.queue, max);
            drop(state);
            debug!(items = batch.len(), "batch full, flushing early");
            tokio::task::spawn_local(Rc::clone(&self.shared).run(batch));
        } else if state.timer.is_none() {
            state.timer = Some(Rc::clone(&self.shared).start_timer());
        }

        Pending::new(rx, BatchError::dropped)
    }

    /// Items queued and not yet flushed.
    pub fn len(&self) -> usize {
        self.shared.state.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.borrow().queue.is_empty()
    }

    pub fn options(&self) -> &BatcherOptions {
        &self.shared.options
    }
}

impl<T: 'static, E: 'static> Shared<T, E> {
    fn start_timer(self: Rc<Self>) -> AbortHandle {
        let delay = self.options.batch_delay;
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            self.flush().await;
        })
        .abort_handle()
    }

    /// Timer path: run up to `max_batch_size` items, then re-arm if more arrived.
    async fn flush(self: Rc<Self>) {
        let batch = {
            let mut state = self.state.borrow_mut();
            state.timer = None;
            take_batch(&mut state.queue, self.options.max_batch_size)
        };
        debug!(items = batch.len(), "window elapsed, flushing");

        Rc::clone(&self).run(batch).await;

        let mut state = self.state.borrow_mut();
        if !state.queue.is_empty() && state.timer.is_none() {
            state.timer = Some(Rc::clone(&self).start_timer());
        }
    }

    async fn run(self: Rc<Self>, batch: Vec<QueueItem<T, E>>) {
        if batch.is_empty() {
            return;
        }

        let (calls, slots): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|item| ((item.thunk)(), item.slot))
            .unzip();
        let results = join_all(calls).await;

        let failures = results.iter().filter(|r| r.is_err()).count();
        debug!(items = slots.len(), failures, "flush settled");
        if let Some(metrics) = self.metrics.get() {
            metrics.record_flush(slots.len(), failures);
        }

        for (slot, result) in slots.into_iter().zip(results) {
            let _ = slot.send(result.map_err(BatchError::Request));
        }
    }
}

fn take_batch<T, E>(queue: &mut VecDeque<QueueItem<T, E>>, max: usize) -> Vec<QueueItem<T, E>> {
    let n = max.min(queue.len());
    queue.drain(..n).collect()
}

impl<T, E> std::fmt::Debug for WindowedRequestBatcher<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("WindowedRequestBatcher")
            .field("options", &self.shared.options)
            .field("queued", &state.queue.len())
            .field("timer_armed", &state.timer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tokio::task::LocalSet;
    use tokio::time::Instant;

    use super::*;

    async fn in_local_set<F: Future>(fut: F) -> F::Output {
        LocalSet::new().run_until(fut).await
    }

    fn ok_after(value: u32, delay: Duration) -> impl FnOnce() -> LocalBoxFuture<'static, Result<u32, String>> {
        move || {
            async move {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            .boxed_local()
        }
    }

    // === Window Timer ===

    #[tokio::test(start_paused = true)]
    async fn test_items_wait_for_window() {
        in_local_set(async {
            let batcher = WindowedRequestBatcher::<u32, String>::new(BatcherOptions::new(
                Duration::from_millis(50),
                10,
            ));
            let started = Instant::now();

            let a = batcher.add(|| async { Ok(1) });
            let b = batcher.add(|| async { Ok(2) });
            assert_eq!(batcher.len(), 2);

            assert_eq!(a.await.unwrap(), 1);
            assert_eq!(b.await.unwrap(), 2);
            assert!(started.elapsed() >= Duration::from_millis(50));
            assert!(batcher.is_empty());
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_thunks_not_called_before_flush() {
        in_local_set(async {
            let called = Rc::new(Cell::new(false));
            let batcher = WindowedRequestBatcher::<(), String>::new(BatcherOptions::new(
                Duration::from_millis(50),
                10,
            ));

            let pending = batcher.add({
                let called = called.clone();
                move || {
                    called.set(true);
                    async { Ok(()) }
                }
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(!called.get());

            pending.await.unwrap();
            assert!(called.get());
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_members_run_concurrently() {
        in_local_set(async {
            let batcher = WindowedRequestBatcher::new(BatcherOptions::new(Duration::from_millis(5), 10));
            let started = Instant::now();

            let pending: Vec<_> = (0..4)
                .map(|i| batcher.add(ok_after(i, Duration::from_secs(1))))
                .collect();
            let results = join_all(pending).await;

            assert!(results.iter().all(Result::is_ok));
            assert!(started.elapsed() < Duration::from_secs(2));
        })
        .await;
    }

    // === Size Threshold ===

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_flushes_without_waiting() {
        in_local_set(async {
            let metrics = Arc::new(DataLayerMetrics::new());
            let batcher = WindowedRequestBatcher::<u32, String>::new(BatcherOptions::new(
                Duration::from_secs(60),
                3,
            ))
            .with_metrics(metrics.clone());
            let started = Instant::now();

            let pending: Vec<_> = (0..3).map(|i| batcher.add(move || async move { Ok(i) })).collect();
            assert!(batcher.is_empty());

            let values: Vec<u32> = join_all(pending).await.into_iter().map(Result::unwrap).collect();
            assert_eq!(values, vec![0, 1, 2]);
            assert!(started.elapsed() < Duration::from_secs(60));

            let snapshot = metrics.snapshot();
            assert_eq!(snapshot.windowed_flushes, 1);
            assert_eq!(snapshot.windowed_items, 3);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_goes_to_next_window() {
        in_local_set(async {
            let batcher = WindowedRequestBatcher::<u32, String>::new(BatcherOptions::new(
                Duration::from_millis(100),
                2,
            ));
            let started = Instant::now();

            let first: Vec<_> = (0..2).map(|i| batcher.add(move || async move { Ok(i) })).collect();
            let third = batcher.add(|| async { Ok(2) });
            assert_eq!(batcher.len(), 1);

            join_all(first).await;
            assert!(started.elapsed() < Duration::from_millis(100));

            assert_eq!(third.await.unwrap(), 2);
            assert!(started.elapsed() >= Duration::from_millis(100));
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_added_during_flush_are_drained() {
        in_local_set(async {
            let batcher = WindowedRequestBatcher::<u32, String>::new(BatcherOptions::new(
                Duration::from_millis(10),
                10,
            ));

            let slow = batcher.add(ok_after(1, Duration::from_millis(500)));
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(batcher.is_empty());

            let late = batcher.add(|| async { Ok(2) });
            assert_eq!(late.await.unwrap(), 2);
            assert_eq!(slow.await.unwrap(), 1);
        })
        .await;
    }

    // === Failure Isolation ===

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated_to_its_item() {
        in_local_set(async {
            let batcher = WindowedRequestBatcher::<u32, String>::new(BatcherOptions::default());

            let pending: Vec<_> = (1..=5)
                .map(|i| {
                    batcher.add(move || async move {
                        if i == 3 {
                            Err(format!("station {} not found", i))
                        } else {
                            Ok(i * 10)
                        }
                    })
                })
                .collect();
            let results = join_all(pending).await;

            assert_eq!(results[0], Ok(10));
            assert_eq!(results[1], Ok(20));
            assert_eq!(
                results[2],
                Err(BatchError::Request("station 3 not found".to_string()))
            );
            assert_eq!(results[3], Ok(40));
            assert_eq!(results[4], Ok(50));
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_attached_after_clone() {
        in_local_set(async {
            let batcher = WindowedRequestBatcher::<u32, String>::new(BatcherOptions::default());
            let shared = batcher.clone();
            let metrics = Arc::new(DataLayerMetrics::new());
            let batcher = batcher.with_metrics(metrics.clone());

            let a = shared.add(|| async { Ok(1) });
            let b = batcher.add(|| async { Ok(2) });
            a.await.unwrap();
            b.await.unwrap();

            let snapshot = metrics.snapshot();
            assert_eq!(snapshot.windowed_flushes, 1);
            assert_eq!(snapshot.windowed_items, 2);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_thunks_each_run() {
        in_local_set(async {
            let runs = Rc::new(Cell::new(0));
            let batcher = WindowedRequestBatcher::<(), String>::new(BatcherOptions::default());

            let make = || {
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    async { Ok(()) }
                }
            };
            let a = batcher.add(make());
            let b = batcher.add(make());
            a.await.unwrap();
            b.await.unwrap();
            assert_eq!(runs.get(), 2);
        })
        .await;
    }

    #[test]
    fn test_zero_batch_size_is_raised() {
        assert_eq!(BatcherOptions::new(Duration::ZERO, 0).max_batch_size, 1);
    }
}
