//! Result slots handed back to callers of the batch components.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Resolves once the batch that owns this slot has settled it.
///
/// The request is already queued when a `Pending` is returned; dropping it
/// only discards the result.
#[derive(Debug)]
#[must_use = "the result is lost unless the slot is awaited"]
pub struct Pending<T, Err> {
    rx: oneshot::Receiver<Result<T, Err>>,
    dropped: fn() -> Err,
}

impl<T, Err> Pending<T, Err> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, Err>>, dropped: fn() -> Err) -> Self {
        Self { rx, dropped }
    }

    /// A slot that is already settled.
    pub(crate) fn ready(result: Result<T, Err>, dropped: fn() -> Err) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self::new(rx, dropped)
    }
}

impl<T, Err> Future for Pending<T, Err> {
    type Output = Result<T, Err>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let dropped = self.dropped;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or_else(|_| Err(dropped())))
    }
}
