//! Cancellable stream of values delivered to one subscriber.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use vitalsync_storage::{CancelHandle, HandleKey};

/// Values for one live subscription: an optional cached value, then every
/// pushed value in delivery order.
///
/// Nothing is yielded once the subscription is cancelled, whether through
/// [`cancel`](Self::cancel), registry cleanup, or dropping it.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    handle: CancelHandle,
    key: Option<HandleKey>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<T>,
        handle: CancelHandle,
        key: Option<HandleKey>,
    ) -> Self {
        Self {
            receiver,
            handle,
            key,
        }
    }

    /// A subscription with no live listener behind it.
    pub(crate) fn detached(receiver: mpsc::UnboundedReceiver<T>) -> Self {
        Self::new(receiver, CancelHandle::noop(), None)
    }

    /// Next value, or `None` once cancelled or the listener has ended.
    pub async fn recv(&mut self) -> Option<T> {
        if self.handle.is_cancelled() {
            return None;
        }
        let value = self.receiver.recv().await?;
        if self.handle.is_cancelled() {
            return None;
        }
        Some(value)
    }

    /// Next value if one is already buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        if self.handle.is_cancelled() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Detach the listener. Returns `false` if already cancelled.
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Registry key of the listener, `None` for detached subscriptions.
    pub fn key(&self) -> Option<&HandleKey> {
        self.key.as_ref()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if self.handle.is_cancelled() {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(_)) if self.handle.is_cancelled() => Poll::Ready(None),
            other => other,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
