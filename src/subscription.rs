//! Subscriptions and their cancellation handles
//!
//! Every read returns a [`Subscription`]: a stream of results plus a
//! [`Cancellable`] that detaches it. Cancelling is idempotent, and dropping the
//! subscription cancels it as well.
//!
//! # Example
//! ```no_run
//! use firebase_data_source::{MemoryStore, ReadMode, RemoteDataSource, UserEntity};
//! use futures::StreamExt;
//!
//! # async fn example() {
//! let source = RemoteDataSource::new(MemoryStore::new());
//! let mut users = source.read_one::<UserEntity>("users/ada", ReadMode::Continuous);
//! let cancel = users.cancellable();
//!
//! while let Some(result) = users.next().await {
//!     match result {
//!         Ok(user) => println!("User: {:?}", user.name),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//!     cancel.cancel();
//! }
//! # }
//! ```

use crate::error::AppError;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Handle that detaches a live subscription
///
/// Clones share the same state. [`cancel`](Self::cancel) may be called any
/// number of times from any clone.
#[derive(Debug, Clone, Default)]
pub struct Cancellable {
    inner: Arc<CancelState>,
}

impl Cancellable {
    /// Create a handle that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Detach the subscription
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the handle is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// A stream of results from a read
///
/// Yields `Ok` for each delivery and `Err` for each failure. The stream ends
/// after a terminal store error, after the single delivery of a one-shot read,
/// or once cancelled.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<Result<T, AppError>>,
    handle: Cancellable,
}

impl<T> Subscription<T> {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Result<T, AppError>>, handle: Cancellable) -> Self {
        Self { receiver, handle }
    }

    /// Handle that cancels this subscription
    pub fn cancellable(&self) -> Cancellable {
        self.handle.clone()
    }

    /// Cancel this subscription
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T, AppError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.handle.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_twice_is_harmless() {
        let handle = Cancellable::new();
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_for_waiters() {
        let handle = Cancellable::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_after_cancel_returns_immediately() {
        let handle = Cancellable::new();
        handle.cancel();
        tokio::time::timeout(Duration::from_millis(100), handle.cancelled())
            .await
            .expect("already cancelled");
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let (_tx, rx) = mpsc::unbounded_channel::<Result<(), AppError>>();
        let handle = Cancellable::new();
        {
            let _subscription = Subscription::new(rx, handle.clone());
        }
        assert!(handle.is_cancelled());
    }
}
