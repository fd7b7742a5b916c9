//! Single-slot awaitable value cell.
//!
//! `ObservableState` is the readiness signal the caches build on: writers
//! call [`ObservableState::set`], readers await [`ObservableState::get`] or
//! [`ObservableState::wait_for`] with a timeout. A timeout is not an error;
//! the reader simply gets whatever value is current (possibly none).

use std::time::Duration;
use tokio::sync::watch;

/// Awaitable value cell backed by a `watch` channel.
#[derive(Debug)]
pub struct ObservableState<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> Default for ObservableState<T>
where
    T: Clone + PartialEq + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObservableState<T>
where
    T: Clone + PartialEq + Send + Sync,
{
    /// Create an empty cell.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Create a cell holding `value`.
    pub fn with_value(value: T) -> Self {
        let (tx, _rx) = watch::channel(Some(value));
        Self { tx }
    }

    /// Store `value` and wake every waiter.
    pub fn set(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    /// Clear the cell without waking anybody.
    pub fn reset(&self) {
        self.tx.send_if_modified(|current| {
            *current = None;
            false
        });
    }

    /// Current value without waiting.
    pub fn current(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Returns true once a value has been set.
    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until a value is present or `timeout` elapses.
    ///
    /// Returns the current value either way.
    pub async fn get(&self, timeout: Duration) -> Option<T> {
        let mut rx = self.tx.subscribe();
        let value = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => value.clone(),
            _ => self.current(),
        };
        value
    }

    /// Wait until the value equals `target` or `timeout` elapses.
    ///
    /// Returns whether the target value was observed.
    pub async fn wait_for(&self, target: &T, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            rx.wait_for(|value| value.as_ref() == Some(target)),
        )
        .await;
        matches!(reached, Ok(Ok(_)))
    }
}
