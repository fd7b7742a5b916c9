//! Guildkeep Tasks - Per-Key Sequential Execution
//!
//! [`SequencedExecutor`] runs submitted futures one at a time per key, in
//! submission order, while different keys proceed concurrently. Each key
//! with pending work owns one worker task fed by an unbounded queue; the
//! worker exits and unregisters itself as soon as its queue drains.
//!
//! A task that panics is reported to its own caller as
//! [`TaskError::Aborted`]; the tasks queued behind it still run.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use guildkeep_core::TaskError;
use tokio::sync::{mpsc, oneshot};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs futures sequentially per key.
pub struct SequencedExecutor<K> {
    queues: Arc<DashMap<K, mpsc::UnboundedSender<Job>>>,
}

impl<K> Clone for SequencedExecutor<K> {
    fn clone(&self) -> Self {
        Self {
            queues: Arc::clone(&self.queues),
        }
    }
}

impl<K> Default for SequencedExecutor<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Debug for SequencedExecutor<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencedExecutor")
            .field("active_keys", &self.queues.len())
            .finish()
    }
}

impl<K> SequencedExecutor<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
        }
    }

    /// Queue `task` behind every earlier task submitted for `key`.
    ///
    /// The task is enqueued before this returns, so submission order is
    /// call order. It runs whether or not the returned handle is awaited.
    /// Must be called from within a Tokio runtime.
    pub fn submit<F, T>(&self, key: K, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let label = format!("{:?}", key);
        let (result_tx, result_rx) = oneshot::channel();

        let job_label = label.clone();
        let job: Job = Box::pin(async move {
            let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(value) => Ok(value),
                Err(_) => {
                    tracing::error!(key = %job_label, "Sequenced task panicked");
                    Err(TaskError::Aborted { key: job_label })
                }
            };
            // The caller may have dropped its handle.
            let _ = result_tx.send(outcome);
        });

        if let Some(rx) = self.enqueue(key.clone(), job) {
            tracing::trace!(key = %label, "Starting sequenced worker");
            tokio::spawn(run_worker(Arc::clone(&self.queues), key, rx));
        }

        TaskHandle {
            key: label,
            rx: result_rx,
        }
    }

    /// Push `job` onto the queue for `key`. Returns the receiving end when a
    /// new worker has to be started.
    fn enqueue(&self, key: K, job: Job) -> Option<mpsc::UnboundedReceiver<Job>> {
        // The shard lock is held while sending, so a draining worker cannot
        // unregister between our lookup and the send.
        match self.queues.entry(key) {
            Entry::Occupied(mut occupied) => match occupied.get().send(job) {
                Ok(()) => None,
                Err(mpsc::error::SendError(job)) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let _ = tx.send(job);
                    occupied.insert(tx);
                    Some(rx)
                }
            },
            Entry::Vacant(vacant) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(job);
                vacant.insert(tx);
                Some(rx)
            }
        }
    }

    /// Keys that currently have a worker.
    pub fn active_keys(&self) -> Vec<K> {
        self.queues.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.queues.contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.queues.len()
    }
}

async fn run_worker<K>(
    queues: Arc<DashMap<K, mpsc::UnboundedSender<Job>>>,
    key: K,
    mut rx: mpsc::UnboundedReceiver<Job>,
) where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    let mut completed: u64 = 0;
    loop {
        match rx.try_recv() {
            Ok(job) => {
                job.await;
                completed += 1;
            }
            Err(mpsc::error::TryRecvError::Empty) => {
                let removed = queues.remove_if(&key, |_, _| rx.is_empty()).is_some();
                if removed || rx.is_empty() {
                    break;
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => break,
        }
    }
    tracing::trace!(key = ?key, completed, "Sequenced worker drained");
}

/// Completion handle for a submitted task.
///
/// Resolves to the task's output, or [`TaskError::Aborted`] if the task
/// panicked or was dropped before finishing.
#[derive(Debug)]
pub struct TaskHandle<T> {
    key: String,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Debug rendering of the key the task was submitted under.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Aborted {
                key: self.key.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
