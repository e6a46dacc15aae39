//! Shared reconcile loop
//!
//! Every controller drains a [`WorkQueue`] with the same loop: dequeue one
//! key, reconcile it, mark it done on success or push it back and wait a
//! fixed interval on failure. Version conflicts are retried inside the
//! reconcile step with [`retry_on_conflict`].

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::WorkQueue;
use crate::client::ClientError;

/// Default pause after a failed reconcile
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Nothing went wrong on the wire but the desired state cannot be reached yet
    #[error("{0}")]
    NotReady(String),
}

/// Brings the object behind `key` to its desired state
#[async_trait]
pub trait Reconciler<T>: Send + Sync {
    async fn reconcile(&self, key: &T) -> Result<(), ReconcileError>;
}

/// One consumer of a work queue
pub struct Worker<T, R> {
    name: String,
    queue: Arc<WorkQueue<T>>,
    reconciler: Arc<R>,
    retry_interval: Duration,
}

impl<T, R> Clone for Worker<T, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            queue: self.queue.clone(),
            reconciler: self.reconciler.clone(),
            retry_interval: self.retry_interval,
        }
    }
}

impl<T, R> Worker<T, R>
where
    T: Hash + Eq + Clone + Debug + Send + Sync,
    R: Reconciler<T>,
{
    pub fn new(name: impl Into<String>, queue: Arc<WorkQueue<T>>, reconciler: Arc<R>) -> Self {
        Self {
            name: name.into(),
            queue,
            reconciler,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Handle one item. Returns false once the loop should end.
    pub async fn process_next_work_item(&self, cancel: &CancellationToken) -> bool {
        let item = tokio::select! {
            _ = cancel.cancelled() => return false,
            item = self.queue.dequeue() => item,
        };
        let Some(item) = item else {
            return false;
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                self.queue.done(&item);
                return false;
            }
            outcome = self.reconciler.reconcile(&item) => outcome,
        };

        match outcome {
            Ok(()) => {
                debug!("{}: reconciled {:?}", self.name, item);
                self.queue.done(&item);
                true
            }
            Err(e) => {
                warn!(
                    "{}: reconcile of {:?} failed: {} (retrying in {:?})",
                    self.name, item, e, self.retry_interval
                );
                self.queue.requeue(item);
                tokio::select! {
                    _ = cancel.cancelled() => false,
                    _ = tokio::time::sleep(self.retry_interval) => true,
                }
            }
        }
    }

    /// Drain the queue until `cancel` fires or the queue closes.
    ///
    /// Cancellation closes the queue; remaining items are not drained.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("{} started", self.name);
        while self.process_next_work_item(&cancel).await {}
        self.queue.close();
        info!("{} stopped", self.name);
    }
}

/// Re-run a read-modify-write while it loses version races.
///
/// `op` must re-read the object each time it is called. Errors other than
/// `Conflict` are returned immediately, as is the last conflict once
/// `attempts` calls have been made.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < attempts => {
                debug!("Write conflict (attempt {}/{}): {}", attempt, attempts, e);
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails each key a fixed number of times before succeeding
    struct Flaky {
        failures_left: Mutex<u32>,
        handled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Reconciler<String> for Flaky {
        async fn reconcile(&self, key: &String) -> Result<(), ReconcileError> {
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(ReconcileError::NotReady("not yet".into()));
                }
            }
            self.handled.lock().push(key.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_item_is_retried() {
        let queue = Arc::new(WorkQueue::new());
        let reconciler = Arc::new(Flaky {
            failures_left: Mutex::new(2),
            handled: Mutex::new(Vec::new()),
        });
        let worker = Worker::new("test-worker", queue.clone(), reconciler.clone())
            .with_retry_interval(Duration::from_millis(1));
        let cancel = CancellationToken::new();

        queue.enqueue("a".to_string());
        assert!(worker.process_next_work_item(&cancel).await);
        assert!(reconciler.handled.lock().is_empty());
        assert_eq!(queue.len(), 1);

        assert!(worker.process_next_work_item(&cancel).await);
        assert!(worker.process_next_work_item(&cancel).await);
        assert_eq!(*reconciler.handled.lock(), vec!["a".to_string()]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_closes_queue() {
        let queue = Arc::new(WorkQueue::<String>::new());
        let reconciler = Arc::new(Flaky {
            failures_left: Mutex::new(0),
            handled: Mutex::new(Vec::new()),
        });
        let worker = Worker::new("test-worker", queue.clone(), reconciler);
        let cancel = CancellationToken::new();

        let handle = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };
        cancel.cancel();
        handle.await.unwrap();
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_closed_queue_ends_loop() {
        let queue = Arc::new(WorkQueue::<String>::new());
        let reconciler = Arc::new(Flaky {
            failures_left: Mutex::new(0),
            handled: Mutex::new(Vec::new()),
        });
        let worker = Worker::new("test-worker", queue.clone(), reconciler);
        queue.close();
        assert!(!worker.process_next_work_item(&CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn test_retry_on_conflict() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClientError::Conflict("stale".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::Conflict("stale".into())) }
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let result: Result<(), _> = retry_on_conflict(5, || async {
            Err(ClientError::NotFound("gone".into()))
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
    }
}
