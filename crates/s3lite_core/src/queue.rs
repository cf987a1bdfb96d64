//! Serial operation queue with group-scoped failure propagation.
//!
//! Every remote and local step of a [`crate::Database`] runs through one
//! queue. Exactly one action is in flight at a time; actions start in
//! enqueue order. Each action belongs to a [`QueueGroup`], the set of steps
//! making up one logical operation (lock, pull, execute, push, release). When
//! an action fails, the pending actions of its group are dropped without
//! running, so a later step never runs on top of a failed earlier one.
//! Other groups are unaffected.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A type-erased action. The future resolves to whether the action succeeded.
type Job = Box<dyn FnOnce() -> BoxFuture<bool> + Send>;

/// Identifier of one logical operation's steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueGroup(u64);

impl QueueGroup {
    /// Returns the raw group number.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Idle,
    Running,
}

struct QueueItem {
    group: QueueGroup,
    job: Job,
}

struct Inner {
    state: QueueState,
    pending: VecDeque<QueueItem>,
}

/// A strictly ordered, single-concurrency executor of async actions.
///
/// Cloning is cheap; clones share the same queue. Actions run on the
/// ambient tokio runtime.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<Mutex<Inner>>,
    next_group: Arc<AtomicU64>,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("OperationQueue")
            .field("state", &inner.state)
            .field("pending", &inner.pending.len())
            .finish()
    }
}

/// Completion of one queued action.
#[must_use = "a queued action's result is only observable through its Pending"]
pub struct Pending<T> {
    rx: oneshot::Receiver<CoreResult<T>>,
}

impl<T> Pending<T> {
    /// Waits for the action to settle.
    ///
    /// # Errors
    ///
    /// Returns the action's own error, or `CoreError::OperationAbandoned`
    /// when the action was dropped because an earlier step of its group
    /// failed.
    pub async fn wait(self) -> CoreResult<T> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(CoreError::OperationAbandoned))
    }
}

/// Actions collected for one group and appended to the queue together.
pub struct QueueBatch<'q> {
    queue: &'q OperationQueue,
    group: QueueGroup,
    items: Vec<QueueItem>,
}

impl QueueBatch<'_> {
    /// Adds an action to the batch.
    pub fn push<T, F, Fut>(&mut self, action: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let (job, pending) = into_job(action);
        self.items.push(QueueItem {
            group: self.group,
            job,
        });
        pending
    }

    /// Appends the collected actions contiguously and starts the queue.
    pub fn submit(self) {
        self.queue.submit(self.items);
    }
}

fn into_job<T, F, Fut>(action: F) -> (Job, Pending<T>)
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = CoreResult<T>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let job: Job = Box::new(move || {
        Box::pin(async move {
            let outcome = action().await;
            let succeeded = outcome.is_ok();
            let _ = tx.send(outcome);
            succeeded
        })
    });
    (job, Pending { rx })
}

impl OperationQueue {
    /// Creates an idle, empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: QueueState::Idle,
                pending: VecDeque::new(),
            })),
            next_group: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocates a group no other operation on this queue shares.
    pub fn next_group(&self) -> QueueGroup {
        QueueGroup(self.next_group.fetch_add(1, Ordering::SeqCst))
    }

    /// Enqueues a single action.
    pub fn enqueue<T, F, Fut>(&self, group: QueueGroup, action: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let mut batch = self.batch(group);
        let pending = batch.push(action);
        batch.submit();
        pending
    }

    /// Starts collecting actions for `group`.
    pub fn batch(&self, group: QueueGroup) -> QueueBatch<'_> {
        QueueBatch {
            queue: self,
            group,
            items: Vec::new(),
        }
    }

    /// Returns true while an action is in flight.
    pub fn is_running(&self) -> bool {
        self.inner.lock().state == QueueState::Running
    }

    fn submit(&self, items: Vec<QueueItem>) {
        if items.is_empty() {
            return;
        }
        self.inner.lock().pending.extend(items);
        self.advance();
    }

    fn advance(&self) {
        let item = {
            let mut inner = self.inner.lock();
            if inner.state == QueueState::Running {
                return;
            }
            match inner.pending.pop_front() {
                Some(item) => {
                    inner.state = QueueState::Running;
                    item
                }
                None => return,
            }
        };

        let queue = self.clone();
        let QueueItem { group, job } = item;
        tokio::spawn(async move {
            // A panicking action surfaces as a JoinError and counts as a failure.
            let succeeded = tokio::spawn(async move { job().await })
                .await
                .unwrap_or(false);
            queue.finish(group, succeeded);
        });
    }

    fn finish(&self, group: QueueGroup, succeeded: bool) {
        let abandoned: Vec<QueueItem> = {
            let mut inner = self.inner.lock();
            inner.state = QueueState::Idle;
            if succeeded {
                Vec::new()
            } else {
                let (abandoned, kept): (Vec<_>, Vec<_>) = inner
                    .pending
                    .drain(..)
                    .partition(|item| item.group == group);
                inner.pending = kept.into();
                abandoned
            }
        };

        if !abandoned.is_empty() {
            debug!(
                group = group.as_u64(),
                count = abandoned.len(),
                "dropping remaining steps of failed group"
            );
        }
        drop(abandoned);

        self.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn record(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) {
        log.lock().push(name);
    }

    #[tokio::test]
    async fn actions_run_in_enqueue_order() {
        let queue = OperationQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let group = queue.next_group();

        let mut pendings = Vec::new();
        for (name, delay) in [("a", 30u64), ("b", 0), ("c", 10)] {
            let log = Arc::clone(&log);
            pendings.push(queue.enqueue(group, move || async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                record(&log, name);
                Ok::<_, CoreError>(name)
            }));
        }

        let mut results = Vec::new();
        for pending in pendings {
            results.push(pending.wait().await.unwrap());
        }
        assert_eq!(results, vec!["a", "b", "c"]);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn only_one_action_in_flight() {
        let queue = OperationQueue::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut pendings = Vec::new();
        for _ in 0..8 {
            let group = queue.next_group();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            pendings.push(queue.enqueue(group, move || async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, CoreError>(())
            }));
        }
        for pending in pendings {
            pending.wait().await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn failure_drains_rest_of_group_only() {
        let queue = OperationQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing = queue.next_group();
        let healthy = queue.next_group();

        let mut failing_batch = queue.batch(failing);
        let first = {
            let log = Arc::clone(&log);
            failing_batch.push(move || async move {
                record(&log, "f1");
                Ok::<_, CoreError>(())
            })
        };
        let second = {
            let log = Arc::clone(&log);
            failing_batch.push(move || async move {
                record(&log, "f2");
                Err::<(), _>(CoreError::engine("boom"))
            })
        };
        let third = {
            let log = Arc::clone(&log);
            failing_batch.push(move || async move {
                record(&log, "f3");
                Ok::<_, CoreError>(())
            })
        };
        failing_batch.submit();

        let mut healthy_batch = queue.batch(healthy);
        let others: Vec<_> = ["h1", "h2", "h3"]
            .into_iter()
            .map(|name| {
                let log = Arc::clone(&log);
                healthy_batch.push(move || async move {
                    record(&log, name);
                    Ok::<_, CoreError>(name)
                })
            })
            .collect();
        healthy_batch.submit();

        assert!(first.wait().await.is_ok());
        assert!(matches!(
            second.wait().await,
            Err(CoreError::Engine { .. })
        ));
        assert!(matches!(
            third.wait().await,
            Err(CoreError::OperationAbandoned)
        ));
        for (pending, name) in others.into_iter().zip(["h1", "h2", "h3"]) {
            assert_eq!(pending.wait().await.unwrap(), name);
        }
        assert_eq!(*log.lock(), vec!["f1", "f2", "h1", "h2", "h3"]);
    }

    #[tokio::test]
    async fn panicking_action_counts_as_failure() {
        let queue = OperationQueue::new();
        let group = queue.next_group();

        let mut batch = queue.batch(group);
        let panicking = batch.push(|| async {
            if true {
                panic!("action panicked");
            }
            Ok::<_, CoreError>(())
        });
        let skipped = batch.push(|| async { Ok::<_, CoreError>(()) });
        batch.submit();

        let next = queue.enqueue(queue.next_group(), || async { Ok::<_, CoreError>(7) });

        assert!(matches!(
            panicking.wait().await,
            Err(CoreError::OperationAbandoned)
        ));
        assert!(matches!(
            skipped.wait().await,
            Err(CoreError::OperationAbandoned)
        ));
        assert_eq!(next.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn groups_are_unique() {
        let queue = OperationQueue::new();
        let a = queue.next_group();
        let b = queue.next_group();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
