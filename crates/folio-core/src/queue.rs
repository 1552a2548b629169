use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::job::JobId;

/// Entry in the pending queue. Higher priority first, then submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: JobId,
    pub priority: i32,
    pub sequence: u64,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-process priority queue shared by the workers.
#[derive(Debug, Default)]
pub struct PendingQueue {
    heap: Mutex<BinaryHeap<QueuedJob>>,
    notify: Notify,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_heap(&self) -> MutexGuard<'_, BinaryHeap<QueuedJob>> {
        self.heap.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned pending queue");
            poisoned.into_inner()
        })
    }

    pub fn push(&self, job: QueuedJob) {
        self.lock_heap().push(job);
        self.notify.notify_one();
    }

    pub fn extend(&self, jobs: impl IntoIterator<Item = QueuedJob>) {
        let mut heap = self.lock_heap();
        let before = heap.len();
        heap.extend(jobs);
        let added = heap.len() - before;
        drop(heap);
        for _ in 0..added {
            self.notify.notify_one();
        }
    }

    pub fn pop(&self) -> Option<QueuedJob> {
        self.lock_heap().pop()
    }

    /// Waits for the next job, or returns `None` once `cancel` fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<QueuedJob> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.pop() {
                return Some(job);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = &mut notified => {}
            }
        }
    }

    /// Removes every queued job, in dequeue order.
    pub fn drain(&self) -> Vec<QueuedJob> {
        let heap = std::mem::take(&mut *self.lock_heap());
        heap.into_sorted_vec().into_iter().rev().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_heap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
