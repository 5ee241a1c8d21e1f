//! Bounded parallel execution, shared by unordered and round robin queues.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use super::JobQueue;
use crate::handler::JobHandler;
use crate::pool::Task;
use crate::sync::{lock, wait};

/// Runs up to `max` jobs at once; retries go back to the tail after their delay.
pub(crate) struct ParallelQueue {
    pending: Mutex<VecDeque<Arc<JobHandler>>>,
    permits: Mutex<usize>,
    available: Condvar,
    max: usize,
}

impl ParallelQueue {
    pub(crate) fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            pending: Mutex::new(VecDeque::new()),
            permits: Mutex::new(max),
            available: Condvar::new(),
            max,
        }
    }

    pub(crate) fn put(&self, handler: Arc<JobHandler>) {
        lock(&self.pending).push_back(handler);
    }

    pub(crate) fn pop_pending(&self) -> Option<Arc<JobHandler>> {
        lock(&self.pending).pop_front()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<JobHandler>> {
        lock(&self.pending).drain(..).collect()
    }

    pub(crate) fn start(&self, queue: &Arc<JobQueue>, handler: Arc<JobHandler>) {
        if !self.acquire(queue) {
            return;
        }
        if !queue.execute_job(&handler) {
            self.release();
        }
    }

    pub(crate) fn notify_finished(&self, queue: &Arc<JobQueue>, reprocess: Option<Arc<JobHandler>>) {
        if let Some(handler) = reprocess {
            self.reschedule(queue, handler);
        }
        self.release();
    }

    fn reschedule(&self, queue: &Arc<JobQueue>, handler: Arc<JobHandler>) {
        let delay = handler.with_job(|job| job.retry_delay(queue.configuration().retry_delay()));
        if !delay.is_zero() {
            queue.wait_started();
            let waiting = Arc::clone(queue);
            let delayed = Arc::clone(&handler);
            let task: Task = Box::new(move || {
                waiting.requeue(delayed);
                waiting.wait_finished();
            });
            if queue.services().scheduler.schedule(&queue.name(), delay, task) {
                return;
            }
            queue.wait_finished();
            debug!(job_id = %handler.id(), "retry could not be scheduled; requeueing now");
        }
        self.put(handler);
        queue.signal();
    }

    /// Wait for a free slot; `false` once the queue is closed.
    fn acquire(&self, queue: &JobQueue) -> bool {
        let mut permits = lock(&self.permits);
        while *permits == 0 {
            if !queue.is_running() {
                return false;
            }
            permits = wait(&self.available, permits);
        }
        *permits -= 1;
        true
    }

    fn release(&self) {
        let mut permits = lock(&self.permits);
        if *permits < self.max {
            *permits += 1;
        }
        drop(permits);
        self.available.notify_one();
    }

    /// Jobs currently holding a slot.
    pub(crate) fn active(&self) -> usize {
        self.max - *lock(&self.permits)
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.active() == 0 && lock(&self.pending).is_empty()
    }

    pub(crate) fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub(crate) fn close(&self) {
        let _permits = lock(&self.permits);
        self.available.notify_all();
    }

    pub(crate) fn state_info(&self) -> String {
        format!("active={}, maxParallel={}", self.active(), self.max)
    }
}
