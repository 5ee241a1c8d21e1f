//! Strict FIFO execution, one job at a time.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use jobflow_core::JobId;

use super::JobQueue;
use crate::handler::JobHandler;
use crate::sync::{lock, wait, wait_timeout};

enum Slot {
    Idle,
    Running,
    Finished(Option<Arc<JobHandler>>),
}

/// Blocks the queue loop until the running job is finished.
///
/// A failed job is retried in place after its retry delay, so no later job
/// overtakes it.
pub(crate) struct OrderedQueue {
    pending: Mutex<BTreeMap<(DateTime<Utc>, JobId), Arc<JobHandler>>>,
    slot: Mutex<Slot>,
    done: Condvar,
    sleeping_until: Mutex<Option<Instant>>,
    sleep: Condvar,
}

impl OrderedQueue {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            slot: Mutex::new(Slot::Idle),
            done: Condvar::new(),
            sleeping_until: Mutex::new(None),
            sleep: Condvar::new(),
        }
    }

    pub(crate) fn put(&self, handler: Arc<JobHandler>) {
        let key = handler.with_job(|job| job.ordering_key());
        lock(&self.pending).insert(key, handler);
    }

    pub(crate) fn pop_pending(&self) -> Option<Arc<JobHandler>> {
        lock(&self.pending).pop_first().map(|(_, h)| h)
    }

    pub(crate) fn drain(&self) -> Vec<Arc<JobHandler>> {
        std::mem::take(&mut *lock(&self.pending)).into_values().collect()
    }

    pub(crate) fn start(&self, queue: &Arc<JobQueue>, handler: Arc<JobHandler>) {
        let mut current = handler;
        loop {
            *lock(&self.slot) = Slot::Running;
            if !queue.execute_job(&current) {
                *lock(&self.slot) = Slot::Idle;
                return;
            }

            let reprocess = {
                let mut slot = lock(&self.slot);
                while !matches!(*slot, Slot::Finished(_)) {
                    if !queue.is_running() {
                        *slot = Slot::Idle;
                        return;
                    }
                    slot = wait(&self.done, slot);
                }
                match std::mem::replace(&mut *slot, Slot::Idle) {
                    Slot::Finished(reprocess) => reprocess,
                    _ => None,
                }
            };

            let Some(next) = reprocess else {
                return;
            };
            let delay = next.with_job(|job| job.retry_delay(queue.configuration().retry_delay()));
            debug!(job_id = %next.id(), delay_ms = delay.as_millis() as u64, "retrying ordered job in place");
            if !self.sleep_for(queue, delay) {
                return;
            }
            current = next;
        }
    }

    pub(crate) fn notify_finished(&self, queue: &JobQueue, reprocess: Option<Arc<JobHandler>>) {
        let mut slot = lock(&self.slot);
        if matches!(*slot, Slot::Running) {
            *slot = Slot::Finished(reprocess);
            drop(slot);
            self.done.notify_all();
            return;
        }
        drop(slot);
        // Nobody waits for this job any more; let the loop pick it up.
        if let Some(handler) = reprocess {
            self.put(handler);
            queue.signal();
        }
    }

    /// Returns `false` if the queue was closed while sleeping.
    fn sleep_for(&self, queue: &JobQueue, delay: Duration) -> bool {
        let until = Instant::now() + delay;
        let mut sleeping = lock(&self.sleeping_until);
        *sleeping = Some(until);
        while queue.is_running() {
            let now = Instant::now();
            if now >= until {
                break;
            }
            sleeping = wait_timeout(&self.sleep, sleeping, until - now);
        }
        *sleeping = None;
        queue.is_running()
    }

    pub(crate) fn sleeping_until(&self) -> Option<Instant> {
        *lock(&self.sleeping_until)
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(*lock(&self.slot), Slot::Idle)
            && self.sleeping_until().is_none()
            && lock(&self.pending).is_empty()
    }

    pub(crate) fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub(crate) fn close(&self) {
        {
            let _sleeping = lock(&self.sleeping_until);
            self.sleep.notify_all();
        }
        let _slot = lock(&self.slot);
        self.done.notify_all();
    }

    pub(crate) fn state_info(&self) -> String {
        let running = !matches!(*lock(&self.slot), Slot::Idle);
        match self.sleeping_until() {
            Some(until) => format!(
                "isRunning={running}, isSleepingUntil=+{}ms",
                until.saturating_duration_since(Instant::now()).as_millis()
            ),
            None => format!("isRunning={running}, isSleepingUntil=-"),
        }
    }
}
