//! Delayed task execution.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::pool::{PoolError, Task};
use crate::runner::panic_message;
use crate::sync::{lock, wait, wait_timeout};

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    /// Schedule `task` to run once `delay` has passed.
    ///
    /// Returns `false` if the task was not accepted; the caller decides what to
    /// do instead.
    fn schedule(&self, name: &str, delay: Duration, task: Task) -> bool;

    /// Stop accepting tasks.
    fn shutdown(&self) {}
}

struct Entry {
    due: Instant,
    seq: u64,
    name: String,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: the heap yields the earliest due entry first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Timer {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct Shared {
    timer: Mutex<Timer>,
    changed: Condvar,
}

/// [`Scheduler`] backed by a single timer thread.
pub struct ThreadScheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn new() -> Result<Self, PoolError> {
        let shared = Arc::new(Shared {
            timer: Mutex::new(Timer::default()),
            changed: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("jobflow-scheduler".to_string())
            .spawn(move || timer_loop(&worker))?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        lock(&self.shared.timer).entries.len()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, name: &str, delay: Duration, task: Task) -> bool {
        let mut timer = lock(&self.shared.timer);
        if timer.shutdown {
            return false;
        }
        let seq = timer.next_seq;
        timer.next_seq += 1;
        timer.entries.push(Entry {
            due: Instant::now() + delay,
            seq,
            name: name.to_string(),
            task,
        });
        drop(timer);
        self.shared.changed.notify_all();
        true
    }

    /// Stop the timer thread. Tasks that are not due yet are discarded.
    fn shutdown(&self) {
        let discarded = {
            let mut timer = lock(&self.shared.timer);
            timer.shutdown = true;
            std::mem::take(&mut timer.entries)
        };
        self.shared.changed.notify_all();
        if !discarded.is_empty() {
            debug!(tasks = discarded.len(), "discarding scheduled tasks");
        }
        drop(discarded);

        if let Some(handle) = lock(&self.thread).take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("scheduler thread terminated abnormally");
            }
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        Scheduler::shutdown(self);
    }
}

fn timer_loop(shared: &Shared) {
    let mut timer = lock(&shared.timer);
    loop {
        if timer.shutdown {
            break;
        }
        let now = Instant::now();
        match timer.entries.peek().map(|e| e.due) {
            Some(due) if due <= now => {
                let Some(entry) = timer.entries.pop() else {
                    continue;
                };
                drop(timer);
                debug!(task = %entry.name, "running scheduled task");
                let task = entry.task;
                if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                    error!(task = %entry.name, panic = %panic_message(panic.as_ref()), "scheduled task panicked");
                }
                timer = lock(&shared.timer);
            }
            Some(due) => timer = wait_timeout(&shared.changed, timer, due - now),
            None => timer = wait(&shared.changed, timer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn tasks_run_in_due_order() {
        let scheduler = ThreadScheduler::new().unwrap();
        let (tx, rx) = mpsc::channel();

        for (name, delay) in [("late", 60u64), ("early", 10), ("middle", 30)] {
            let tx = tx.clone();
            assert!(scheduler.schedule(
                name,
                Duration::from_millis(delay),
                Box::new(move || {
                    let _ = tx.send(name);
                }),
            ));
        }

        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn shut_down_scheduler_rejects_tasks() {
        let scheduler = ThreadScheduler::new().unwrap();
        scheduler.schedule("never", Duration::from_secs(60), Box::new(|| {}));
        assert_eq!(scheduler.pending(), 1);

        scheduler.shutdown();

        assert_eq!(scheduler.pending(), 0);
        assert!(!scheduler.schedule("after", Duration::ZERO, Box::new(|| {})));
    }
}
