//! Fixed-size worker pool for job execution bodies.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::runner::panic_message;
use crate::sync::lock;

/// A unit of work for the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("unable to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A task the pool refused because it was shut down.
pub struct Rejected(Task);

impl Rejected {
    pub fn into_task(self) -> Task {
        self.0
    }
}

impl core::fmt::Debug for Rejected {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Rejected(..)")
    }
}

/// Thread pool backed by a shared channel.
///
/// - A panicking task is logged and does not kill its worker
/// - `shutdown` stops accepting tasks; queued tasks still run
pub struct ThreadPool {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self, PoolError> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size.max(1));
        for i in 0..size.max(1) {
            let rx = Arc::clone(&rx);
            let worker = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || worker_loop(rx))?;
            workers.push(worker);
        }
        debug!(pool = %name, size = workers.len(), "thread pool started");

        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Queue a task; the task is handed back if the pool is shut down.
    pub fn execute(&self, task: Task) -> Result<(), Rejected> {
        match lock(&self.sender).as_ref() {
            Some(tx) => tx.send(task).map_err(|e| Rejected(e.0)),
            None => Err(Rejected(task)),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Stop accepting tasks. Workers exit once the queued tasks are done.
    pub fn shutdown(&self) {
        if lock(&self.sender).take().is_some() {
            debug!(pool = %self.name, "thread pool shut down");
        }
    }

    /// Shut down and wait for the workers, except the calling thread.
    pub fn join(&self) {
        self.shutdown();
        let current = thread::current().id();
        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!(pool = %self.name, "worker thread terminated abnormally");
            }
        }
    }
}

impl core::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("size", &self.size())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Task>>>) {
    loop {
        let task = {
            let rx = lock(&rx);
            rx.recv()
        };
        let Ok(task) = task else {
            break;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
            error!(panic = %panic_message(panic.as_ref()), "pool task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn failing_task() {
        panic!("task failure");
    }

    #[test]
    fn runs_every_task() {
        let pool = ThreadPool::new("test", 3).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..20 {
            let counter = counter.clone();
            let tx = tx.clone();
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            }))
            .unwrap();
        }
        for _ in 0..20 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        pool.join();
    }

    #[test]
    fn panicking_task_keeps_worker_alive() {
        let pool = ThreadPool::new("test", 1).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.execute(Box::new(failing_task)).unwrap();
        pool.execute(Box::new(move || {
            let _ = tx.send(42);
        }))
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        pool.join();
    }

    #[test]
    fn shut_down_pool_hands_tasks_back() {
        let pool = ThreadPool::new("test", 1).unwrap();
        pool.shutdown();
        assert!(pool.is_shut_down());

        let rejected = pool.execute(Box::new(|| {})).unwrap_err();
        rejected.into_task()();
        pool.join();
        assert_eq!(pool.size(), 0);
    }
}
