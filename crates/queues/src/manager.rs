//! Registry of running queues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use jobflow_core::{JobId, QueueInfo, QueueType};

use crate::queue::JobQueue;
use crate::services::QueueServices;
use crate::sync::lock;

/// Creates queues on first demand and keeps them until they close.
#[derive(Debug)]
pub struct QueueManager {
    services: QueueServices,
    queues: Mutex<HashMap<String, Arc<JobQueue>>>,
    /// Outdated queues that still finish their in-flight jobs.
    outdated: Mutex<Vec<Arc<JobQueue>>>,
}

impl QueueManager {
    pub fn new(services: QueueServices) -> Self {
        Self {
            services,
            queues: Mutex::new(HashMap::new()),
            outdated: Mutex::new(Vec::new()),
        }
    }

    /// Make sure the queue for `info` runs and knows about `topics`.
    ///
    /// Returns `None` for `ignore` queues and when the queue could not be created.
    pub fn start(&self, info: QueueInfo, topics: &[String]) -> Option<Arc<JobQueue>> {
        if info.configuration.queue_type == QueueType::Ignore {
            debug!(queue = %info.queue_name, "ignoring topics of ignore queue");
            return None;
        }

        let mut queues = lock(&self.queues);
        if let Some(queue) = queues.get(&info.queue_name).filter(|q| q.is_running()) {
            let queue = Arc::clone(queue);
            drop(queues);
            queue.wake_up(Some(topics));
            return Some(queue);
        }

        let name = info.queue_name.clone();
        let queue = match JobQueue::new(info, self.services.clone(), topics.to_vec()) {
            Ok(queue) => queue,
            Err(e) => {
                error!(queue = %name, error = %e, "unable to create job queue");
                return None;
            }
        };
        if let Err(e) = queue.start() {
            error!(queue = %name, error = %e, "unable to start job queue");
            queue.close();
            return None;
        }
        queues.insert(name, Arc::clone(&queue));
        Some(queue)
    }

    pub fn queue(&self, name: &str) -> Option<Arc<JobQueue>> {
        lock(&self.queues).get(name).cloned()
    }

    /// Running queues, sorted by name.
    pub fn queues(&self) -> Vec<Arc<JobQueue>> {
        let mut queues: Vec<_> = lock(&self.queues).values().cloned().collect();
        queues.sort_by_key(|q| q.name());
        queues
    }

    /// Run maintenance on every queue and close the idle ones.
    pub fn maintain(&self) {
        for queue in self.queues() {
            queue.maintain();
            if queue.try_to_close() {
                let name = queue.name();
                let mut queues = lock(&self.queues);
                if queues.get(&name).is_some_and(|q| Arc::ptr_eq(q, &queue)) {
                    queues.remove(&name);
                }
                drop(queues);
                info!(queue = %name, "closed idle job queue");
            }
        }

        let outdated: Vec<_> = lock(&self.outdated).clone();
        for queue in outdated {
            queue.maintain();
            if queue.try_to_close() {
                lock(&self.outdated).retain(|q| !Arc::ptr_eq(q, &queue));
                debug!(queue = %queue.name(), "closed outdated job queue");
            }
        }
    }

    /// Outdate every queue so fresh queues can be created for a new topology.
    pub fn outdate_all(&self) {
        let queues: Vec<_> = lock(&self.queues).drain().map(|(_, q)| q).collect();
        for queue in &queues {
            queue.outdate();
        }
        lock(&self.outdated).extend(queues);
    }

    /// Raise the stop flag of `id` in whichever queue processes it.
    pub fn stop_job(&self, id: JobId) -> bool {
        let outdated: Vec<_> = lock(&self.outdated).clone();
        self.queues()
            .into_iter()
            .chain(outdated)
            .any(|queue| queue.stop_job(id))
    }

    pub fn close_all(&self) {
        let mut queues: Vec<_> = lock(&self.queues).drain().map(|(_, q)| q).collect();
        queues.append(&mut lock(&self.outdated));
        for queue in queues {
            queue.close();
        }
    }
}
