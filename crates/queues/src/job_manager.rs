//! Facade over queues, routing and maintenance.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, error, info};

use jobflow_core::{CoreError, Job, JobId, JobManagerConfig};
use jobflow_events::{JobNotification, JobNotifier, NotificationTopic};

use crate::consumer::JobConsumerManager;
use crate::manager::QueueManager;
use crate::pool::PoolError;
use crate::services::QueueServices;
use crate::statistics::Statistics;
use crate::storage::{JobStorage, StorageError};
use crate::sync::lock;
use crate::topics::{TopicManager, TopologyEvent};

#[derive(Debug, Error)]
pub enum JobManagerError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

struct Maintenance {
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

/// Entry point: stores jobs and keeps the queues processing them.
pub struct JobManager {
    services: QueueServices,
    queue_manager: Arc<QueueManager>,
    topic_manager: Arc<TopicManager>,
    maintenance: Mutex<Option<Maintenance>>,
}

impl JobManager {
    pub fn new(
        config: JobManagerConfig,
        storage: Arc<dyn JobStorage>,
        consumers: Arc<JobConsumerManager>,
        notifier: Arc<dyn JobNotifier>,
    ) -> Result<Self, PoolError> {
        let configurations = config.queue_configurations();
        let remove_batch_size = config.remove_batch_size;
        let services = QueueServices::new(config, Arc::clone(&storage), consumers, notifier)?;
        Ok(Self::with_services(services, configurations, remove_batch_size))
    }

    /// Build a manager around prepared services (for example with a custom
    /// scheduler).
    pub fn with_services(
        services: QueueServices,
        configurations: jobflow_core::QueueConfigurationManager,
        remove_batch_size: usize,
    ) -> Self {
        let queue_manager = Arc::new(QueueManager::new(services.clone()));
        let topic_manager = Arc::new(TopicManager::new(
            configurations,
            Arc::clone(&queue_manager),
            Arc::clone(&services.storage),
            remove_batch_size,
        ));
        Self {
            services,
            queue_manager,
            topic_manager,
            maintenance: Mutex::new(None),
        }
    }

    /// Establish the topology and start the maintenance thread.
    pub fn start(&self) -> Result<(), PoolError> {
        let mut maintenance = lock(&self.maintenance);
        if maintenance.is_some() {
            return Ok(());
        }
        self.topic_manager.topology_changed(TopologyEvent::Established);

        let (shutdown, stop) = mpsc::channel::<()>();
        let queue_manager = Arc::clone(&self.queue_manager);
        let interval = self.services.config.maintenance_interval();
        let thread = thread::Builder::new()
            .name("jobflow-maintenance".to_string())
            .spawn(move || {
                loop {
                    match stop.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => queue_manager.maintain(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("maintenance stopped");
            })?;
        *maintenance = Some(Maintenance { shutdown, thread });
        info!(
            interval_ms = interval.as_millis() as u64,
            pool_size = self.services.thread_pool.size(),
            "job manager started"
        );
        Ok(())
    }

    /// Store a new job for `topic` and hand it to its queue.
    pub fn add_job(
        &self,
        topic: &str,
        properties: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Job, JobManagerError> {
        self.submit(Job::new(topic, properties))
    }

    /// Store a prepared job and hand it to its queue.
    pub fn submit(&self, job: Job) -> Result<Job, JobManagerError> {
        Job::validate_topic(&job.topic)?;
        let id = self.services.storage.add(job.clone())?;
        debug!(job_id = %id, topic = %job.topic, "job added");

        let queue_name = self.topic_manager.queue_info(&job.topic).queue_name;
        self.services.notifier.notify(
            JobNotification::new(NotificationTopic::Queued, id, job.topic.clone()).with_queue(queue_name),
        );
        self.topic_manager.job_added(&job.topic);
        Ok(job)
    }

    pub fn get_job(&self, id: JobId) -> Result<Option<Job>, JobManagerError> {
        Ok(self.services.storage.get(id)?)
    }

    /// Ask the consumer of a running job to stop.
    pub fn stop_job(&self, id: JobId) -> bool {
        self.queue_manager.stop_job(id)
    }

    /// Drop every pending job of `queue_name`; returns the number of records
    /// deleted.
    pub fn remove_all(&self, queue_name: &str) -> usize {
        self.topic_manager.remove_all(queue_name)
    }

    pub fn topology_changed(&self, event: TopologyEvent) {
        self.topic_manager.topology_changed(event);
    }

    pub fn statistics(&self) -> Statistics {
        self.services.statistics.global()
    }

    /// Run one maintenance pass now.
    pub fn maintain(&self) {
        self.queue_manager.maintain();
    }

    pub fn services(&self) -> &QueueServices {
        &self.services
    }

    pub fn queue_manager(&self) -> &Arc<QueueManager> {
        &self.queue_manager
    }

    pub fn topic_manager(&self) -> &Arc<TopicManager> {
        &self.topic_manager
    }

    /// Stop maintenance, close all queues and wait for the pool to drain.
    pub fn shutdown(&self) {
        if let Some(maintenance) = lock(&self.maintenance).take() {
            let _ = maintenance.shutdown.send(());
            if maintenance.thread.join().is_err() {
                error!("maintenance thread terminated abnormally");
            }
        }
        self.queue_manager.close_all();
        self.services.scheduler.shutdown();
        self.services.thread_pool.join();
        info!("job manager stopped");
    }
}

impl core::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobManager")
            .field("services", &self.services)
            .field("queues", &self.queue_manager.queues().len())
            .finish_non_exhaustive()
    }
}
