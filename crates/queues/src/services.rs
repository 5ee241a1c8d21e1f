//! Collaborators shared by all queues.

use std::sync::Arc;

use jobflow_core::JobManagerConfig;
use jobflow_events::JobNotifier;

use crate::consumer::JobConsumerManager;
use crate::pool::{PoolError, ThreadPool};
use crate::scheduler::{Scheduler, ThreadScheduler};
use crate::statistics::StatisticsManager;
use crate::storage::JobStorage;

/// Explicitly constructed services handed to every queue.
#[derive(Clone)]
pub struct QueueServices {
    pub config: Arc<JobManagerConfig>,
    pub consumers: Arc<JobConsumerManager>,
    pub scheduler: Arc<dyn Scheduler>,
    pub thread_pool: Arc<ThreadPool>,
    pub statistics: Arc<StatisticsManager>,
    pub storage: Arc<dyn JobStorage>,
    pub notifier: Arc<dyn JobNotifier>,
}

impl QueueServices {
    /// Create services with a shared pool of `config.thread_pool_size` threads
    /// and a timer-thread scheduler.
    pub fn new(
        config: JobManagerConfig,
        storage: Arc<dyn JobStorage>,
        consumers: Arc<JobConsumerManager>,
        notifier: Arc<dyn JobNotifier>,
    ) -> Result<Self, PoolError> {
        let thread_pool = Arc::new(ThreadPool::new("jobflow-pool", config.thread_pool_size)?);
        let scheduler: Arc<dyn Scheduler> = Arc::new(ThreadScheduler::new()?);
        Ok(Self {
            config: Arc::new(config),
            consumers,
            scheduler,
            thread_pool,
            statistics: Arc::new(StatisticsManager::new()),
            storage,
            notifier,
        })
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }
}

impl core::fmt::Debug for QueueServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueServices")
            .field("config", &self.config)
            .field("consumers", &self.consumers)
            .field("thread_pool", &self.thread_pool)
            .finish_non_exhaustive()
    }
}
