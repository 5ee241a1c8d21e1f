//! The job queue engine.
//!
//! Jobs are read from a [`JobStorage`], routed to named queues by topic and
//! executed against registered consumers on a thread pool.
//!
//! ## Components
//!
//! - `JobHandler`: one job plus its in-flight execution state
//! - `QueueJobCache`: per-queue prefetch of pending job records
//! - `JobQueue`: the queue engine (ordered or parallel strategy)
//! - `QueueManager` / `TopicManager`: queue registry and topic routing
//! - `JobManager`: facade owning all of the above plus a maintenance thread

pub mod cache;
pub mod consumer;
pub mod context;
pub mod handler;
pub mod job_manager;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod services;
pub mod statistics;
pub mod storage;
pub mod topics;

mod sync;


pub use cache::QueueJobCache;
pub use consumer::{Completion, FnConsumer, JobConsumerManager, JobExecutor};
pub use context::{ContextError, JobExecutionContext, JobExecutionResult, ResultBuilder};
pub use handler::JobHandler;
pub use job_manager::{JobManager, JobManagerError};
pub use manager::QueueManager;
pub use pool::{PoolError, ThreadPool};
pub use queue::JobQueue;
pub use runner::ExecutionOutcome;
pub use scheduler::{Scheduler, ThreadScheduler};
pub use services::QueueServices;
pub use statistics::{Statistics, StatisticsManager};
pub use storage::{InMemoryJobStorage, JobRecord, JobStorage, ReadError, StorageError};
pub use topics::{TopicManager, TopologyEvent};
