//! Job model building blocks.
//!
//! This crate contains the **pure** job model (no threads, no storage): job
//! identifiers, the job property bag, job states, topic matching and queue
//! configuration.

pub mod config;
pub mod error;
pub mod id;
pub mod job;
pub mod state;
pub mod topic;

pub use config::{
    JobManagerConfig, QueueConfiguration, QueueConfigurationManager, QueueInfo, QueueType,
    RetryLimit, ThreadPriority, MAIN_QUEUE_NAME,
};
pub use error::{ConfigError, CoreError, CoreResult};
pub use id::JobId;
pub use job::{Job, JobProgress};
pub use state::{InternalJobState, JobState};
pub use topic::TopicMatcher;
