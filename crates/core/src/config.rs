//! Queue and job manager configuration.
//!
//! Configurations are plain serde values. `JobManagerConfig::from_env()` reads
//! `JOBFLOW_*` variables and falls back to defaults (with a warning) when a
//! value cannot be parsed.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::topic::TopicMatcher;

/// Name of the fallback queue used when no configuration matches a topic.
pub const MAIN_QUEUE_NAME: &str = "<main queue>";

const DEFAULT_MAX_PARALLEL: i32 = 15;
const DEFAULT_RETRIES: i64 = 10;
const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
const DEFAULT_ACK_TIMEOUT_MS: u64 = 60 * 1000;
const DEFAULT_ACK_REVALIDATE_DELAY_MS: u64 = 500;

/// Queue topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// Strict FIFO, one job in flight.
    Ordered,
    /// Bounded parallel execution, FIFO admission.
    #[default]
    Unordered,
    /// Parallel execution, one job per topic per pass.
    TopicRoundRobin,
    /// Jobs for matching topics are left untouched.
    Ignore,
}

/// Scheduling hint for job execution threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
    Min,
    #[default]
    Norm,
    Max,
}

/// Maximum number of retries for a job.
///
/// Serialized as a number where `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum RetryLimit {
    Limited(u32),
    Unlimited,
}

impl RetryLimit {
    /// Whether performing retry number `retry_count` would exceed the limit.
    pub fn is_exceeded_by(&self, retry_count: u32) -> bool {
        match self {
            RetryLimit::Limited(max) => retry_count > *max,
            RetryLimit::Unlimited => false,
        }
    }
}

impl Default for RetryLimit {
    fn default() -> Self {
        RetryLimit::Limited(DEFAULT_RETRIES as u32)
    }
}

impl TryFrom<i64> for RetryLimit {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(RetryLimit::Unlimited),
            v if (0..=u32::MAX as i64).contains(&v) => Ok(RetryLimit::Limited(v as u32)),
            v => Err(ConfigError::Parse(format!("retries must be >= -1, got {v}"))),
        }
    }
}

impl From<RetryLimit> for i64 {
    fn from(value: RetryLimit) -> Self {
        match value {
            RetryLimit::Limited(v) => v as i64,
            RetryLimit::Unlimited => -1,
        }
    }
}

fn default_max_parallel() -> i32 {
    DEFAULT_MAX_PARALLEL
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_ack_timeout_ms() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}

fn default_ack_revalidate_delay_ms() -> u64 {
    DEFAULT_ACK_REVALIDATE_DELAY_MS
}

/// Configuration of one named queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfiguration {
    /// Queue name; `{0}` is replaced with the part of the topic matched by a wildcard.
    pub name: String,
    #[serde(default)]
    pub queue_type: QueueType,
    #[serde(default)]
    pub topics: Vec<TopicMatcher>,
    /// Maximum number of jobs in flight; `-1` means one per CPU.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: i32,
    #[serde(default)]
    pub retries: RetryLimit,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub priority: ThreadPriority,
    /// Keep succeeded job records instead of deleting them.
    #[serde(default)]
    pub keep_jobs: bool,
    /// Size of a dedicated thread pool; `0` uses the shared pool.
    #[serde(default)]
    pub own_thread_pool_size: usize,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Pause before lost-acknowledgement candidates are checked again.
    #[serde(default = "default_ack_revalidate_delay_ms")]
    pub ack_revalidate_delay_ms: u64,
    /// Higher ranking configurations are consulted first.
    #[serde(default)]
    pub ranking: i32,
}

impl QueueConfiguration {
    pub fn new(name: impl Into<String>, queue_type: QueueType) -> Self {
        Self {
            name: name.into(),
            queue_type,
            topics: Vec::new(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            retries: RetryLimit::default(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            priority: ThreadPriority::default(),
            keep_jobs: false,
            own_thread_pool_size: 0,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            ack_revalidate_delay_ms: DEFAULT_ACK_REVALIDATE_DELAY_MS,
            ranking: 0,
        }
    }

    /// The fallback configuration used for topics no other queue claims.
    pub fn main_queue() -> Self {
        Self::new(MAIN_QUEUE_NAME, QueueType::Unordered)
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for t in topics {
            let matcher = t
                .as_ref()
                .parse()
                .map_err(|e: crate::CoreError| ConfigError::invalid_queue(&self.name, e.to_string()))?;
            self.topics.push(matcher);
        }
        Ok(self)
    }

    pub fn with_max_parallel(mut self, max: i32) -> Self {
        self.max_parallel = max;
        self
    }

    pub fn with_retries(mut self, retries: RetryLimit) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_keep_jobs(mut self, keep: bool) -> Self {
        self.keep_jobs = keep;
        self
    }

    pub fn with_own_thread_pool(mut self, size: usize) -> Self {
        self.own_thread_pool_size = size;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_ack_revalidate_delay(mut self, delay: Duration) -> Self {
        self.ack_revalidate_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_ranking(mut self, ranking: i32) -> Self {
        self.ranking = ranking;
        self
    }

    /// Check the configuration; invalid configurations are ignored by the
    /// configuration manager.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid_queue(&self.name, "name is required"));
        }
        if self.name != MAIN_QUEUE_NAME && self.topics.is_empty() {
            return Err(ConfigError::invalid_queue(&self.name, "at least one topic is required"));
        }
        if matches!(self.queue_type, QueueType::Unordered | QueueType::TopicRoundRobin)
            && self.max_parallel < 1
            && self.max_parallel != -1
        {
            return Err(ConfigError::invalid_queue(&self.name, "max_parallel must be >= 1 or -1"));
        }
        Ok(())
    }

    /// Number of concurrently executing jobs this queue allows.
    pub fn effective_max_parallel(&self) -> usize {
        match self.queue_type {
            QueueType::Ordered => 1,
            _ if self.max_parallel == -1 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            _ => self.max_parallel.max(1) as usize,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_revalidate_delay(&self) -> Duration {
        Duration::from_millis(self.ack_revalidate_delay_ms)
    }

    /// If this configuration handles `topic`, return the resulting queue name.
    pub fn match_topic(&self, topic: &str) -> Option<String> {
        self.topics
            .iter()
            .find_map(|m| m.match_topic(topic))
            .map(|rest| self.name.replace("{0}", rest))
    }
}

/// Queue assignment of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub queue_name: String,
    pub configuration: QueueConfiguration,
}

/// Resolves topics to queue configurations.
#[derive(Debug, Clone)]
pub struct QueueConfigurationManager {
    main: QueueConfiguration,
    configurations: Vec<QueueConfiguration>,
}

impl QueueConfigurationManager {
    /// Build a manager; invalid configurations are skipped with a warning.
    pub fn new(main: QueueConfiguration, configurations: Vec<QueueConfiguration>) -> Self {
        let mut configurations: Vec<_> = configurations
            .into_iter()
            .filter(|c| match c.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(queue = %c.name, error = %e, "ignoring invalid queue configuration");
                    false
                }
            })
            .collect();
        configurations.sort_by(|a, b| b.ranking.cmp(&a.ranking).then_with(|| a.name.cmp(&b.name)));
        Self { main, configurations }
    }

    pub fn main_queue(&self) -> &QueueConfiguration {
        &self.main
    }

    pub fn configurations(&self) -> &[QueueConfiguration] {
        &self.configurations
    }

    /// Find the queue for `topic`, falling back to the main queue.
    pub fn queue_info(&self, topic: &str) -> QueueInfo {
        for c in &self.configurations {
            if let Some(queue_name) = c.match_topic(topic) {
                return QueueInfo {
                    queue_name,
                    configuration: c.clone(),
                };
            }
        }
        QueueInfo {
            queue_name: self.main.name.clone(),
            configuration: self.main.clone(),
        }
    }
}

fn default_preload_limit() -> usize {
    10
}

fn default_thread_pool_size() -> usize {
    35
}

fn default_maintenance_interval_ms() -> u64 {
    30 * 1000
}

fn default_max_suspend_ms() -> u64 {
    60 * 60 * 1000
}

fn default_remove_batch_size() -> usize {
    50
}

/// Settings shared by all queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManagerConfig {
    /// Maximum number of jobs loaded per topic per cache fill.
    #[serde(default = "default_preload_limit")]
    pub preload_limit: usize,
    /// Size of the shared job execution pool.
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,
    /// A suspended queue resumes on its own after this long.
    #[serde(default = "default_max_suspend_ms")]
    pub max_suspend_ms: u64,
    /// Number of job records removed per storage batch.
    #[serde(default = "default_remove_batch_size")]
    pub remove_batch_size: usize,
    #[serde(default = "QueueConfiguration::main_queue")]
    pub main_queue: QueueConfiguration,
    #[serde(default)]
    pub queues: Vec<QueueConfiguration>,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            preload_limit: default_preload_limit(),
            thread_pool_size: default_thread_pool_size(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            max_suspend_ms: default_max_suspend_ms(),
            remove_batch_size: default_remove_batch_size(),
            main_queue: QueueConfiguration::main_queue(),
            queues: Vec::new(),
        }
    }
}

impl JobManagerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a JSON array of queue configurations.
    pub fn load_queues(path: impl AsRef<Path>) -> Result<Vec<QueueConfiguration>, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build a configuration from `JOBFLOW_*` environment variables.
    ///
    /// - `JOBFLOW_PRELOAD_LIMIT`, `JOBFLOW_THREAD_POOL_SIZE`,
    ///   `JOBFLOW_MAINTENANCE_INTERVAL_MS`, `JOBFLOW_MAX_SUSPEND_MS`,
    ///   `JOBFLOW_REMOVE_BATCH_SIZE`: numbers
    /// - `JOBFLOW_QUEUE_CONFIG`: path to a JSON array of queue configurations
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut config = Self {
            preload_limit: env_or("JOBFLOW_PRELOAD_LIMIT", defaults.preload_limit),
            thread_pool_size: env_or("JOBFLOW_THREAD_POOL_SIZE", defaults.thread_pool_size),
            maintenance_interval_ms: env_or(
                "JOBFLOW_MAINTENANCE_INTERVAL_MS",
                defaults.maintenance_interval_ms,
            ),
            max_suspend_ms: env_or("JOBFLOW_MAX_SUSPEND_MS", defaults.max_suspend_ms),
            remove_batch_size: env_or("JOBFLOW_REMOVE_BATCH_SIZE", defaults.remove_batch_size),
            ..defaults
        };
        if let Ok(path) = std::env::var("JOBFLOW_QUEUE_CONFIG") {
            config.queues = Self::load_queues(&path)?;
        }
        Ok(config)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn max_suspend(&self) -> Duration {
        Duration::from_millis(self.max_suspend_ms)
    }

    pub fn queue_configurations(&self) -> QueueConfigurationManager {
        QueueConfigurationManager::new(self.main_queue.clone(), self.queues.clone())
    }
}

fn env_or<T: core::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "invalid value; using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queue(name: &str, topics: &[&str]) -> QueueConfiguration {
        QueueConfiguration::new(name, QueueType::Unordered)
            .with_topics(topics)
            .unwrap()
    }

    #[test]
    fn retry_limit_round_trips_through_numbers() {
        let unlimited: RetryLimit = serde_json::from_str("-1").unwrap();
        assert_eq!(unlimited, RetryLimit::Unlimited);
        let three: RetryLimit = serde_json::from_str("3").unwrap();
        assert_eq!(three, RetryLimit::Limited(3));
        assert!(serde_json::from_str::<RetryLimit>("-2").is_err());
        assert_eq!(serde_json::to_string(&RetryLimit::Unlimited).unwrap(), "-1");
    }

    #[test]
    fn queue_configuration_defaults_from_json() {
        let c: QueueConfiguration =
            serde_json::from_str(r#"{"name": "render", "topics": ["org/example/*"]}"#).unwrap();
        assert_eq!(c.queue_type, QueueType::Unordered);
        assert_eq!(c.max_parallel, DEFAULT_MAX_PARALLEL);
        assert_eq!(c.retries, RetryLimit::Limited(10));
        assert_eq!(c.retry_delay(), Duration::from_millis(2000));
        assert_eq!(c.ack_timeout(), Duration::from_secs(60));
        assert_eq!(c.ack_revalidate_delay(), Duration::from_millis(500));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validation_rules() {
        assert!(queue("", &["a"]).validate().is_err());
        assert!(QueueConfiguration::new("no-topics", QueueType::Ordered).validate().is_err());
        assert!(queue("zero", &["a"]).with_max_parallel(0).validate().is_err());
        assert!(queue("cpus", &["a"]).with_max_parallel(-1).validate().is_ok());
        assert!(QueueConfiguration::main_queue().validate().is_ok());
    }

    #[test]
    fn ordered_queues_run_one_job() {
        let c = QueueConfiguration::new("o", QueueType::Ordered).with_max_parallel(8);
        assert_eq!(c.effective_max_parallel(), 1);
        assert_eq!(queue("p", &["a"]).with_max_parallel(4).effective_max_parallel(), 4);
        assert!(queue("p", &["a"]).with_max_parallel(-1).effective_max_parallel() >= 1);
    }

    #[test]
    fn queue_name_placeholder_is_expanded() {
        let c = queue("render-{0}", &["org/render/*"]);
        assert_eq!(c.match_topic("org/render/pdf").as_deref(), Some("render-pdf"));
        assert_eq!(c.match_topic("org/other/pdf"), None);
    }

    #[test]
    fn configuration_manager_honours_ranking_and_falls_back() {
        let low = queue("low", &["org/**"]);
        let high = queue("high", &["org/example/*"]).with_ranking(10);
        let invalid = QueueConfiguration::new("invalid", QueueType::Unordered);
        let manager = QueueConfigurationManager::new(
            QueueConfiguration::main_queue(),
            vec![low, high, invalid],
        );

        assert_eq!(manager.configurations().len(), 2);
        assert_eq!(manager.queue_info("org/example/render").queue_name, "high");
        assert_eq!(manager.queue_info("org/other/render").queue_name, "low");
        assert_eq!(manager.queue_info("com/elsewhere").queue_name, MAIN_QUEUE_NAME);
    }

    #[test]
    fn manager_config_from_json_uses_defaults() {
        let c = JobManagerConfig::from_json(r#"{"preload_limit": 3}"#).unwrap();
        assert_eq!(c.preload_limit, 3);
        assert_eq!(c.thread_pool_size, 35);
        assert_eq!(c.main_queue.name, MAIN_QUEUE_NAME);
        assert!(JobManagerConfig::from_json("{").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a limited retry budget of `max` allows exactly `max` retries.
        #[test]
        fn limited_retries_allow_exactly_max(max in 0u32..50, count in 0u32..100) {
            let limit = RetryLimit::Limited(max);
            prop_assert_eq!(limit.is_exceeded_by(count), count > max);
            prop_assert!(!RetryLimit::Unlimited.is_exceeded_by(count));
        }
    }
}
