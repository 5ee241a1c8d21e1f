//! The job: a topic, an id and a mutable property bag.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::RetryLimit;
use crate::error::{CoreError, CoreResult};
use crate::id::JobId;
use crate::state::JobState;

/// Progress information reported by a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Total number of steps announced by `init_progress`.
    pub steps: u32,
    /// Steps completed so far.
    pub step: u32,
    /// Estimated time of completion.
    pub eta: Option<DateTime<Utc>>,
}

/// A unit of work.
///
/// The well-known properties are typed fields; arbitrary user data lives in
/// `properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Routing key.
    pub topic: String,
    pub created: DateTime<Utc>,
    /// Queue currently owning the job (set when processing starts).
    #[serde(default)]
    pub queue_name: Option<String>,
    /// Number of retries performed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Job-level retry limit, overrides the queue configuration.
    #[serde(default)]
    pub retries: Option<RetryLimit>,
    /// Job-level retry delay, overrides the queue configuration.
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    /// Retry delay requested by the consumer for the next attempt.
    #[serde(default)]
    pub delay_override_ms: Option<u64>,
    #[serde(default)]
    pub processing_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<JobProgress>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub result_message: Option<String>,
    #[serde(default)]
    pub finished_state: Option<JobState>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Job {
    /// Create a new job for `topic`.
    pub fn new(topic: impl Into<String>, properties: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: JobId::new(),
            topic: topic.into(),
            created: Utc::now(),
            queue_name: None,
            retry_count: 0,
            retries: None,
            retry_delay_ms: None,
            delay_override_ms: None,
            processing_started: None,
            progress: None,
            log: Vec::new(),
            result_message: None,
            finished_state: None,
            finished_at: None,
            properties,
        }
    }

    /// Check a topic before a job is created for it.
    pub fn validate_topic(topic: &str) -> CoreResult<()> {
        if topic.is_empty() {
            return Err(CoreError::validation("job topic must not be empty"));
        }
        if topic.starts_with('/') || topic.ends_with('/') || topic.contains("//") {
            return Err(CoreError::validation(format!("malformed job topic: {topic}")));
        }
        if topic.contains('*') {
            return Err(CoreError::validation(format!("job topic must not contain wildcards: {topic}")));
        }
        Ok(())
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn with_retries(mut self, retries: RetryLimit) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Read a user property, converting it to `T`.
    pub fn property<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.properties
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Sort key used by ordered queues and the queue cache.
    pub fn ordering_key(&self) -> (DateTime<Utc>, JobId) {
        (self.created, self.id)
    }

    /// Effective retry limit for this job.
    pub fn retry_limit(&self, queue_default: RetryLimit) -> RetryLimit {
        self.retries.unwrap_or(queue_default)
    }

    /// Effective delay before the next retry.
    ///
    /// A consumer override wins over the job property, which wins over the
    /// queue configuration.
    pub fn retry_delay(&self, queue_default: Duration) -> Duration {
        self.delay_override_ms
            .or(self.retry_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(queue_default)
    }

    /// Record one more retry and reset per-attempt state.
    pub fn retry(&mut self) {
        self.retry_count += 1;
        self.processing_started = None;
        self.progress = None;
    }

    /// Announce the number of steps; only the first call has an effect.
    pub fn start_progress(&mut self, steps: u32, eta: Option<Duration>) -> bool {
        if self.progress.is_some() {
            return false;
        }
        self.progress = Some(JobProgress {
            steps,
            step: 0,
            eta: eta.and_then(|d| chrono::Duration::from_std(d).ok()).map(|d| Utc::now() + d),
        });
        true
    }

    /// Advance the progress counter; ignored until progress was initialized.
    pub fn increment_progress(&mut self, steps: u32) -> bool {
        match self.progress.as_mut() {
            Some(p) => {
                p.step = p.step.saturating_add(steps).min(p.steps);
                true
            }
            None => false,
        }
    }

    /// Update the ETA; ignored until progress was initialized.
    pub fn update_eta(&mut self, eta: Duration) -> bool {
        match self.progress.as_mut() {
            Some(p) => {
                p.eta = chrono::Duration::from_std(eta).ok().map(|d| Utc::now() + d);
                true
            }
            None => false,
        }
    }

    /// Append a line to the job log.
    pub fn add_log(&mut self, message: impl AsRef<str>) {
        self.log
            .push(format!("{} {}", Utc::now().to_rfc3339(), message.as_ref()));
    }
}

impl core::fmt::Display for Job {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Job(topic={}, id={})", self.topic, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("org/example/render", serde_json::Map::new())
    }

    #[test]
    fn retry_delay_prefers_override_then_job_then_queue() {
        let queue_default = Duration::from_millis(2000);
        let mut j = job();
        assert_eq!(j.retry_delay(queue_default), queue_default);

        j = j.with_retry_delay(Duration::from_millis(300));
        assert_eq!(j.retry_delay(queue_default), Duration::from_millis(300));

        j.delay_override_ms = Some(10);
        assert_eq!(j.retry_delay(queue_default), Duration::from_millis(10));
    }

    #[test]
    fn retry_clears_per_attempt_state() {
        let mut j = job();
        j.processing_started = Some(Utc::now());
        j.start_progress(4, None);

        j.retry();

        assert_eq!(j.retry_count, 1);
        assert!(j.processing_started.is_none());
        assert!(j.progress.is_none());
    }

    #[test]
    fn progress_requires_init_and_is_capped() {
        let mut j = job();
        assert!(!j.increment_progress(1));
        assert!(!j.update_eta(Duration::from_secs(5)));

        assert!(j.start_progress(3, Some(Duration::from_secs(60))));
        assert!(!j.start_progress(10, None), "second init is ignored");

        j.increment_progress(2);
        j.increment_progress(5);
        let p = j.progress.as_ref().unwrap();
        assert_eq!((p.step, p.steps), (3, 3));
        assert!(p.eta.is_some());
    }

    #[test]
    fn typed_property_access() {
        let j = job().with_property("size", serde_json::json!(42));
        assert_eq!(j.property::<u32>("size"), Some(42));
        assert_eq!(j.property::<String>("size"), None);
        assert_eq!(j.property::<u32>("missing"), None);
    }

    #[test]
    fn topic_validation() {
        assert!(Job::validate_topic("org/example/render").is_ok());
        for bad in ["", "/a", "a/", "a//b", "a/*"] {
            assert!(Job::validate_topic(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
