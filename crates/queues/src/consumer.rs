//! Consumer registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use jobflow_core::{CoreError, Job, JobId, TopicMatcher};

use crate::context::{JobExecutionContext, JobExecutionResult};
use crate::sync::{lock, read, write};

/// What a consumer reports back from [`JobExecutor::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The attempt is over.
    Done(JobExecutionResult),
    /// The consumer finishes later through
    /// [`JobExecutionContext::async_processing_finished`].
    Async,
}

impl From<JobExecutionResult> for Completion {
    fn from(value: JobExecutionResult) -> Self {
        Completion::Done(value)
    }
}

/// Performs the actual work for a topic.
///
/// An `Err` (or a panic) is treated like a cancellation that is never retried.
pub trait JobExecutor: Send + Sync {
    fn process(&self, job: &Job, context: &JobExecutionContext) -> anyhow::Result<Completion>;
}

/// Adapter turning a closure into a [`JobExecutor`].
pub struct FnConsumer<F>(F);

impl<F> FnConsumer<F>
where
    F: Fn(&Job, &JobExecutionContext) -> anyhow::Result<Completion> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }

    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self(f))
    }
}

impl<F> JobExecutor for FnConsumer<F>
where
    F: Fn(&Job, &JobExecutionContext) -> anyhow::Result<Completion> + Send + Sync,
{
    fn process(&self, job: &Job, context: &JobExecutionContext) -> anyhow::Result<Completion> {
        (self.0)(job, context)
    }
}

struct Registration {
    matcher: TopicMatcher,
    executor: Arc<dyn JobExecutor>,
}

/// Maps topics to consumers and tracks asynchronously running jobs.
#[derive(Default)]
pub struct JobConsumerManager {
    consumers: RwLock<Vec<Registration>>,
    listeners: Mutex<HashMap<JobId, JobExecutionContext>>,
}

impl JobConsumerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer for a topic pattern, replacing an earlier
    /// registration of the same pattern.
    pub fn register(&self, pattern: &str, executor: Arc<dyn JobExecutor>) -> Result<(), CoreError> {
        let matcher: TopicMatcher = pattern.parse()?;
        let mut consumers = write(&self.consumers);
        consumers.retain(|r| r.matcher != matcher);
        debug!(pattern = %matcher, "registered job consumer");
        consumers.push(Registration { matcher, executor });
        Ok(())
    }

    pub fn unregister(&self, pattern: &str) -> bool {
        let Ok(matcher) = pattern.parse::<TopicMatcher>() else {
            return false;
        };
        let mut consumers = write(&self.consumers);
        let before = consumers.len();
        consumers.retain(|r| r.matcher != matcher);
        consumers.len() != before
    }

    /// The consumer for `topic`: an exact registration wins, then the most
    /// specific pattern.
    pub fn executor(&self, topic: &str) -> Option<Arc<dyn JobExecutor>> {
        read(&self.consumers)
            .iter()
            .filter(|r| r.matcher.matches(topic))
            .max_by_key(|r| r.matcher.specificity())
            .map(|r| Arc::clone(&r.executor))
    }

    pub fn register_listener(&self, job_id: JobId, context: JobExecutionContext) {
        lock(&self.listeners).insert(job_id, context);
    }

    pub fn unregister_listener(&self, job_id: JobId) -> Option<JobExecutionContext> {
        lock(&self.listeners).remove(&job_id)
    }

    /// Context of a job that is being processed asynchronously.
    pub fn listener(&self, job_id: JobId) -> Option<JobExecutionContext> {
        lock(&self.listeners).get(&job_id).cloned()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl core::fmt::Debug for JobConsumerManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let patterns: Vec<String> = read(&self.consumers).iter().map(|r| r.matcher.pattern()).collect();
        f.debug_struct("JobConsumerManager")
            .field("patterns", &patterns)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer(tag: &'static str) -> Arc<dyn JobExecutor> {
        FnConsumer::arc(move |_job, ctx| Ok(ctx.result().message(tag).succeeded().into()))
    }

    fn tag_of(manager: &JobConsumerManager, topic: &str) -> Option<String> {
        let executor = manager.executor(topic)?;
        let ctx = JobExecutionContext::detached(Job::new(topic, serde_json::Map::new()));
        match executor.process(&Job::new(topic, serde_json::Map::new()), &ctx).unwrap() {
            Completion::Done(result) => result.message,
            Completion::Async => None,
        }
    }

    #[test]
    fn exact_match_wins_over_patterns() {
        let manager = JobConsumerManager::new();
        manager.register("*", consumer("any")).unwrap();
        manager.register("org/**", consumer("subtree")).unwrap();
        manager.register("org/example/*", consumer("one-level")).unwrap();
        manager.register("org/example/render", consumer("exact")).unwrap();

        assert_eq!(tag_of(&manager, "org/example/render").as_deref(), Some("exact"));
        assert_eq!(tag_of(&manager, "org/example/pdf").as_deref(), Some("one-level"));
        assert_eq!(tag_of(&manager, "org/other/a/b").as_deref(), Some("subtree"));
        assert_eq!(tag_of(&manager, "com/x").as_deref(), Some("any"));
    }

    #[test]
    fn unregistered_topics_have_no_executor() {
        let manager = JobConsumerManager::new();
        manager.register("org/example/*", consumer("x")).unwrap();
        assert!(manager.executor("org/example/a/b").is_none());

        assert!(manager.unregister("org/example/*"));
        assert!(!manager.unregister("org/example/*"));
        assert!(manager.executor("org/example/a").is_none());
        assert!(manager.register("org//bad", consumer("x")).is_err());
    }

    #[test]
    fn listeners_are_tracked_by_job_id() {
        let manager = JobConsumerManager::new();
        let job = Job::new("a", serde_json::Map::new());
        let id = job.id;
        manager.register_listener(id, JobExecutionContext::detached(job));

        assert!(manager.listener(id).is_some());
        assert_eq!(manager.listener_count(), 1);
        assert!(manager.unregister_listener(id).is_some());
        assert!(manager.listener(id).is_none());
    }
}
