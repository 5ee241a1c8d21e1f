//! Execution context handed to consumers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use jobflow_core::{InternalJobState, Job, JobId};

use crate::handler::JobHandler;
use crate::queue::JobQueue;
use crate::runner;
use crate::storage::InMemoryJobStorage;
use crate::sync::lock;

/// Result of one execution attempt as reported by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobExecutionResult {
    pub state: InternalJobState,
    pub message: Option<String>,
    /// Delay before the next attempt; only meaningful for failures.
    pub retry_delay: Option<Duration>,
}

impl JobExecutionResult {
    pub fn succeeded() -> Self {
        ResultBuilder::default().succeeded()
    }

    pub fn failed() -> Self {
        ResultBuilder::default().failed()
    }

    pub fn cancelled() -> Self {
        ResultBuilder::default().cancelled()
    }
}

/// Builder returned by [`JobExecutionContext::result`].
#[derive(Debug, Clone, Default)]
pub struct ResultBuilder {
    message: Option<String>,
}

impl ResultBuilder {
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn succeeded(self) -> JobExecutionResult {
        self.build(InternalJobState::Succeeded, None)
    }

    pub fn failed(self) -> JobExecutionResult {
        self.build(InternalJobState::Failed, None)
    }

    /// Fail and retry after `retry_delay` instead of the configured delay.
    pub fn failed_with_delay(self, retry_delay: Duration) -> JobExecutionResult {
        self.build(InternalJobState::Failed, Some(retry_delay))
    }

    pub fn cancelled(self) -> JobExecutionResult {
        self.build(InternalJobState::Cancelled, None)
    }

    fn build(self, state: InternalJobState, retry_delay: Option<Duration>) -> JobExecutionResult {
        JobExecutionResult {
            state,
            message: self.message,
            retry_delay,
        }
    }
}

/// Misuse of [`JobExecutionContext::async_processing_finished`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("job {0} is not processed asynchronously")]
    NotAsync(JobId),
    #[error("job {0} has already been finished")]
    AlreadyFinished(JobId),
}

const PROCESSING: u8 = 0;
const ASYNC: u8 = 1;
/// Finished from another thread before the runner registered the job as async.
const EARLY: u8 = 2;
const FINISHED_SYNC: u8 = 3;
const FINISHED_ASYNC: u8 = 4;

struct ContextInner {
    handler: Arc<JobHandler>,
    queue: Weak<JobQueue>,
    state: AtomicU8,
    early: Mutex<Option<JobExecutionResult>>,
}

/// Per-attempt view of a job for its consumer.
///
/// Progress and log calls persist immediately. The context can be cloned and
/// moved to another thread to finish an asynchronous job.
#[derive(Clone)]
pub struct JobExecutionContext {
    inner: Arc<ContextInner>,
}

impl JobExecutionContext {
    pub(crate) fn new(handler: Arc<JobHandler>, queue: Weak<JobQueue>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                handler,
                queue,
                state: AtomicU8::new(PROCESSING),
                early: Mutex::new(None),
            }),
        }
    }

    /// A context that is not attached to any queue, backed by its own
    /// in-memory record. Useful to unit test consumers.
    pub fn detached(job: Job) -> Self {
        let storage = InMemoryJobStorage::arc();
        if let Err(e) = crate::storage::JobStorage::add(&storage, job.clone()) {
            warn!(error = %e, "unable to store detached job");
        }
        Self::new(JobHandler::new(job, storage), Weak::new())
    }

    pub fn job_id(&self) -> JobId {
        self.inner.handler.id()
    }

    /// Current state of the job, including progress and log.
    pub fn job(&self) -> Job {
        self.inner.handler.job()
    }

    /// Announce the number of steps; only the first call has an effect.
    pub fn init_progress(&self, steps: u32, eta: Option<Duration>) {
        let handler = &self.inner.handler;
        if handler.update_job(|job| job.start_progress(steps, eta)) {
            handler.persist();
        }
    }

    /// Advance the progress; ignored until `init_progress` was called.
    pub fn increment_progress_count(&self, steps: u32) {
        let handler = &self.inner.handler;
        if handler.update_job(|job| job.increment_progress(steps)) {
            handler.persist();
        }
    }

    /// Update the ETA; ignored until `init_progress` was called.
    pub fn update_progress(&self, eta: Duration) {
        let handler = &self.inner.handler;
        if handler.update_job(|job| job.update_eta(eta)) {
            handler.persist();
        }
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let handler = &self.inner.handler;
        debug!(job_id = %handler.id(), message = message.as_ref(), "job log");
        handler.update_job(|job| job.add_log(message));
        handler.persist();
    }

    /// Whether the job was asked to stop. Consumers poll this at safe points.
    pub fn is_stopped(&self) -> bool {
        self.inner.handler.is_stopped()
    }

    pub fn result(&self) -> ResultBuilder {
        ResultBuilder::default()
    }

    /// Finish a job whose consumer returned [`Completion::Async`](crate::consumer::Completion::Async).
    pub fn async_processing_finished(&self, result: JobExecutionResult) -> Result<(), ContextError> {
        let id = self.job_id();
        loop {
            match self.inner.state.load(Ordering::SeqCst) {
                ASYNC => {
                    if self
                        .inner
                        .state
                        .compare_exchange(ASYNC, FINISHED_ASYNC, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        self.complete_async(result);
                        return Ok(());
                    }
                }
                PROCESSING => {
                    let mut early = lock(&self.inner.early);
                    if self
                        .inner
                        .state
                        .compare_exchange(PROCESSING, EARLY, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        *early = Some(result);
                        return Ok(());
                    }
                }
                FINISHED_SYNC => return Err(ContextError::NotAsync(id)),
                _ => return Err(ContextError::AlreadyFinished(id)),
            }
        }
    }

    /// Mark the attempt as finished synchronously.
    ///
    /// Returns `false` if the consumer already finished it through
    /// `async_processing_finished`; that result is discarded.
    pub(crate) fn finish_sync(&self) -> bool {
        match self.inner.state.swap(FINISHED_SYNC, Ordering::SeqCst) {
            EARLY => {
                warn!(job_id = %self.job_id(), "consumer returned a result after finishing asynchronously; using the returned result");
                lock(&self.inner.early).take();
                true
            }
            PROCESSING => true,
            _ => false,
        }
    }

    /// Switch to asynchronous processing.
    ///
    /// Returns a result the consumer already reported from another thread.
    pub(crate) fn mark_async(&self) -> Option<JobExecutionResult> {
        match self
            .inner
            .state
            .compare_exchange(PROCESSING, ASYNC, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => None,
            Err(_) => {
                let early = lock(&self.inner.early).take();
                self.inner.state.store(FINISHED_ASYNC, Ordering::SeqCst);
                early
            }
        }
    }

    fn complete_async(&self, result: JobExecutionResult) {
        match self.inner.queue.upgrade() {
            Some(queue) => runner::finish_async(&queue, &self.inner.handler, result),
            None => warn!(job_id = %self.job_id(), "queue is gone; discarding asynchronous result"),
        }
    }
}

impl core::fmt::Debug for JobExecutionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobExecutionContext")
            .field("job_id", &self.job_id())
            .field("state", &self.inner.state.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> JobExecutionContext {
        JobExecutionContext::detached(Job::new("org/example/render", serde_json::Map::new()))
    }

    #[test]
    fn builder_carries_message_and_delay() {
        let ctx = context();
        let r = ctx.result().message("try later").failed_with_delay(Duration::from_millis(50));
        assert_eq!(r.state, InternalJobState::Failed);
        assert_eq!(r.message.as_deref(), Some("try later"));
        assert_eq!(r.retry_delay, Some(Duration::from_millis(50)));
        assert_eq!(JobExecutionResult::succeeded().retry_delay, None);
    }

    #[test]
    fn progress_is_persisted_after_init_only() {
        let ctx = context();
        ctx.increment_progress_count(1);
        assert!(ctx.job().progress.is_none());

        ctx.init_progress(4, None);
        ctx.init_progress(9, None);
        ctx.increment_progress_count(3);
        ctx.update_progress(Duration::from_secs(10));

        let p = ctx.job().progress.unwrap();
        assert_eq!((p.step, p.steps), (3, 4));
        assert!(p.eta.is_some());
    }

    #[test]
    fn log_lines_are_appended() {
        let ctx = context();
        ctx.log("first");
        ctx.log("second");
        let log = ctx.job().log;
        assert_eq!(log.len(), 2);
        assert!(log[1].ends_with("second"));
    }

    #[test]
    fn sync_completion_rejects_async_finish() {
        let ctx = context();
        assert!(ctx.finish_sync());
        assert_eq!(
            ctx.async_processing_finished(JobExecutionResult::succeeded()),
            Err(ContextError::NotAsync(ctx.job_id()))
        );
    }

    #[test]
    fn early_async_finish_is_handed_to_the_runner() {
        let ctx = context();
        let other = ctx.clone();
        std::thread::spawn(move || other.async_processing_finished(JobExecutionResult::failed()))
            .join()
            .unwrap()
            .unwrap();

        let early = ctx.mark_async().unwrap();
        assert_eq!(early.state, InternalJobState::Failed);
        assert_eq!(
            ctx.async_processing_finished(JobExecutionResult::succeeded()),
            Err(ContextError::AlreadyFinished(ctx.job_id()))
        );
    }

    #[test]
    fn async_finish_happens_once() {
        let ctx = context();
        assert!(ctx.mark_async().is_none());
        assert!(ctx.async_processing_finished(JobExecutionResult::succeeded()).is_ok());
        assert_eq!(
            ctx.async_processing_finished(JobExecutionResult::succeeded()),
            Err(ContextError::AlreadyFinished(ctx.job_id()))
        );
    }
}
