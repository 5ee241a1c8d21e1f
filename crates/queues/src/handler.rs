//! In-flight wrapper around a single job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use jobflow_core::{Job, JobId, JobState};

use crate::storage::{JobStorage, StorageError};
use crate::sync::lock;

#[derive(Debug, Clone, Copy)]
struct Timestamps {
    queued: Instant,
    started: Option<Instant>,
}

/// One job plus its execution state while it is owned by a queue.
///
/// All persistence goes through the handler; a job whose record disappeared
/// concurrently is reported as `false` rather than as an error.
pub struct JobHandler {
    id: JobId,
    topic: String,
    job: Mutex<Job>,
    times: Mutex<Timestamps>,
    stopped: AtomicBool,
    storage: Arc<dyn JobStorage>,
}

impl JobHandler {
    pub fn new(job: Job, storage: Arc<dyn JobStorage>) -> Arc<Self> {
        Arc::new(Self {
            id: job.id,
            topic: job.topic.clone(),
            job: Mutex::new(job),
            times: Mutex::new(Timestamps {
                queued: Instant::now(),
                started: None,
            }),
            stopped: AtomicBool::new(false),
            storage,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Snapshot of the job.
    pub fn job(&self) -> Job {
        lock(&self.job).clone()
    }

    pub fn with_job<R>(&self, f: impl FnOnce(&Job) -> R) -> R {
        f(&lock(&self.job))
    }

    /// Mutate the in-memory job without persisting it.
    pub fn update_job<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        f(&mut lock(&self.job))
    }

    /// Write the current job state to storage.
    pub fn persist(&self) -> bool {
        let snapshot = self.job();
        self.report("persist", self.storage.update(&snapshot))
    }

    pub(crate) fn mark_queued(&self) {
        let mut times = lock(&self.times);
        times.queued = Instant::now();
        times.started = None;
    }

    pub(crate) fn mark_started(&self) {
        lock(&self.times).started = Some(Instant::now());
    }

    /// Time between admission and the start of the current attempt.
    pub fn queue_time(&self) -> Duration {
        let times = lock(&self.times);
        match times.started {
            Some(started) => started.saturating_duration_since(times.queued),
            None => times.queued.elapsed(),
        }
    }

    /// Time since the current attempt started.
    pub fn processing_time(&self) -> Option<Duration> {
        lock(&self.times).started.map(|s| s.elapsed())
    }

    /// Claim the job for `queue_name`.
    ///
    /// Returns `false` if the record was removed concurrently; the caller must
    /// discard the handler.
    pub fn start_processing(&self, queue_name: &str) -> bool {
        let snapshot = self.update_job(|job| {
            job.queue_name = Some(queue_name.to_string());
            job.processing_started = Some(Utc::now());
            job.clone()
        });
        self.report("start", self.storage.update(&snapshot))
    }

    /// Persist a final state, keeping the record only if `keep` is set.
    pub fn finished(&self, state: JobState, keep: bool, processing_time: Option<Duration>) {
        let snapshot = self.update_job(|job| {
            job.finished_state = Some(state);
            job.finished_at = Some(Utc::now());
            job.clone()
        });
        debug!(
            job_id = %self.id,
            topic = %self.topic,
            state = %state,
            processing_ms = processing_time.map(|d| d.as_millis() as u64),
            "job finished"
        );
        self.report("finish", self.storage.finish(&snapshot, state, keep));
    }

    /// Count a retry and release the job for another attempt.
    ///
    /// Returns `false` if the record was removed concurrently.
    pub fn reschedule(&self) -> bool {
        let snapshot = self.update_job(|job| {
            job.retry();
            job.clone()
        });
        self.report("reschedule", self.storage.update(&snapshot))
    }

    /// Raise the cooperative stop flag.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Finish the job without running it.
    pub fn cancel(&self) {
        self.finished(JobState::Dropped, true, None);
    }

    /// Hand the job back to storage for another owner.
    pub fn reassign(&self) {
        let snapshot = self.update_job(|job| {
            job.queue_name = None;
            job.processing_started = None;
            job.clone()
        });
        self.report("reassign", self.storage.reassign(&snapshot));
    }

    fn report(&self, operation: &'static str, result: Result<(), StorageError>) -> bool {
        match result {
            Ok(()) => true,
            Err(StorageError::NotFound(_)) => {
                debug!(job_id = %self.id, operation, "job record was removed concurrently");
                false
            }
            Err(e) => {
                warn!(job_id = %self.id, operation, error = %e, "job storage operation failed");
                false
            }
        }
    }
}

impl core::fmt::Debug for JobHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobHandler")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryJobStorage;

    fn setup() -> (Arc<InMemoryJobStorage>, Arc<JobHandler>) {
        let storage = InMemoryJobStorage::arc();
        let job = Job::new("org/example/render", serde_json::Map::new());
        storage.add(job.clone()).unwrap();
        let handler = JobHandler::new(job, storage.clone());
        (storage, handler)
    }

    #[test]
    fn start_processing_claims_the_record() {
        let (storage, handler) = setup();
        assert!(handler.start_processing("render"));

        let stored = storage.get(handler.id()).unwrap().unwrap();
        assert_eq!(stored.queue_name.as_deref(), Some("render"));
        assert!(stored.processing_started.is_some());
    }

    #[test]
    fn concurrent_removal_is_nothing_to_do() {
        let (storage, handler) = setup();
        storage.remove(&[handler.id()]).unwrap();

        assert!(!handler.start_processing("render"));
        assert!(!handler.reschedule());
        handler.finished(JobState::Succeeded, true, None);
        assert!(storage.get(handler.id()).unwrap().is_none());
    }

    #[test]
    fn reschedule_counts_and_clears_start() {
        let (storage, handler) = setup();
        handler.start_processing("render");

        assert!(handler.reschedule());
        assert!(handler.reschedule());

        let stored = storage.get(handler.id()).unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
        assert!(stored.processing_started.is_none());
    }

    #[test]
    fn cancel_keeps_a_dropped_record() {
        let (storage, handler) = setup();
        handler.cancel();
        let stored = storage.get(handler.id()).unwrap().unwrap();
        assert_eq!(stored.finished_state, Some(JobState::Dropped));
        assert_eq!(storage.pending_count(), 0);
    }

    #[test]
    fn stop_flag_is_sticky() {
        let (_, handler) = setup();
        assert!(!handler.is_stopped());
        handler.stop();
        assert!(handler.is_stopped());
    }

    #[test]
    fn reassign_hands_the_job_back() {
        let (storage, handler) = setup();
        handler.start_processing("render");
        handler.reassign();
        assert_eq!(storage.reassigned(), vec![handler.id()]);
        assert!(storage.get(handler.id()).unwrap().unwrap().processing_started.is_none());
    }
}
