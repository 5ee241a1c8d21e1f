//! The job queue engine.
//!
//! A queue owns a loop thread that takes jobs (from its pending set first, then
//! from its [`QueueJobCache`]) and hands them to its strategy, which decides
//! when a job may start and what happens to a retried job.
//!
//! Locking: the bookkeeping maps are guarded by separate mutexes. Never hold two
//! of them at once, and never hold one across a storage, strategy or notifier
//! call.

mod ordered;
mod parallel;

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use jobflow_core::{InternalJobState, JobId, JobState, QueueConfiguration, QueueInfo, QueueType};
use jobflow_events::{JobNotification, NotificationTopic};

use crate::cache::QueueJobCache;
use crate::handler::JobHandler;
use crate::pool::{PoolError, Task, ThreadPool};
use crate::runner::{self, panic_message};
use crate::services::QueueServices;
use crate::sync::{lock, read, wait_timeout, write};

use ordered::OrderedQueue;
use parallel::ParallelQueue;

/// How long the loop waits for a signal before looking at the cache again.
const IDLE_WAIT: Duration = Duration::from_millis(500);

static OUTDATED_QUEUES: AtomicU64 = AtomicU64::new(0);

enum QueueStrategy {
    Ordered(OrderedQueue),
    Parallel(ParallelQueue),
}

impl QueueStrategy {
    fn new(configuration: &QueueConfiguration) -> Self {
        match configuration.queue_type {
            QueueType::Ordered => QueueStrategy::Ordered(OrderedQueue::new()),
            _ => QueueStrategy::Parallel(ParallelQueue::new(configuration.effective_max_parallel())),
        }
    }

    fn put(&self, handler: Arc<JobHandler>) {
        match self {
            QueueStrategy::Ordered(q) => q.put(handler),
            QueueStrategy::Parallel(q) => q.put(handler),
        }
    }

    fn pop_pending(&self) -> Option<Arc<JobHandler>> {
        match self {
            QueueStrategy::Ordered(q) => q.pop_pending(),
            QueueStrategy::Parallel(q) => q.pop_pending(),
        }
    }

    fn drain(&self) -> Vec<Arc<JobHandler>> {
        match self {
            QueueStrategy::Ordered(q) => q.drain(),
            QueueStrategy::Parallel(q) => q.drain(),
        }
    }

    fn start(&self, queue: &Arc<JobQueue>, handler: Arc<JobHandler>) {
        match self {
            QueueStrategy::Ordered(q) => q.start(queue, handler),
            QueueStrategy::Parallel(q) => q.start(queue, handler),
        }
    }

    fn notify_finished(&self, queue: &Arc<JobQueue>, reprocess: Option<Arc<JobHandler>>) {
        match self {
            QueueStrategy::Ordered(q) => q.notify_finished(queue, reprocess),
            QueueStrategy::Parallel(q) => q.notify_finished(queue, reprocess),
        }
    }

    fn is_idle(&self) -> bool {
        match self {
            QueueStrategy::Ordered(q) => q.is_idle(),
            QueueStrategy::Parallel(q) => q.is_idle(),
        }
    }

    fn pending_len(&self) -> usize {
        match self {
            QueueStrategy::Ordered(q) => q.pending_len(),
            QueueStrategy::Parallel(q) => q.pending_len(),
        }
    }

    fn close(&self) {
        match self {
            QueueStrategy::Ordered(q) => q.close(),
            QueueStrategy::Parallel(q) => q.close(),
        }
    }

    fn state_info(&self) -> String {
        match self {
            QueueStrategy::Ordered(q) => q.state_info(),
            QueueStrategy::Parallel(q) => q.state_info(),
        }
    }
}

enum Disposition {
    Finish {
        state: JobState,
        keep: bool,
        internal: InternalJobState,
    },
    Retry,
}

/// A named queue processing the jobs of its topics.
pub struct JobQueue {
    name: RwLock<String>,
    configuration: QueueConfiguration,
    services: QueueServices,
    cache: QueueJobCache,
    strategy: QueueStrategy,

    running: AtomicBool,
    outdated: AtomicBool,
    async_counter: AtomicUsize,
    wait_counter: AtomicUsize,
    close_marker: AtomicBool,
    waiting_for_next: AtomicBool,
    full_cache_search: AtomicBool,

    signal: Mutex<bool>,
    wake: Condvar,
    suspended_since: Mutex<Option<Instant>>,
    suspend_cv: Condvar,

    started_jobs: Mutex<HashMap<JobId, Arc<JobHandler>>>,
    processing_jobs: Mutex<HashMap<JobId, Arc<JobHandler>>>,
    owned: Mutex<HashSet<JobId>>,

    own_pool: Option<ThreadPool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Create a queue for `info`; call [`JobQueue::start`] to run it.
    pub fn new(info: QueueInfo, services: QueueServices, topics: Vec<String>) -> Result<Arc<Self>, PoolError> {
        let QueueInfo {
            queue_name,
            configuration,
        } = info;
        let own_pool = match configuration.own_thread_pool_size {
            0 => None,
            size => Some(ThreadPool::new(format!("jobflow-{queue_name}"), size)?),
        };
        let cache = QueueJobCache::new(
            queue_name.clone(),
            configuration.queue_type,
            services.config.preload_limit,
            Arc::clone(&services.storage),
            topics,
        );
        Ok(Arc::new(Self {
            name: RwLock::new(queue_name),
            strategy: QueueStrategy::new(&configuration),
            configuration,
            services,
            cache,
            running: AtomicBool::new(true),
            outdated: AtomicBool::new(false),
            async_counter: AtomicUsize::new(0),
            wait_counter: AtomicUsize::new(0),
            close_marker: AtomicBool::new(false),
            waiting_for_next: AtomicBool::new(false),
            full_cache_search: AtomicBool::new(false),
            signal: Mutex::new(false),
            wake: Condvar::new(),
            suspended_since: Mutex::new(None),
            suspend_cv: Condvar::new(),
            started_jobs: Mutex::new(HashMap::new()),
            processing_jobs: Mutex::new(HashMap::new()),
            owned: Mutex::new(HashSet::new()),
            own_pool,
            thread: Mutex::new(None),
        }))
    }

    /// Spawn the loop thread.
    pub fn start(self: &Arc<Self>) -> Result<(), PoolError> {
        let queue = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("jobflow-queue-{}", self.name()))
            .spawn(move || queue.run())?;
        *lock(&self.thread) = Some(handle);
        info!(
            queue = %self.name(),
            queue_type = ?self.configuration.queue_type,
            max_parallel = self.configuration.effective_max_parallel(),
            "started job queue"
        );
        Ok(())
    }

    pub fn name(&self) -> String {
        read(&self.name).clone()
    }

    pub fn configuration(&self) -> &QueueConfiguration {
        &self.configuration
    }

    pub fn services(&self) -> &QueueServices {
        &self.services
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_outdated(&self) -> bool {
        self.outdated.load(Ordering::SeqCst)
    }

    /// Jobs that returned asynchronously and have not finished yet.
    pub fn async_jobs(&self) -> usize {
        self.async_counter.load(Ordering::SeqCst)
    }

    pub(crate) fn async_started(&self) {
        self.async_counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Retries waiting in the scheduler.
    pub fn waiting_jobs(&self) -> usize {
        self.wait_counter.load(Ordering::SeqCst)
    }

    pub(crate) fn wait_started(&self) {
        self.wait_counter.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn wait_finished(&self) {
        decrement(&self.wait_counter);
    }

    /// Instant an ordered queue sleeps until before retrying its current job.
    pub fn sleeping_until(&self) -> Option<Instant> {
        match &self.strategy {
            QueueStrategy::Ordered(q) => q.sleeping_until(),
            QueueStrategy::Parallel(_) => None,
        }
    }

    /// Jobs owned by this queue: pending, running or waiting for a retry.
    pub fn owned_jobs(&self) -> usize {
        lock(&self.owned).len()
    }

    fn run(self: Arc<Self>) {
        while self.is_running() {
            match catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
                Ok(()) => break,
                Err(panic) => error!(
                    queue = %self.name(),
                    panic = %panic_message(panic.as_ref()),
                    "queue loop panicked; restarting"
                ),
            }
        }
        debug!(queue = %self.name(), "queue loop stopped");
    }

    fn run_loop(self: &Arc<Self>) {
        while let Some(handler) = self.take() {
            self.check_suspended();
            if !self.is_running() {
                break;
            }
            self.strategy.start(self, handler);
        }
    }

    /// Block until a job is available; `None` once the queue is closed.
    fn take(&self) -> Option<Arc<JobHandler>> {
        while self.is_running() {
            if let Some(handler) = self.strategy.pop_pending() {
                self.waiting_for_next.store(false, Ordering::SeqCst);
                return Some(handler);
            }
            if !self.is_outdated() {
                let full_scan = self.full_cache_search.swap(false, Ordering::SeqCst);
                let is_owned = |id: &JobId| self.is_owned(id);
                if let Some(handler) = self.cache.get_next_job(&is_owned, full_scan) {
                    if self.admit(&handler) {
                        self.waiting_for_next.store(false, Ordering::SeqCst);
                        return Some(handler);
                    }
                    continue;
                }
            }

            self.waiting_for_next.store(true, Ordering::SeqCst);
            let mut signalled = lock(&self.signal);
            if !*signalled && self.is_running() {
                signalled = wait_timeout(&self.wake, signalled, IDLE_WAIT);
            }
            *signalled = false;
        }
        None
    }

    fn admit(&self, handler: &Arc<JobHandler>) -> bool {
        if !lock(&self.owned).insert(handler.id()) {
            return false;
        }
        handler.mark_queued();
        self.services.statistics.job_queued(&self.name());
        self.close_marker.store(false, Ordering::SeqCst);
        true
    }

    fn is_owned(&self, id: &JobId) -> bool {
        lock(&self.owned).contains(id)
    }

    fn release(&self, id: JobId) {
        lock(&self.owned).remove(&id);
    }

    /// Wake the loop.
    pub(crate) fn signal(&self) {
        *lock(&self.signal) = true;
        self.wake.notify_all();
    }

    /// Block while suspended, resuming on our own after the maximum suspend time.
    fn check_suspended(&self) {
        let max = self.services.config.max_suspend();
        let mut since = lock(&self.suspended_since);
        while let Some(start) = *since {
            if !self.is_running() {
                return;
            }
            let elapsed = start.elapsed();
            if elapsed >= max {
                info!(queue = %self.name(), "maximum suspend time reached; resuming");
                *since = None;
                break;
            }
            since = wait_timeout(&self.suspend_cv, since, (max - elapsed).min(IDLE_WAIT));
        }
    }

    /// Claim the job and submit it to the pool.
    ///
    /// Returns `false` if the job could not be started; it is no longer owned
    /// by this queue then.
    pub(crate) fn execute_job(self: &Arc<Self>, handler: &Arc<JobHandler>) -> bool {
        let name = self.name();
        let Some(consumer) = self.services.consumers.executor(handler.topic()) else {
            debug!(queue = %name, topic = %handler.topic(), job_id = %handler.id(), "no consumer for topic; handing job back");
            handler.reassign();
            self.release(handler.id());
            self.services.statistics.job_dequeued(&name);
            return false;
        };
        if !handler.start_processing(&name) {
            self.release(handler.id());
            self.services.statistics.job_dequeued(&name);
            return false;
        }

        handler.mark_started();
        lock(&self.started_jobs).insert(handler.id(), Arc::clone(handler));

        let queue = Arc::clone(self);
        let job = Arc::clone(handler);
        let task: Task = Box::new(move || runner::run(queue, job, consumer));
        let pool = match &self.own_pool {
            Some(pool) => pool,
            None => self.services.thread_pool.as_ref(),
        };
        let Err(rejected) = pool.execute(task) else {
            return true;
        };

        warn!(queue = %name, pool = %pool.name(), job_id = %handler.id(), "thread pool rejected job; using a dedicated thread");
        let spawned = thread::Builder::new()
            .name(format!("jobflow-job-{}", handler.id()))
            .spawn(rejected.into_task());
        if let Err(e) = spawned {
            error!(queue = %name, job_id = %handler.id(), error = %e, "unable to run job; returning it to the cache");
            lock(&self.started_jobs).remove(&handler.id());
            self.release(handler.id());
            self.services.statistics.job_dequeued(&name);
            if handler.reschedule() {
                self.cache.reschedule(Arc::clone(handler));
            }
            return false;
        }
        true
    }

    /// The consumer received the job.
    ///
    /// Returns `false` if the job is not waiting for an acknowledgement (it was
    /// taken back by the acknowledgement sweep or the queue was closed).
    pub fn send_acknowledge(&self, id: JobId) -> bool {
        let Some(handler) = lock(&self.started_jobs).remove(&id) else {
            return false;
        };
        let queue_time = handler.queue_time();
        lock(&self.processing_jobs).insert(id, Arc::clone(&handler));
        let name = self.name();
        self.services
            .statistics
            .job_started(&name, handler.topic(), queue_time);
        self.notify(NotificationTopic::Started, &handler, Some(queue_time));
        true
    }

    /// Record the result of an attempt.
    ///
    /// `JobState::Queued` requests a retry, which becomes `GivenUp` once the
    /// retry limit is exceeded. Returns `false` if the job is unknown to the
    /// queue (already finished) or the queue is closed.
    pub fn finished_job(self: &Arc<Self>, id: JobId, state: JobState, is_async: bool) -> bool {
        if is_async {
            decrement(&self.async_counter);
        }
        let started = lock(&self.started_jobs).remove(&id);
        let processing = lock(&self.processing_jobs).remove(&id);
        if !self.is_running() {
            warn!(queue = %self.name(), job_id = %id, state = %state, "queue is closed; discarding job result");
            return false;
        }
        let Some(handler) = processing.or(started) else {
            debug!(queue = %self.name(), job_id = %id, "job is not processed by this queue");
            return false;
        };

        let name = self.name();
        let processing_time = handler.processing_time().unwrap_or_default();
        let disposition = match state {
            JobState::Succeeded => Disposition::Finish {
                state,
                keep: self.configuration.keep_jobs,
                internal: InternalJobState::Succeeded,
            },
            JobState::Queued => {
                let exceeded = handler.with_job(|job| {
                    job.retry_limit(self.configuration.retries)
                        .is_exceeded_by(job.retry_count + 1)
                });
                if exceeded {
                    Disposition::Finish {
                        state: JobState::GivenUp,
                        keep: true,
                        internal: InternalJobState::Cancelled,
                    }
                } else {
                    Disposition::Retry
                }
            }
            other => Disposition::Finish {
                state: other,
                keep: true,
                internal: InternalJobState::Cancelled,
            },
        };

        match disposition {
            Disposition::Finish { state, keep, internal } => {
                handler.finished(state, keep, Some(processing_time));
                self.services
                    .statistics
                    .job_ended(&name, handler.topic(), internal, processing_time);
                self.notify(NotificationTopic::from(internal), &handler, Some(processing_time));
                self.release(id);
                self.check_for_notify(None);
            }
            Disposition::Retry => {
                self.services
                    .statistics
                    .job_ended(&name, handler.topic(), InternalJobState::Failed, processing_time);
                self.notify(NotificationTopic::Failed, &handler, Some(processing_time));
                if handler.reschedule() {
                    debug!(queue = %name, job_id = %id, "job failed; retrying");
                    handler.mark_queued();
                    self.services.statistics.job_queued(&name);
                    self.check_for_notify(Some(handler));
                } else {
                    self.release(id);
                    self.check_for_notify(None);
                }
            }
        }
        true
    }

    fn check_for_notify(self: &Arc<Self>, reprocess: Option<Arc<JobHandler>>) {
        self.strategy.notify_finished(self, reprocess);
    }

    /// Give a delayed retry back to the queue.
    pub(crate) fn requeue(&self, handler: Arc<JobHandler>) {
        if !self.is_running() {
            return;
        }
        self.strategy.put(handler);
        self.signal();
    }

    /// Hand a job to the queue directly, bypassing the cache.
    ///
    /// Returns `false` if the queue is closed or already owns the job.
    pub fn process(&self, handler: Arc<JobHandler>) -> bool {
        if !self.is_running() {
            return false;
        }
        self.close_marker.store(false, Ordering::SeqCst);
        if !lock(&self.owned).insert(handler.id()) {
            return false;
        }
        handler.mark_queued();
        self.services.statistics.job_queued(&self.name());
        self.strategy.put(handler);
        self.signal();
        true
    }

    /// New jobs arrived for `topics`, or for any topic when `None`.
    pub fn wake_up(&self, topics: Option<&[String]>) {
        match topics {
            Some(topics) => self.cache.handle_new_topics(topics.iter().cloned()),
            None => self.full_cache_search.store(true, Ordering::SeqCst),
        }
        self.close_marker.store(false, Ordering::SeqCst);
        self.signal();
    }

    pub fn suspend(&self) {
        let mut since = lock(&self.suspended_since);
        if since.is_none() {
            *since = Some(Instant::now());
            info!(queue = %self.name(), "suspended job queue");
        }
    }

    pub fn resume(&self) {
        let was_suspended = lock(&self.suspended_since).take().is_some();
        if was_suspended {
            self.suspend_cv.notify_all();
            info!(queue = %self.name(), "resumed job queue");
        }
    }

    pub fn is_suspended(&self) -> bool {
        lock(&self.suspended_since).is_some()
    }

    /// Cancel every job that has not started yet.
    ///
    /// Cancellation runs on a background thread; returns the number of jobs
    /// taken from the queue.
    pub fn remove_all(&self) -> usize {
        let was_suspended = self.is_suspended();
        if !was_suspended {
            self.suspend();
        }
        let name = self.name();

        let admitted = self.strategy.drain();
        for _ in &admitted {
            self.services.statistics.job_dequeued(&name);
        }
        let mut removed = admitted;
        removed.extend(self.cache.drain());
        {
            let mut owned = lock(&self.owned);
            for handler in &removed {
                owned.remove(&handler.id());
            }
        }

        let count = removed.len();
        if count > 0 {
            info!(queue = %name, jobs = count, "removing all pending jobs");
            let services = self.services.clone();
            let queue_name = name.clone();
            let spawned = thread::Builder::new()
                .name(format!("jobflow-remove-{name}"))
                .spawn(move || cancel_jobs(&services, &queue_name, removed));
            if let Err(e) = spawned {
                error!(queue = %name, error = %e, "unable to start job removal");
            }
        }

        if !was_suspended {
            self.resume();
        }
        count
    }

    /// Rename the queue out of the way and stop reading from the cache.
    ///
    /// Jobs in flight are finished normally.
    pub fn outdate(&self) {
        if self.outdated.swap(true, Ordering::SeqCst) {
            return;
        }
        let n = OUTDATED_QUEUES.fetch_add(1, Ordering::SeqCst) + 1;
        let mut name = write(&self.name);
        let old = name.clone();
        *name = format!("{old}<outdated>({n})");
        drop(name);
        self.cache.clear();
        info!(queue = %old, renamed = %self.name(), "outdated job queue");
    }

    /// Raise the stop flag of a started job.
    pub fn stop_job(&self, id: JobId) -> bool {
        let handler = lock(&self.processing_jobs).get(&id).cloned();
        let handler = handler.or_else(|| lock(&self.started_jobs).get(&id).cloned());
        match handler {
            Some(handler) => {
                handler.stop();
                true
            }
            None => false,
        }
    }

    /// Reset the queued statistic of this queue.
    pub fn clear(&self) {
        self.services.statistics.clear_queued(&self.name());
    }

    /// Periodic housekeeping.
    pub fn maintain(self: &Arc<Self>) {
        let expired = lock(&self.suspended_since)
            .is_some_and(|since| since.elapsed() >= self.services.config.max_suspend());
        if expired {
            info!(queue = %self.name(), "maximum suspend time reached; resuming");
            self.resume();
        }
        self.full_cache_search.store(true, Ordering::SeqCst);
        self.signal();
        self.check_for_unprocessed_jobs();
    }

    /// Take back started jobs that were never acknowledged.
    fn check_for_unprocessed_jobs(self: &Arc<Self>) {
        let timeout = self.configuration.ack_timeout();
        let candidates: Vec<JobId> = lock(&self.started_jobs)
            .values()
            .filter(|h| h.processing_time().is_some_and(|t| t >= timeout))
            .map(|h| h.id())
            .collect();
        if candidates.is_empty() {
            return;
        }

        thread::sleep(self.configuration.ack_revalidate_delay());
        let name = self.name();
        for id in candidates {
            let Some(handler) = lock(&self.started_jobs).remove(&id) else {
                continue;
            };
            info!(queue = %name, job_id = %id, "job was not acknowledged in time; rescheduling");
            if handler.reschedule() {
                handler.mark_queued();
                self.check_for_notify(Some(handler));
            } else {
                self.release(id);
                self.services.statistics.job_dequeued(&name);
                self.check_for_notify(None);
            }
        }
    }

    /// Whether the queue has nothing left to do.
    pub fn can_be_closed(&self) -> bool {
        self.strategy.is_idle()
            && self.cache.is_empty()
            && lock(&self.started_jobs).is_empty()
            && lock(&self.processing_jobs).is_empty()
            && lock(&self.owned).is_empty()
            && self.waiting_jobs() == 0
            && !self.is_suspended()
            && self.async_jobs() == 0
            && self.waiting_for_next.load(Ordering::SeqCst)
    }

    /// Close the queue if it was idle on this and the previous call.
    pub fn try_to_close(&self) -> bool {
        self.resume();
        if !self.can_be_closed() {
            return false;
        }
        if self.close_marker.swap(true, Ordering::SeqCst) {
            self.close();
            return true;
        }
        false
    }

    /// Stop the queue. Jobs still running may finish but their results are discarded.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let name = self.name();
        info!(queue = %name, "closing job queue");

        self.signal();
        {
            let _since = lock(&self.suspended_since);
            self.suspend_cv.notify_all();
        }
        self.strategy.close();

        lock(&self.started_jobs).clear();
        lock(&self.processing_jobs).clear();
        lock(&self.owned).clear();
        self.cache.clear();
        self.strategy.drain();

        if let Some(pool) = &self.own_pool {
            pool.shutdown();
        }
        let handle = lock(&self.thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!(queue = %name, "queue thread terminated abnormally");
            }
        }
    }

    pub fn state_info(&self) -> String {
        let suspended = lock(&self.suspended_since).map(|since| since.elapsed().as_millis());
        format!(
            "{}: outdated={}, suspendedSince={}, asyncJobs={}, waitCount={}, isWaitingForNext={}, pending={}, cached={}, {}",
            self.name(),
            self.is_outdated(),
            suspended.map_or_else(|| "-".to_string(), |ms| format!("{ms}ms ago")),
            self.async_jobs(),
            self.waiting_jobs(),
            self.waiting_for_next.load(Ordering::SeqCst),
            self.strategy.pending_len(),
            self.cache.len(),
            self.strategy.state_info(),
        )
    }

    fn notify(&self, topic: NotificationTopic, handler: &JobHandler, time: Option<Duration>) {
        let notification = JobNotification::new(topic, handler.id(), handler.topic())
            .with_queue(self.name())
            .with_time(time);
        self.services.notifier.notify(notification);
    }
}

impl core::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.name())
            .field("queue_type", &self.configuration.queue_type)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn cancel_jobs(services: &QueueServices, queue_name: &str, handlers: Vec<Arc<JobHandler>>) {
    for handler in handlers {
        handler.cancel();
        let notification = JobNotification::new(NotificationTopic::Removed, handler.id(), handler.topic())
            .with_queue(queue_name);
        services.notifier.notify(notification);
    }
    debug!(queue = %queue_name, "removed pending jobs");
}

fn decrement(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
}
