//! Per-queue prefetch of pending job records.
//!
//! The cache is refilled only once it is empty, and a refill scans only the
//! topics flagged as having new jobs; the whole topic set is scanned when a full
//! scan is requested.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use jobflow_core::{Job, JobId, JobState, QueueType};

use crate::handler::JobHandler;
use crate::storage::{JobStorage, ReadError};
use crate::sync::lock;

#[derive(Debug, Default)]
struct CacheState {
    topics: BTreeSet<String>,
    topics_with_new_jobs: BTreeSet<String>,
    cache: VecDeque<Arc<JobHandler>>,
}

/// Cache of jobs a queue will process next.
pub struct QueueJobCache {
    queue_name: String,
    queue_type: QueueType,
    preload_limit: usize,
    storage: Arc<dyn JobStorage>,
    state: Mutex<CacheState>,
}

impl QueueJobCache {
    pub fn new<I, S>(
        queue_name: impl Into<String>,
        queue_type: QueueType,
        preload_limit: usize,
        storage: Arc<dyn JobStorage>,
        topics: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: BTreeSet<String> = topics.into_iter().map(Into::into).collect();
        Self {
            queue_name: queue_name.into(),
            queue_type,
            preload_limit: preload_limit.max(1),
            storage,
            state: Mutex::new(CacheState {
                topics_with_new_jobs: topics.clone(),
                topics,
                cache: VecDeque::new(),
            }),
        }
    }

    /// Next job to process, refilling from storage if the cache is empty.
    ///
    /// `is_owned` filters out jobs the queue already holds.
    pub fn get_next_job(&self, is_owned: &dyn Fn(&JobId) -> bool, full_scan: bool) -> Option<Arc<JobHandler>> {
        let to_scan: Vec<String> = {
            let mut state = lock(&self.state);
            if full_scan {
                state.topics_with_new_jobs = state.topics.clone();
            }
            if let Some(next) = state.cache.pop_front() {
                return Some(next);
            }
            std::mem::take(&mut state.topics_with_new_jobs).into_iter().collect()
        };
        if to_scan.is_empty() {
            return None;
        }

        let (per_topic, rescan) = self.load(&to_scan, is_owned);
        let jobs = arrange(self.queue_type, per_topic);
        debug!(queue = %self.queue_name, topics = to_scan.len(), jobs = jobs.len(), "filled job cache");

        let mut state = lock(&self.state);
        state.topics_with_new_jobs.extend(rescan);
        state.cache.extend(
            jobs.into_iter()
                .map(|job| JobHandler::new(job, Arc::clone(&self.storage))),
        );
        state.cache.pop_front()
    }

    /// Flag topics as having new jobs; unknown topics are added.
    pub fn handle_new_topics<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = lock(&self.state);
        for topic in topics {
            let topic = topic.into();
            state.topics.insert(topic.clone());
            state.topics_with_new_jobs.insert(topic);
        }
    }

    /// Give a job back: to the front for ordered queues, to the back otherwise.
    pub fn reschedule(&self, handler: Arc<JobHandler>) {
        let mut state = lock(&self.state);
        match self.queue_type {
            QueueType::Ordered => state.cache.push_front(handler),
            _ => state.cache.push_back(handler),
        }
    }

    pub fn clear(&self) {
        lock(&self.state).cache.clear();
    }

    /// Remove and return every cached job.
    pub fn drain(&self) -> Vec<Arc<JobHandler>> {
        lock(&self.state).cache.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).cache.is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).cache.len()
    }

    pub fn topics(&self) -> Vec<String> {
        lock(&self.state).topics.iter().cloned().collect()
    }

    /// Read up to `preload_limit` eligible jobs per topic.
    ///
    /// Returns the jobs per topic and the topics that should be scanned again.
    fn load(&self, topics: &[String], is_owned: &dyn Fn(&JobId) -> bool) -> (Vec<Vec<Job>>, Vec<String>) {
        let mut per_topic = Vec::with_capacity(topics.len());
        let mut rescan = Vec::new();
        let mut unreadable = Vec::new();

        for topic in topics {
            let mut jobs = Vec::new();
            let mut skipped_recoverable = false;
            let result = self.storage.traverse(topic, &mut |record| {
                match record.read_error {
                    Some(ReadError::Unrecoverable(reason)) => unreadable.push((record.job, reason)),
                    Some(ReadError::Recoverable(_)) => skipped_recoverable = true,
                    None if record.job.processing_started.is_some() => {}
                    None if is_owned(&record.job.id) => {}
                    None => jobs.push(record.job),
                }
                jobs.len() < self.preload_limit
            });

            if let Err(e) = result {
                warn!(queue = %self.queue_name, topic = %topic, error = %e, "unable to read jobs for topic");
                rescan.push(topic.clone());
            } else if jobs.len() >= self.preload_limit || skipped_recoverable {
                rescan.push(topic.clone());
            }
            per_topic.push(jobs);
        }

        for (job, reason) in unreadable {
            warn!(queue = %self.queue_name, job_id = %job.id, reason = %reason, "unreadable job; failing it");
            JobHandler::new(job, Arc::clone(&self.storage)).finished(JobState::Error, true, None);
        }

        (per_topic, rescan)
    }
}

impl core::fmt::Debug for QueueJobCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueJobCache")
            .field("queue_name", &self.queue_name)
            .field("queue_type", &self.queue_type)
            .field("len", &self.len())
            .finish()
    }
}

/// Combine per-topic results: creation order for ordered and unordered queues,
/// one job per topic per pass for round robin queues.
pub(crate) fn arrange(queue_type: QueueType, per_topic: Vec<Vec<Job>>) -> Vec<Job> {
    match queue_type {
        QueueType::TopicRoundRobin => {
            let mut iters: Vec<_> = per_topic.into_iter().map(Vec::into_iter).collect();
            let mut out = Vec::new();
            loop {
                let before = out.len();
                out.extend(iters.iter_mut().filter_map(Iterator::next));
                if out.len() == before {
                    break;
                }
            }
            out
        }
        _ => {
            let mut all: Vec<Job> = per_topic.into_iter().flatten().collect();
            all.sort_by_key(Job::ordering_key);
            all
        }
    }
}
