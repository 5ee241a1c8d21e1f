//! Queue statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use jobflow_core::InternalJobState;

use crate::sync::{read, write};

/// Snapshot of a set of counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub start_time: Option<DateTime<Utc>>,
    pub last_activated: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    /// Admitted to a queue, not started yet.
    pub queued_jobs: u64,
    /// Started, not finished yet.
    pub active_jobs: u64,
    pub finished_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
    pub processed_jobs: u64,
    pub total_queue_time_ms: u64,
    pub average_waiting_time_ms: u64,
    pub total_processing_time_ms: u64,
    pub average_processing_time_ms: u64,
}

#[derive(Debug)]
struct Counters {
    start_time: i64,
    last_activated: AtomicI64,
    last_finished: AtomicI64,
    queued: AtomicU64,
    active: AtomicU64,
    started: AtomicU64,
    finished: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    queue_time_ms: AtomicU64,
    processing_time_ms: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            start_time: Utc::now().timestamp_millis(),
            last_activated: AtomicI64::new(0),
            last_finished: AtomicI64::new(0),
            queued: AtomicU64::new(0),
            active: AtomicU64::new(0),
            started: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            queue_time_ms: AtomicU64::new(0),
            processing_time_ms: AtomicU64::new(0),
        }
    }

    fn queued(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    fn dequeued(&self) {
        decrement(&self.queued);
    }

    fn started(&self, queue_time: Duration) {
        decrement(&self.queued);
        self.active.fetch_add(1, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        self.queue_time_ms.fetch_add(millis(queue_time), Ordering::SeqCst);
        self.last_activated.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn ended(&self, state: InternalJobState, processing_time: Duration) {
        decrement(&self.active);
        match state {
            InternalJobState::Succeeded => {
                self.finished.fetch_add(1, Ordering::SeqCst);
                self.processing_time_ms.fetch_add(millis(processing_time), Ordering::SeqCst);
            }
            InternalJobState::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            InternalJobState::Cancelled => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.last_finished.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn snapshot(&self) -> Statistics {
        let finished = self.finished.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let cancelled = self.cancelled.load(Ordering::SeqCst);
        let started = self.started.load(Ordering::SeqCst);
        let queue_time = self.queue_time_ms.load(Ordering::SeqCst);
        let processing_time = self.processing_time_ms.load(Ordering::SeqCst);
        Statistics {
            start_time: timestamp(self.start_time),
            last_activated: timestamp(self.last_activated.load(Ordering::SeqCst)),
            last_finished: timestamp(self.last_finished.load(Ordering::SeqCst)),
            queued_jobs: self.queued.load(Ordering::SeqCst),
            active_jobs: self.active.load(Ordering::SeqCst),
            finished_jobs: finished,
            failed_jobs: failed,
            cancelled_jobs: cancelled,
            processed_jobs: finished + failed + cancelled,
            total_queue_time_ms: queue_time,
            average_waiting_time_ms: queue_time.checked_div(started).unwrap_or(0),
            total_processing_time_ms: processing_time,
            average_processing_time_ms: processing_time.checked_div(finished).unwrap_or(0),
        }
    }
}

fn decrement(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

fn timestamp(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

/// Global, per-queue and per-topic counters.
#[derive(Debug)]
pub struct StatisticsManager {
    global: Counters,
    queues: RwLock<HashMap<String, Arc<Counters>>>,
    topics: RwLock<HashMap<String, Arc<Counters>>>,
}

impl Default for StatisticsManager {
    fn default() -> Self {
        Self {
            global: Counters::new(),
            queues: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
        }
    }
}

impl StatisticsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_queued(&self, queue: &str) {
        self.global.queued();
        self.queue_counters(queue).queued();
    }

    /// A job left the queue without being started.
    pub fn job_dequeued(&self, queue: &str) {
        self.global.dequeued();
        self.queue_counters(queue).dequeued();
    }

    pub fn job_started(&self, queue: &str, topic: &str, queue_time: Duration) {
        self.global.started(queue_time);
        self.queue_counters(queue).started(queue_time);
        // Topic counters do not track admission, so `queued` stays at zero there.
        self.topic_counters(topic).started(queue_time);
    }

    pub fn job_ended(&self, queue: &str, topic: &str, state: InternalJobState, processing_time: Duration) {
        self.global.ended(state, processing_time);
        self.queue_counters(queue).ended(state, processing_time);
        self.topic_counters(topic).ended(state, processing_time);
    }

    /// Reset the queued counter of a queue (and its share of the global one).
    pub fn clear_queued(&self, queue: &str) {
        let counters = self.queue_counters(queue);
        let cleared = counters.queued.swap(0, Ordering::SeqCst);
        let _ = self
            .global
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(cleared)));
    }

    pub fn global(&self) -> Statistics {
        self.global.snapshot()
    }

    pub fn queue(&self, queue: &str) -> Option<Statistics> {
        read(&self.queues).get(queue).map(|c| c.snapshot())
    }

    pub fn topic(&self, topic: &str) -> Option<Statistics> {
        read(&self.topics).get(topic).map(|c| c.snapshot())
    }

    /// Snapshots of every topic seen so far.
    pub fn topics(&self) -> HashMap<String, Statistics> {
        read(&self.topics)
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect()
    }

    fn queue_counters(&self, queue: &str) -> Arc<Counters> {
        counters(&self.queues, queue)
    }

    fn topic_counters(&self, topic: &str) -> Arc<Counters> {
        counters(&self.topics, topic)
    }
}

fn counters(map: &RwLock<HashMap<String, Arc<Counters>>>, key: &str) -> Arc<Counters> {
    if let Some(c) = read(map).get(key) {
        return Arc::clone(c);
    }
    Arc::clone(
        write(map)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Counters::new())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_jobs_between_counters() {
        let stats = StatisticsManager::new();
        stats.job_queued("q");
        stats.job_queued("q");
        stats.job_started("q", "t", Duration::from_millis(10));

        let s = stats.queue("q").unwrap();
        assert_eq!((s.queued_jobs, s.active_jobs), (1, 1));
        assert!(s.last_activated.is_some());

        stats.job_ended("q", "t", InternalJobState::Succeeded, Duration::from_millis(30));
        let s = stats.queue("q").unwrap();
        assert_eq!((s.active_jobs, s.finished_jobs, s.processed_jobs), (0, 1, 1));
        assert_eq!(s.average_processing_time_ms, 30);
        assert_eq!(s.average_waiting_time_ms, 10);
        assert_eq!(stats.topic("t").unwrap().finished_jobs, 1);
        assert_eq!(stats.global().finished_jobs, 1);
    }

    #[test]
    fn failures_and_cancellations_are_counted_separately() {
        let stats = StatisticsManager::new();
        for state in [InternalJobState::Failed, InternalJobState::Cancelled, InternalJobState::Cancelled] {
            stats.job_queued("q");
            stats.job_started("q", "t", Duration::ZERO);
            stats.job_ended("q", "t", state, Duration::ZERO);
        }
        let s = stats.global();
        assert_eq!((s.failed_jobs, s.cancelled_jobs, s.processed_jobs), (1, 2, 3));
        assert_eq!(s.average_processing_time_ms, 0);
    }

    #[test]
    fn counters_never_underflow() {
        let stats = StatisticsManager::new();
        stats.job_dequeued("q");
        stats.job_ended("q", "t", InternalJobState::Cancelled, Duration::ZERO);
        let s = stats.queue("q").unwrap();
        assert_eq!((s.queued_jobs, s.active_jobs), (0, 0));
    }

    #[test]
    fn clearing_a_queue_adjusts_the_global_counter() {
        let stats = StatisticsManager::new();
        stats.job_queued("a");
        stats.job_queued("a");
        stats.job_queued("b");

        stats.clear_queued("a");

        assert_eq!(stats.queue("a").unwrap().queued_jobs, 0);
        assert_eq!(stats.global().queued_jobs, 1);
    }

    #[test]
    fn snapshots_serialize() {
        let stats = StatisticsManager::new();
        stats.job_queued("q");
        let json = serde_json::to_value(stats.global()).unwrap();
        assert_eq!(json["queued_jobs"], 1);
    }
}
