//! Job storage seam.
//!
//! The engine only needs a handful of operations on job records: scan the
//! pending records of a topic in creation order, persist mutations, finish and
//! delete. Durable backends live outside this crate.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use jobflow_core::{Job, JobId, JobState};

use crate::sync::{read, write};

/// Problem reading a job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The record may become readable later (e.g. a partially written record).
    Recoverable(String),
    /// The record can never be processed.
    Unrecoverable(String),
}

/// A job record as yielded by [`JobStorage::traverse`].
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job: Job,
    pub read_error: Option<ReadError>,
}

/// Job storage error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job storage abstraction.
pub trait JobStorage: Send + Sync {
    /// Store a new job.
    fn add(&self, job: Job) -> Result<JobId, StorageError>;

    /// Get a job by ID (pending or kept after finishing).
    fn get(&self, job_id: JobId) -> Result<Option<Job>, StorageError>;

    /// Topics that currently have pending jobs.
    fn topics(&self) -> Result<Vec<String>, StorageError>;

    /// Visit the pending records of `topic` in creation order.
    ///
    /// The visitor returns `false` to stop the traversal. It must not call back
    /// into the storage.
    fn traverse(
        &self,
        topic: &str,
        visitor: &mut dyn FnMut(JobRecord) -> bool,
    ) -> Result<(), StorageError>;

    /// Persist the current state of a pending job.
    fn update(&self, job: &Job) -> Result<(), StorageError>;

    /// Move a job to its final state, keeping the record only if `keep` is set.
    fn finish(&self, job: &Job, state: JobState, keep: bool) -> Result<(), StorageError>;

    /// Hand a job back so that another owner can claim it.
    fn reassign(&self, job: &Job) -> Result<(), StorageError>;

    /// Delete pending records; returns the number of records removed.
    fn remove(&self, job_ids: &[JobId]) -> Result<usize, StorageError>;
}

impl<S> JobStorage for Arc<S>
where
    S: JobStorage + ?Sized,
{
    fn add(&self, job: Job) -> Result<JobId, StorageError> {
        (**self).add(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, StorageError> {
        (**self).get(job_id)
    }

    fn topics(&self) -> Result<Vec<String>, StorageError> {
        (**self).topics()
    }

    fn traverse(
        &self,
        topic: &str,
        visitor: &mut dyn FnMut(JobRecord) -> bool,
    ) -> Result<(), StorageError> {
        (**self).traverse(topic, visitor)
    }

    fn update(&self, job: &Job) -> Result<(), StorageError> {
        (**self).update(job)
    }

    fn finish(&self, job: &Job, state: JobState, keep: bool) -> Result<(), StorageError> {
        (**self).finish(job, state, keep)
    }

    fn reassign(&self, job: &Job) -> Result<(), StorageError> {
        (**self).reassign(job)
    }

    fn remove(&self, job_ids: &[JobId]) -> Result<usize, StorageError> {
        (**self).remove(job_ids)
    }
}

/// In-memory job storage for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStorage {
    pending: RwLock<HashMap<JobId, Job>>,
    finished: RwLock<HashMap<JobId, Job>>,
    read_errors: RwLock<HashMap<JobId, ReadError>>,
    reassigned: RwLock<BTreeSet<JobId>>,
}

impl InMemoryJobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Store a job whose record cannot be read.
    pub fn add_unreadable(&self, job: Job, error: ReadError) -> Result<JobId, StorageError> {
        let id = job.id;
        self.add(job)?;
        write(&self.read_errors).insert(id, error);
        Ok(id)
    }

    /// Mark a previously unreadable record as readable again.
    pub fn repair(&self, job_id: JobId) -> bool {
        write(&self.read_errors).remove(&job_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        read(&self.pending).len()
    }

    pub fn finished_count(&self) -> usize {
        read(&self.finished).len()
    }

    /// Ids of jobs handed back through [`JobStorage::reassign`].
    pub fn reassigned(&self) -> Vec<JobId> {
        read(&self.reassigned).iter().copied().collect()
    }
}

impl JobStorage for InMemoryJobStorage {
    fn add(&self, job: Job) -> Result<JobId, StorageError> {
        let mut pending = write(&self.pending);
        if pending.contains_key(&job.id) || read(&self.finished).contains_key(&job.id) {
            return Err(StorageError::AlreadyExists(job.id));
        }
        let id = job.id;
        pending.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, StorageError> {
        if let Some(job) = read(&self.pending).get(&job_id) {
            return Ok(Some(job.clone()));
        }
        Ok(read(&self.finished).get(&job_id).cloned())
    }

    fn topics(&self) -> Result<Vec<String>, StorageError> {
        let topics: BTreeSet<String> = read(&self.pending).values().map(|j| j.topic.clone()).collect();
        Ok(topics.into_iter().collect())
    }

    fn traverse(
        &self,
        topic: &str,
        visitor: &mut dyn FnMut(JobRecord) -> bool,
    ) -> Result<(), StorageError> {
        let mut records: Vec<JobRecord> = {
            let pending = read(&self.pending);
            let errors = read(&self.read_errors);
            pending
                .values()
                .filter(|j| j.topic == topic)
                .map(|j| JobRecord {
                    job: j.clone(),
                    read_error: errors.get(&j.id).cloned(),
                })
                .collect()
        };

        records.sort_by_key(|r| r.job.ordering_key());
        for record in records {
            if !visitor(record) {
                break;
            }
        }
        Ok(())
    }

    fn update(&self, job: &Job) -> Result<(), StorageError> {
        let mut pending = write(&self.pending);
        match pending.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(job.id)),
        }
    }

    fn finish(&self, job: &Job, state: JobState, keep: bool) -> Result<(), StorageError> {
        let removed = write(&self.pending).remove(&job.id);
        if removed.is_none() {
            return Err(StorageError::NotFound(job.id));
        }
        write(&self.read_errors).remove(&job.id);

        if keep {
            let mut finished = job.clone();
            finished.finished_state = Some(state);
            finished.finished_at.get_or_insert_with(Utc::now);
            write(&self.finished).insert(job.id, finished);
        }
        Ok(())
    }

    fn reassign(&self, job: &Job) -> Result<(), StorageError> {
        let mut released = job.clone();
        released.queue_name = None;
        released.processing_started = None;
        self.update(&released)?;
        write(&self.reassigned).insert(job.id);
        Ok(())
    }

    fn remove(&self, job_ids: &[JobId]) -> Result<usize, StorageError> {
        let mut pending = write(&self.pending);
        let mut errors = write(&self.read_errors);
        let mut removed = 0;
        for id in job_ids {
            errors.remove(id);
            if pending.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(topic: &str, offset_ms: i64) -> Job {
        Job::new(topic, serde_json::Map::new()).with_created(Utc::now() + Duration::milliseconds(offset_ms))
    }

    fn collect(storage: &InMemoryJobStorage, topic: &str) -> Vec<JobId> {
        let mut ids = Vec::new();
        storage
            .traverse(topic, &mut |r| {
                ids.push(r.job.id);
                true
            })
            .unwrap();
        ids
    }

    #[test]
    fn traverse_yields_creation_order_per_topic() {
        let storage = InMemoryJobStorage::new();
        let late = storage.add(job("a", 20)).unwrap();
        let early = storage.add(job("a", 0)).unwrap();
        storage.add(job("b", 10)).unwrap();

        assert_eq!(collect(&storage, "a"), vec![early, late]);
        assert_eq!(storage.topics().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn traverse_stops_when_visitor_declines() {
        let storage = InMemoryJobStorage::new();
        for i in 0..5 {
            storage.add(job("a", i)).unwrap();
        }
        let mut seen = 0;
        storage
            .traverse("a", &mut |_| {
                seen += 1;
                seen < 2
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn finish_keeps_or_deletes() {
        let storage = InMemoryJobStorage::new();
        let kept = job("a", 0);
        let dropped = job("a", 1);
        storage.add(kept.clone()).unwrap();
        storage.add(dropped.clone()).unwrap();

        storage.finish(&kept, JobState::GivenUp, true).unwrap();
        storage.finish(&dropped, JobState::Succeeded, false).unwrap();

        let stored = storage.get(kept.id).unwrap().unwrap();
        assert_eq!(stored.finished_state, Some(JobState::GivenUp));
        assert!(storage.get(dropped.id).unwrap().is_none());
        assert!(collect(&storage, "a").is_empty());
        assert!(matches!(
            storage.finish(&kept, JobState::Error, true),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn update_of_removed_job_is_not_found() {
        let storage = InMemoryJobStorage::new();
        let j = job("a", 0);
        storage.add(j.clone()).unwrap();
        assert_eq!(storage.remove(&[j.id]).unwrap(), 1);
        assert!(matches!(storage.update(&j), Err(StorageError::NotFound(_))));
        assert_eq!(storage.remove(&[j.id]).unwrap(), 0);
    }

    #[test]
    fn reassign_releases_ownership() {
        let storage = InMemoryJobStorage::new();
        let mut j = job("a", 0);
        storage.add(j.clone()).unwrap();
        j.queue_name = Some("q".into());
        j.processing_started = Some(Utc::now());
        storage.update(&j).unwrap();

        storage.reassign(&j).unwrap();

        let stored = storage.get(j.id).unwrap().unwrap();
        assert!(stored.queue_name.is_none());
        assert!(stored.processing_started.is_none());
        assert_eq!(storage.reassigned(), vec![j.id]);
    }

    #[test]
    fn unreadable_records_carry_their_error() {
        let storage = InMemoryJobStorage::new();
        let id = storage
            .add_unreadable(job("a", 0), ReadError::Recoverable("partial".into()))
            .unwrap();
        let mut errors = Vec::new();
        storage
            .traverse("a", &mut |r| {
                errors.push(r.read_error);
                true
            })
            .unwrap();
        assert_eq!(errors, vec![Some(ReadError::Recoverable("partial".into()))]);

        assert!(storage.repair(id));
    }
}
