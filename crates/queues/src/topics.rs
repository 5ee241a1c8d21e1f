//! Topic routing.
//!
//! Maps topics to queues and keeps the responsible queues running as jobs are
//! added or the topology changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use jobflow_core::{JobId, QueueConfigurationManager, QueueInfo, QueueType};

use crate::manager::QueueManager;
use crate::storage::JobStorage;
use crate::sync::{read, write};

/// Change of the set of topics this instance is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
    /// Responsibility was (re)established; all topics are scanned again.
    Established,
    /// Responsibility is changing; queues are outdated until the next
    /// `Established`.
    Changing,
}

pub struct TopicManager {
    configurations: QueueConfigurationManager,
    queue_manager: Arc<QueueManager>,
    storage: Arc<dyn JobStorage>,
    remove_batch_size: usize,
    active: AtomicBool,
    topics: RwLock<HashMap<String, QueueInfo>>,
}

impl TopicManager {
    pub fn new(
        configurations: QueueConfigurationManager,
        queue_manager: Arc<QueueManager>,
        storage: Arc<dyn JobStorage>,
        remove_batch_size: usize,
    ) -> Self {
        Self {
            configurations,
            queue_manager,
            storage,
            remove_batch_size: remove_batch_size.max(1),
            active: AtomicBool::new(false),
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn topology_changed(&self, event: TopologyEvent) {
        match event {
            TopologyEvent::Changing => {
                info!("topology changing; outdating job queues");
                self.active.store(false, Ordering::SeqCst);
                self.queue_manager.outdate_all();
                write(&self.topics).clear();
            }
            TopologyEvent::Established => {
                self.active.store(true, Ordering::SeqCst);
                self.scan();
            }
        }
    }

    /// A job was stored for `topic`; returns `true` if a queue will pick it up.
    pub fn job_added(&self, topic: &str) -> bool {
        if !self.is_active() {
            debug!(topic, "topology not established; job stays in storage");
            return false;
        }
        let info = self.queue_info(topic);
        if info.configuration.queue_type == QueueType::Ignore {
            return false;
        }
        self.queue_manager
            .start(info, &[topic.to_string()])
            .is_some()
    }

    /// Queue assignment of `topic`, cached until the topology changes.
    pub fn queue_info(&self, topic: &str) -> QueueInfo {
        if let Some(info) = read(&self.topics).get(topic) {
            return info.clone();
        }
        let info = self.configurations.queue_info(topic);
        write(&self.topics).insert(topic.to_string(), info.clone());
        info
    }

    /// Topics currently routed to `queue_name`.
    pub fn topics_of(&self, queue_name: &str) -> Vec<String> {
        let mut topics: Vec<String> = read(&self.topics)
            .iter()
            .filter(|(_, info)| info.queue_name == queue_name)
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Cancel the queued jobs of `queue_name` and delete the records of its
    /// topics that have not started yet.
    ///
    /// Returns the number of records deleted from storage.
    pub fn remove_all(&self, queue_name: &str) -> usize {
        if let Some(queue) = self.queue_manager.queue(queue_name) {
            queue.remove_all();
        }

        let topics = match self.storage.topics() {
            Ok(topics) => topics,
            Err(e) => {
                warn!(queue = queue_name, error = %e, "unable to list topics for removal");
                return 0;
            }
        };

        let mut removed = 0;
        for topic in topics.into_iter().filter(|t| self.queue_info(t).queue_name == queue_name) {
            let mut ids: Vec<JobId> = Vec::new();
            let traversed = self.storage.traverse(&topic, &mut |record| {
                if record.job.processing_started.is_none() {
                    ids.push(record.job.id);
                }
                true
            });
            if let Err(e) = traversed {
                warn!(queue = queue_name, topic = %topic, error = %e, "unable to read jobs for removal");
                continue;
            }
            for batch in ids.chunks(self.remove_batch_size) {
                match self.storage.remove(batch) {
                    Ok(n) => removed += n,
                    Err(e) => warn!(queue = queue_name, topic = %topic, error = %e, "unable to remove jobs"),
                }
            }
        }
        info!(queue = queue_name, removed, "removed pending job records");
        removed
    }

    fn scan(&self) {
        let topics = match self.storage.topics() {
            Ok(topics) => topics,
            Err(e) => {
                warn!(error = %e, "unable to list topics; queues start on demand");
                return;
            }
        };

        let mut grouped: HashMap<String, (QueueInfo, Vec<String>)> = HashMap::new();
        for topic in topics {
            let info = self.queue_info(&topic);
            grouped
                .entry(info.queue_name.clone())
                .or_insert_with(|| (info, Vec::new()))
                .1
                .push(topic);
        }

        info!(queues = grouped.len(), "topology established; starting job queues");
        for (_, (info, topics)) in grouped {
            self.queue_manager.start(info, &topics);
        }
    }
}

impl core::fmt::Debug for TopicManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TopicManager")
            .field("active", &self.is_active())
            .field("topics", &read(&self.topics).len())
            .field("remove_batch_size", &self.remove_batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::JobConsumerManager;
    use crate::services::QueueServices;
    use crate::storage::InMemoryJobStorage;
    use jobflow_core::{Job, JobManagerConfig, QueueConfiguration};
    use jobflow_events::NullNotifier;

    fn setup(queues: Vec<QueueConfiguration>) -> (Arc<InMemoryJobStorage>, Arc<QueueManager>, TopicManager) {
        let storage = InMemoryJobStorage::arc();
        let config = JobManagerConfig {
            queues,
            ..JobManagerConfig::default()
        };
        let configurations = config.queue_configurations();
        let services = QueueServices::new(
            config,
            storage.clone(),
            Arc::new(JobConsumerManager::new()),
            Arc::new(NullNotifier),
        )
        .unwrap();
        let queue_manager = Arc::new(QueueManager::new(services));
        let topics = TopicManager::new(configurations, Arc::clone(&queue_manager), storage.clone(), 2);
        (storage, queue_manager, topics)
    }

    #[test]
    fn jobs_wait_until_topology_is_established() {
        let (storage, queue_manager, topics) = setup(Vec::new());
        storage.add(Job::new("org/a", serde_json::Map::new())).unwrap();

        assert!(!topics.job_added("org/a"));
        assert!(queue_manager.queues().is_empty());

        topics.topology_changed(TopologyEvent::Established);
        let names: Vec<_> = queue_manager.queues().iter().map(|q| q.name()).collect();
        assert_eq!(names, vec![jobflow_core::MAIN_QUEUE_NAME.to_string()]);
        queue_manager.close_all();
    }

    #[test]
    fn ignore_queues_are_never_started() {
        let ignored = QueueConfiguration::new("ignored", QueueType::Ignore)
            .with_topics(["org/skip/*"])
            .unwrap();
        let (_, queue_manager, topics) = setup(vec![ignored]);
        topics.topology_changed(TopologyEvent::Established);

        assert!(!topics.job_added("org/skip/one"));
        assert!(queue_manager.queue("ignored").is_none());
        assert_eq!(topics.topics_of("ignored"), vec!["org/skip/one".to_string()]);
        queue_manager.close_all();
    }

    #[test]
    fn changing_topology_outdates_queues() {
        let (_, queue_manager, topics) = setup(Vec::new());
        topics.topology_changed(TopologyEvent::Established);
        assert!(topics.job_added("org/a"));
        let queue = queue_manager.queue(jobflow_core::MAIN_QUEUE_NAME).unwrap();

        topics.topology_changed(TopologyEvent::Changing);

        assert!(!topics.is_active());
        assert!(queue.is_outdated());
        assert!(queue.name().contains("<outdated>("));
        assert!(queue_manager.queue(jobflow_core::MAIN_QUEUE_NAME).is_none());
        assert!(topics.topics_of(jobflow_core::MAIN_QUEUE_NAME).is_empty());
        assert!(format!("{topics:?}").contains("active: false"));
        queue_manager.close_all();
    }

    #[test]
    fn remove_all_deletes_unstarted_records_in_batches() {
        let (storage, queue_manager, topics) = setup(Vec::new());
        for _ in 0..5 {
            storage.add(Job::new("org/a", serde_json::Map::new())).unwrap();
        }
        let mut started = Job::new("org/a", serde_json::Map::new());
        started.processing_started = Some(chrono::Utc::now());
        storage.add(started).unwrap();

        assert_eq!(topics.remove_all(jobflow_core::MAIN_QUEUE_NAME), 5);
        assert_eq!(storage.pending_count(), 1);
        queue_manager.close_all();
    }
}
