//! Job lifecycle notifications.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use jobflow_core::{InternalJobState, JobId};

use crate::bus::{EventBus, Subscription};
use crate::in_memory_bus::InMemoryEventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationTopic {
    #[serde(rename = "job/queued")]
    Queued,
    #[serde(rename = "job/started")]
    Started,
    #[serde(rename = "job/finished")]
    Finished,
    #[serde(rename = "job/failed")]
    Failed,
    #[serde(rename = "job/cancelled")]
    Cancelled,
    #[serde(rename = "job/removed")]
    Removed,
}

impl NotificationTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTopic::Queued => "job/queued",
            NotificationTopic::Started => "job/started",
            NotificationTopic::Finished => "job/finished",
            NotificationTopic::Failed => "job/failed",
            NotificationTopic::Cancelled => "job/cancelled",
            NotificationTopic::Removed => "job/removed",
        }
    }
}

impl From<InternalJobState> for NotificationTopic {
    fn from(value: InternalJobState) -> Self {
        match value {
            InternalJobState::Succeeded => NotificationTopic::Finished,
            InternalJobState::Failed => NotificationTopic::Failed,
            InternalJobState::Cancelled => NotificationTopic::Cancelled,
        }
    }
}

/// A single lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNotification {
    pub topic: NotificationTopic,
    pub job_id: JobId,
    pub job_topic: String,
    pub queue_name: Option<String>,
    /// Queue time for `Started`, processing time for `Finished`.
    pub time: Option<Duration>,
    pub emitted_at: DateTime<Utc>,
}

impl JobNotification {
    pub fn new(topic: NotificationTopic, job_id: JobId, job_topic: impl Into<String>) -> Self {
        Self {
            topic,
            job_id,
            job_topic: job_topic.into(),
            queue_name: None,
            time: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_time(mut self, time: Option<Duration>) -> Self {
        self.time = time;
        self
    }
}

/// Sink for lifecycle notifications.
///
/// Notifying never fails from the caller's point of view; delivery problems are
/// logged by the implementation.
pub trait JobNotifier: Send + Sync {
    fn notify(&self, notification: JobNotification);
}

impl InMemoryEventBus<JobNotification> {
    /// Subscribe to the given notification topics only.
    pub fn subscribe_topics(&self, topics: &[NotificationTopic]) -> Subscription<JobNotification> {
        let topics = topics.to_vec();
        self.subscribe_where(move |n| topics.contains(&n.topic))
    }
}

impl JobNotifier for InMemoryEventBus<JobNotification> {
    fn notify(&self, notification: JobNotification) {
        let topic = notification.topic;
        if let Err(e) = self.publish(notification) {
            warn!(topic = topic.as_str(), error = ?e, "failed to publish job notification");
        }
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl JobNotifier for NullNotifier {
    fn notify(&self, _notification: JobNotification) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_states_map_to_topics() {
        assert_eq!(NotificationTopic::from(InternalJobState::Succeeded), NotificationTopic::Finished);
        assert_eq!(NotificationTopic::from(InternalJobState::Failed), NotificationTopic::Failed);
        assert_eq!(NotificationTopic::from(InternalJobState::Cancelled), NotificationTopic::Cancelled);
    }

    #[test]
    fn bus_notifier_fans_out() {
        let bus = InMemoryEventBus::<JobNotification>::new();
        let sub = bus.subscribe();
        let id = JobId::new();

        bus.notify(JobNotification::new(NotificationTopic::Queued, id, "a/b").with_queue("q"));

        let received = sub.try_recv().unwrap();
        assert_eq!(received.job_id, id);
        assert_eq!(received.queue_name.as_deref(), Some("q"));
        assert_eq!(
            serde_json::to_value(received.topic).unwrap(),
            serde_json::json!("job/queued")
        );
    }

    #[test]
    fn topic_subscriptions_skip_other_topics() {
        let bus = InMemoryEventBus::<JobNotification>::new();
        let terminal = bus.subscribe_topics(&[NotificationTopic::Finished, NotificationTopic::Cancelled]);
        let id = JobId::new();

        for topic in [NotificationTopic::Queued, NotificationTopic::Started, NotificationTopic::Finished] {
            bus.notify(JobNotification::new(topic, id, "a/b"));
        }

        let seen: Vec<_> = terminal.drain().into_iter().map(|n| n.topic).collect();
        assert_eq!(seen, vec![NotificationTopic::Finished]);
    }

    #[test]
    fn notifying_a_closed_bus_is_harmless() {
        let bus = InMemoryEventBus::<JobNotification>::new();
        bus.close();
        bus.notify(JobNotification::new(NotificationTopic::Queued, JobId::new(), "a/b"));
        assert_eq!(bus.delivered(), 0);
    }
}
