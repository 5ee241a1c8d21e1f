//! Job states.

use serde::{Deserialize, Serialize};

/// Persisted state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Waiting to be processed (also used for "eligible for retry").
    Queued,
    /// Owned by a queue and handed to a consumer.
    Active,
    /// Processed successfully.
    Succeeded,
    /// Cancelled by the consumer after the stop flag was raised.
    Stopped,
    /// Failed more often than the retry limit allows.
    GivenUp,
    /// Cancelled by the consumer or failed unexpectedly.
    Error,
    /// Removed from its queue without ever running.
    Dropped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Queued | JobState::Active)
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            JobState::Queued => "QUEUED",
            JobState::Active => "ACTIVE",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Stopped => "STOPPED",
            JobState::GivenUp => "GIVEN_UP",
            JobState::Error => "ERROR",
            JobState::Dropped => "DROPPED",
        };
        f.write_str(name)
    }
}

/// Outcome of one execution attempt as seen by statistics and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalJobState {
    Succeeded,
    /// Failed, will be retried.
    Failed,
    /// Will not run again.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_queued_and_active_are_live() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Active.is_terminal());
        for s in [
            JobState::Succeeded,
            JobState::Stopped,
            JobState::GivenUp,
            JobState::Error,
            JobState::Dropped,
        ] {
            assert!(s.is_terminal(), "{s} should be terminal");
        }
    }

    #[test]
    fn serializes_in_screaming_case() {
        let json = serde_json::to_string(&JobState::GivenUp).unwrap();
        assert_eq!(json, "\"GIVEN_UP\"");
    }
}
