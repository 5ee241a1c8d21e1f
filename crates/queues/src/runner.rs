//! Runs one job attempt against its consumer.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info_span};

use jobflow_core::{InternalJobState, JobState};

use crate::consumer::{Completion, JobExecutor};
use crate::context::{JobExecutionContext, JobExecutionResult};
use crate::handler::JobHandler;
use crate::queue::JobQueue;

/// Outcome of one attempt, the single place the next job state is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed { retry_delay: Option<Duration> },
    Cancelled { stopped: bool },
}

impl ExecutionOutcome {
    pub fn new(result: &JobExecutionResult, stopped: bool) -> Self {
        match result.state {
            InternalJobState::Succeeded => ExecutionOutcome::Succeeded,
            InternalJobState::Failed => ExecutionOutcome::Failed {
                retry_delay: result.retry_delay,
            },
            InternalJobState::Cancelled => ExecutionOutcome::Cancelled { stopped },
        }
    }

    /// State reported to the queue; `Queued` means "retry if allowed".
    pub fn job_state(&self) -> JobState {
        match self {
            ExecutionOutcome::Succeeded => JobState::Succeeded,
            ExecutionOutcome::Failed { .. } => JobState::Queued,
            ExecutionOutcome::Cancelled { stopped: true } => JobState::Stopped,
            ExecutionOutcome::Cancelled { stopped: false } => JobState::Error,
        }
    }
}

/// Body of the pool task for one job.
pub(crate) fn run(queue: Arc<JobQueue>, handler: Arc<JobHandler>, consumer: Arc<dyn JobExecutor>) {
    if !queue.send_acknowledge(handler.id()) {
        debug!(job_id = %handler.id(), "job was taken back before it started; skipping");
        return;
    }

    let configuration = queue.configuration();
    let span = info_span!(
        "job",
        queue = %queue.name(),
        topic = %handler.topic(),
        job_id = %handler.id(),
        priority = ?configuration.priority,
    );
    let _entered = span.enter();

    let context = JobExecutionContext::new(Arc::clone(&handler), Arc::downgrade(&queue));
    let job = handler.job();
    debug!("starting job");

    match catch_unwind(AssertUnwindSafe(|| consumer.process(&job, &context))) {
        Ok(Ok(Completion::Done(result))) => {
            if context.finish_sync() {
                let outcome = ExecutionOutcome::new(&result, handler.is_stopped());
                report(&queue, &handler, result.message, outcome, false);
            }
        }
        Ok(Ok(Completion::Async)) => {
            queue.services().consumers.register_listener(handler.id(), context.clone());
            queue.async_started();
            debug!("job continues asynchronously");
            if let Some(early) = context.mark_async() {
                finish_async(&queue, &handler, early);
            }
        }
        Ok(Err(e)) => {
            error!(error = %e, "consumer failed while processing job");
            context.finish_sync();
            let outcome = ExecutionOutcome::Cancelled { stopped: false };
            report(&queue, &handler, Some(e.to_string()), outcome, false);
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "consumer panicked while processing job");
            context.finish_sync();
            let outcome = ExecutionOutcome::Cancelled { stopped: false };
            report(&queue, &handler, Some(message), outcome, false);
        }
    }
}

/// Completion path for jobs finished through the execution context.
pub(crate) fn finish_async(queue: &Arc<JobQueue>, handler: &Arc<JobHandler>, result: JobExecutionResult) {
    queue.services().consumers.unregister_listener(handler.id());
    let outcome = ExecutionOutcome::new(&result, handler.is_stopped());
    report(queue, handler, result.message, outcome, true);
}

fn report(
    queue: &Arc<JobQueue>,
    handler: &Arc<JobHandler>,
    message: Option<String>,
    outcome: ExecutionOutcome,
    is_async: bool,
) {
    handler.update_job(|job| {
        if let ExecutionOutcome::Failed { retry_delay } = outcome {
            job.delay_override_ms = retry_delay.map(|d| d.as_millis() as u64);
        }
        if message.is_some() {
            job.result_message = message;
        }
    });
    queue.finished_job(handler.id(), outcome.job_state(), is_async);
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(state: InternalJobState) -> JobExecutionResult {
        JobExecutionResult {
            state,
            message: None,
            retry_delay: None,
        }
    }

    #[test]
    fn outcomes_map_to_states() {
        let cases = [
            (InternalJobState::Succeeded, false, JobState::Succeeded),
            (InternalJobState::Failed, false, JobState::Queued),
            (InternalJobState::Failed, true, JobState::Queued),
            (InternalJobState::Cancelled, false, JobState::Error),
            (InternalJobState::Cancelled, true, JobState::Stopped),
        ];
        for (state, stopped, expected) in cases {
            let outcome = ExecutionOutcome::new(&result(state), stopped);
            assert_eq!(outcome.job_state(), expected, "{state:?} stopped={stopped}");
        }
    }

    #[test]
    fn failures_carry_their_delay() {
        let mut r = result(InternalJobState::Failed);
        r.retry_delay = Some(Duration::from_millis(5));
        assert_eq!(
            ExecutionOutcome::new(&r, false),
            ExecutionOutcome::Failed {
                retry_delay: Some(Duration::from_millis(5))
            }
        );
    }

    fn static_panic() {
        panic!("boom");
    }

    fn formatted_panic() {
        panic!("{}", String::from("formatted"));
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload = catch_unwind(static_panic).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload = catch_unwind(formatted_panic).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted");
    }
}
