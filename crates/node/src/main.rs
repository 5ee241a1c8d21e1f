//! Standalone job node.
//!
//! Reads jobs from stdin, one per line: `<topic> [json properties]`. The
//! commands `stats` and `stop <job id>` are understood as well. The node shuts
//! down when stdin is closed.

use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use jobflow_core::{Job, JobId, JobManagerConfig};
use jobflow_events::{EventBus, InMemoryEventBus, JobNotification};
use jobflow_queues::{
    Completion, FnConsumer, InMemoryJobStorage, JobConsumerManager, JobExecutionContext, JobExecutionResult,
    JobManager,
};

#[derive(Debug, PartialEq)]
enum Command {
    Submit {
        topic: String,
        properties: serde_json::Map<String, serde_json::Value>,
    },
    Stop(JobId),
    Stats,
}

fn parse_line(line: &str) -> anyhow::Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    match head {
        "stats" => Ok(Some(Command::Stats)),
        "stop" => {
            let id = rest.parse().with_context(|| format!("invalid job id {rest:?}"))?;
            Ok(Some(Command::Stop(id)))
        }
        topic => {
            let properties = if rest.is_empty() {
                serde_json::Map::new()
            } else {
                serde_json::from_str(rest).context("job properties must be a JSON object")?
            };
            Ok(Some(Command::Submit {
                topic: topic.to_string(),
                properties,
            }))
        }
    }
}

/// Succeeds every job, sleeping for its `duration_ms` property first.
fn logging_consumer(job: &Job, ctx: &JobExecutionContext) -> anyhow::Result<Completion> {
    let duration: u64 = job.property("duration_ms").unwrap_or(0);
    tracing::info!(job_id = %job.id, topic = %job.topic, duration_ms = duration, "processing job");
    if duration > 0 {
        ctx.init_progress(1, Some(Duration::from_millis(duration)));
        thread::sleep(Duration::from_millis(duration));
        ctx.increment_progress_count(1);
    }
    if job.property::<bool>("fail").unwrap_or(false) {
        return Ok(ctx.result().message("failure requested").failed().into());
    }
    Ok(JobExecutionResult::succeeded().into())
}

fn main() -> anyhow::Result<()> {
    jobflow_observability::init();

    let config = JobManagerConfig::from_env().context("invalid job manager configuration")?;
    let storage = InMemoryJobStorage::arc();
    let consumers = Arc::new(JobConsumerManager::new());
    consumers.register("*", FnConsumer::arc(logging_consumer))?;

    let bus: Arc<InMemoryEventBus<JobNotification>> = Arc::new(InMemoryEventBus::new());
    let notifications = bus.subscribe();
    let logger = thread::Builder::new()
        .name("jobflow-notifications".to_string())
        .spawn(move || {
            while let Ok(n) = notifications.recv() {
                tracing::debug!(
                    topic = n.topic.as_str(),
                    job_id = %n.job_id,
                    job_topic = %n.job_topic,
                    queue = n.queue_name.as_deref().unwrap_or("-"),
                    "job notification"
                );
            }
        })?;

    let manager = JobManager::new(config, storage, consumers, bus.clone())?;
    manager.start()?;

    for line in std::io::stdin().lock().lines() {
        let line = line.context("unable to read stdin")?;
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Command::Submit { topic, properties })) => match manager.add_job(&topic, properties) {
                Ok(job) => println!("{}", job.id),
                Err(e) => tracing::warn!(topic = %topic, error = %e, "job rejected"),
            },
            Ok(Some(Command::Stop(id))) => {
                if !manager.stop_job(id) {
                    tracing::warn!(job_id = %id, "job is not running");
                }
            }
            Ok(Some(Command::Stats)) => println!("{}", serde_json::to_string(&manager.statistics())?),
            Err(e) => tracing::warn!(error = %e, "ignoring input line"),
        }
    }

    manager.shutdown();
    bus.close();
    if logger.join().is_err() {
        tracing::error!("notification logger terminated abnormally");
    }
    println!("{}", serde_json::to_string(&manager.statistics())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_become_commands() {
        assert_eq!(parse_line("  ").unwrap(), None);
        assert_eq!(parse_line("# comment").unwrap(), None);
        assert_eq!(parse_line("stats").unwrap(), Some(Command::Stats));

        let Some(Command::Submit { topic, properties }) = parse_line(r#"org/render {"duration_ms": 5}"#).unwrap()
        else {
            panic!("expected a submission");
        };
        assert_eq!(topic, "org/render");
        assert_eq!(properties["duration_ms"], 5);

        let id = JobId::new();
        assert_eq!(parse_line(&format!("stop {id}")).unwrap(), Some(Command::Stop(id)));
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(parse_line("stop not-an-id").is_err());
        assert!(parse_line("org/render [1, 2]").is_err());
    }

    #[test]
    fn consumer_honours_the_fail_property() {
        let job = Job::new("org/render", serde_json::Map::new()).with_property("fail", serde_json::json!(true));
        let ctx = JobExecutionContext::detached(job.clone());
        let Completion::Done(result) = logging_consumer(&job, &ctx).unwrap() else {
            panic!("expected a synchronous result");
        };
        assert_eq!(result.state, jobflow_core::InternalJobState::Failed);
    }
}
