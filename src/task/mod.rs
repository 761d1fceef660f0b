//! Tracking of asynchronous hypervisor tasks.
//!
//! Create, start, stop, and destroy calls return immediately with a task id;
//! [`TaskTracker::wait`] polls it until it stops or the budget runs out.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::hypervisor::{AsyncTask, HypervisorGateway, TaskState};

/// Exit status Proxmox reports for a successful task.
pub const EXIT_OK: &str = "OK";

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Terminal result of waiting on a task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskOutcome {
    /// The task stopped with exit status `OK`.
    Completed,
    /// The task stopped with any other exit status.
    Failed(String),
    /// The task was still running when the budget ran out. It may still be
    /// running on the cluster.
    TimedOut(Duration),
    /// A status poll failed; polling is not retried.
    Error(String),
}

impl TaskOutcome {
    /// `true` only for [`TaskOutcome::Completed`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Operator-facing description.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Completed => String::from("Task completed successfully"),
            Self::Failed(exit_status) => format!("Task failed: {exit_status}"),
            Self::TimedOut(limit) => format!("Task timeout after {} seconds", limit.as_secs()),
            Self::Error(message) => message.clone(),
        }
    }
}

/// Polls task status at a fixed interval.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TaskTracker {
    poll_interval: Duration,
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl TaskTracker {
    /// Creates a tracker polling every `poll_interval`.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Waits for `task` to stop.
    ///
    /// Returns no earlier than `timeout` when the task never stops, and no
    /// later than `timeout` plus one poll.
    pub async fn wait<G>(&self, gateway: &G, task: &AsyncTask, timeout: Duration) -> TaskOutcome
    where
        G: HypervisorGateway + ?Sized,
    {
        let started = Instant::now();
        loop {
            match gateway.task_status(task).await {
                Ok(status) if status.state == TaskState::Stopped => {
                    let outcome = match status.exit_status.filter(|exit| !exit.is_empty()) {
                        Some(exit) if exit == EXIT_OK => TaskOutcome::Completed,
                        Some(exit) => TaskOutcome::Failed(exit),
                        None => TaskOutcome::Failed(String::from("Unknown error")),
                    };
                    if outcome.is_success() {
                        info!(task = %task.id, node = %task.node, "task completed");
                    } else {
                        warn!(task = %task.id, node = %task.node, outcome = %outcome.message(), "task failed");
                    }
                    return outcome;
                }
                Ok(_) => debug!(task = %task.id, "task still running"),
                Err(err) => {
                    warn!(task = %task.id, error = %err, "task status poll failed");
                    return TaskOutcome::Error(err.to_string());
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(task = %task.id, timeout_secs = timeout.as_secs(), "task did not finish in time");
                return TaskOutcome::TimedOut(timeout);
            }
            sleep(self.poll_interval.min(timeout.saturating_sub(elapsed))).await;
        }
    }
}
