//! Demo `TaskExecutor` registered for the `"echo"` task type so the Worker
//! Pool has at least one runnable kind out of the box. Real analytical task
//! executors (the ones that actually do the work a background task exists
//! for) are external collaborators wired in by the embedding deployment —
//! this one only reports a few progress ticks and echoes its payload back.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use helixagent_tasks::{BackgroundTask, ExecOutcome, ProgressReporter, TaskExecutor};

pub struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, task: &BackgroundTask, cancel: CancellationToken, progress: ProgressReporter) -> ExecOutcome {
        for pct in [25u8, 50, 75] {
            if cancel.is_cancelled() {
                return ExecOutcome::Failed("cancelled".to_string());
            }
            progress.report(pct, format!("echoing {}", task.task_name)).await;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                _ = cancel.cancelled() => return ExecOutcome::Failed("cancelled".to_string()),
            }
        }
        progress.report(100, "done").await;
        ExecOutcome::Completed
    }
}
