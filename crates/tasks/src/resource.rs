//! Resource Monitor: samples per-task CPU/memory and records snapshots
//! through the Repository. External collaborator supplies the actual
//! measurement (the process table is platform-specific); this crate only
//! depends on the narrow `ResourceSampler` contract, the same boundary the
//! registry keeps around its external `ScoreSource`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::ResourceSnapshot;
use crate::repository::TaskRepository;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One raw CPU/memory reading for a running task's process.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSample {
    pub cpu_percent: f64,
    pub memory_rss_bytes: u64,
    pub memory_percent: f64,
}

pub trait ResourceSampler: Send + Sync {
    fn sample(&self, pid: u32) -> Option<RawSample>;
}

pub struct ResourceMonitor {
    sampler: Arc<dyn ResourceSampler>,
    repository: Arc<dyn TaskRepository>,
}

impl ResourceMonitor {
    pub fn new(sampler: Arc<dyn ResourceSampler>, repository: Arc<dyn TaskRepository>) -> Self {
        Self { sampler, repository }
    }

    /// Samples `pid` for `task_id` and persists a `ResourceSnapshot`.
    /// No-op (returns `Ok(())`) when the sampler has no reading, matching
    /// the "process already exited" case.
    pub async fn sample_and_record(&self, task_id: &str, pid: u32) -> Result<(), crate::error::TaskError> {
        let Some(raw) = self.sampler.sample(pid) else {
            return Ok(());
        };
        self.repository
            .record_resource_snapshot(ResourceSnapshot {
                task_id: task_id.to_string(),
                cpu_percent: raw.cpu_percent,
                memory_rss_bytes: raw.memory_rss_bytes,
                memory_percent: raw.memory_percent,
                sampled_at: now_unix(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackgroundTask, PollingCursor, TaskExecutionHistory, TaskStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubSampler(Option<RawSample>);

    impl ResourceSampler for StubSampler {
        fn sample(&self, _pid: u32) -> Option<RawSample> {
            self.0
        }
    }

    struct RecordingRepo {
        snapshots: Mutex<Vec<ResourceSnapshot>>,
    }

    #[async_trait]
    impl TaskRepository for RecordingRepo {
        async fn create(&self, _task: BackgroundTask) -> Result<(), crate::error::TaskError> { Ok(()) }
        async fn get(&self, id: &str) -> Result<BackgroundTask, crate::error::TaskError> {
            Err(crate::error::TaskError::NotFound(id.to_string()))
        }
        async fn update(&self, _task: BackgroundTask) -> Result<(), crate::error::TaskError> { Ok(()) }
        async fn list(&self, _status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, crate::error::TaskError> { Ok(vec![]) }
        async fn delete(&self, _id: &str) -> Result<(), crate::error::TaskError> { Ok(()) }
        async fn append_history(&self, _entry: TaskExecutionHistory) -> Result<(), crate::error::TaskError> { Ok(()) }
        async fn history(&self, _task_id: &str) -> Result<Vec<TaskExecutionHistory>, crate::error::TaskError> { Ok(vec![]) }
        async fn record_resource_snapshot(&self, snapshot: ResourceSnapshot) -> Result<(), crate::error::TaskError> {
            self.snapshots.lock().unwrap().push(snapshot);
            Ok(())
        }
        async fn recent_resource_snapshots(&self, _task_id: &str, _limit: usize) -> Result<Vec<ResourceSnapshot>, crate::error::TaskError> {
            Ok(self.snapshots.lock().unwrap().clone())
        }
        async fn register_webhook(&self, _hook: crate::model::WebhookRegistration) -> Result<(), crate::error::TaskError> { Ok(()) }
        async fn webhooks_for_task(&self, _task_id: &str) -> Result<Vec<crate::model::WebhookRegistration>, crate::error::TaskError> { Ok(vec![]) }
        async fn delete_webhook(&self, _task_id: &str, _webhook_id: &str) -> Result<(), crate::error::TaskError> { Ok(()) }
        async fn poll_cursor(&self, _task_id: &str) -> Result<PollingCursor, crate::error::TaskError> { Ok(PollingCursor::START) }
    }

    #[tokio::test]
    async fn records_a_snapshot_when_sample_available() {
        let repo = Arc::new(RecordingRepo { snapshots: Mutex::new(vec![]) });
        let monitor = ResourceMonitor::new(
            Arc::new(StubSampler(Some(RawSample { cpu_percent: 12.5, memory_rss_bytes: 1024, memory_percent: 1.0 }))),
            repo.clone(),
        );
        monitor.sample_and_record("task-1", 4242).await.unwrap();
        assert_eq!(repo.snapshots.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_sample_is_a_no_op() {
        let repo = Arc::new(RecordingRepo { snapshots: Mutex::new(vec![]) });
        let monitor = ResourceMonitor::new(Arc::new(StubSampler(None)), repo.clone());
        monitor.sample_and_record("task-1", 4242).await.unwrap();
        assert!(repo.snapshots.lock().unwrap().is_empty());
    }
}
