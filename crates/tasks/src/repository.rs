//! Task Repository contract. This crate depends only on the trait; a
//! concrete backing store (SQL, embedded KV, ...) is an external collaborator
//! wired in by the embedding service, the same separation the teacher keeps
//! between `SessionStore` (trait) and its concrete implementations. A
//! `parking_lot`-backed in-memory implementation ships alongside it for
//! embedders that don't need durability across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::TaskError;
use crate::model::{
    BackgroundTask, PollingCursor, ResourceSnapshot, TaskExecutionHistory, TaskStatus,
    WebhookRegistration,
};

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: BackgroundTask) -> Result<(), TaskError>;
    async fn get(&self, id: &str) -> Result<BackgroundTask, TaskError>;
    async fn update(&self, task: BackgroundTask) -> Result<(), TaskError>;
    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, TaskError>;
    async fn delete(&self, id: &str) -> Result<(), TaskError>;

    async fn append_history(&self, entry: TaskExecutionHistory) -> Result<(), TaskError>;
    async fn history(&self, task_id: &str) -> Result<Vec<TaskExecutionHistory>, TaskError>;

    async fn record_resource_snapshot(&self, snapshot: ResourceSnapshot) -> Result<(), TaskError>;
    async fn recent_resource_snapshots(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<ResourceSnapshot>, TaskError>;

    async fn register_webhook(&self, hook: WebhookRegistration) -> Result<(), TaskError>;
    async fn webhooks_for_task(&self, task_id: &str) -> Result<Vec<WebhookRegistration>, TaskError>;
    async fn delete_webhook(&self, task_id: &str, webhook_id: &str) -> Result<(), TaskError>;

    async fn poll_cursor(&self, task_id: &str) -> Result<PollingCursor, TaskError>;
}

#[derive(Default)]
struct Store {
    tasks: HashMap<String, BackgroundTask>,
    history: HashMap<String, Vec<TaskExecutionHistory>>,
    snapshots: HashMap<String, Vec<ResourceSnapshot>>,
    webhooks: HashMap<String, Vec<WebhookRegistration>>,
}

/// Default `TaskRepository` for embedders with no external store: everything
/// lives behind one `parking_lot::Mutex`, mirroring the queue's `Lanes` lock.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    store: Mutex<Store>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: BackgroundTask) -> Result<(), TaskError> {
        self.store.lock().tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<BackgroundTask, TaskError> {
        self.store
            .lock()
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    async fn update(&self, task: BackgroundTask) -> Result<(), TaskError> {
        self.store.lock().tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, TaskError> {
        let store = self.store.lock();
        let mut tasks: Vec<BackgroundTask> = store
            .tasks
            .values()
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn delete(&self, id: &str) -> Result<(), TaskError> {
        let mut store = self.store.lock();
        store.tasks.remove(id);
        store.history.remove(id);
        store.snapshots.remove(id);
        store.webhooks.remove(id);
        Ok(())
    }

    async fn append_history(&self, entry: TaskExecutionHistory) -> Result<(), TaskError> {
        self.store
            .lock()
            .history
            .entry(entry.task_id.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn history(&self, task_id: &str) -> Result<Vec<TaskExecutionHistory>, TaskError> {
        Ok(self.store.lock().history.get(task_id).cloned().unwrap_or_default())
    }

    async fn record_resource_snapshot(&self, snapshot: ResourceSnapshot) -> Result<(), TaskError> {
        self.store
            .lock()
            .snapshots
            .entry(snapshot.task_id.clone())
            .or_default()
            .push(snapshot);
        Ok(())
    }

    async fn recent_resource_snapshots(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<ResourceSnapshot>, TaskError> {
        let store = self.store.lock();
        let all = store.snapshots.get(task_id).cloned().unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn register_webhook(&self, hook: WebhookRegistration) -> Result<(), TaskError> {
        self.store
            .lock()
            .webhooks
            .entry(hook.task_id.clone())
            .or_default()
            .push(hook);
        Ok(())
    }

    async fn webhooks_for_task(&self, task_id: &str) -> Result<Vec<WebhookRegistration>, TaskError> {
        Ok(self.store.lock().webhooks.get(task_id).cloned().unwrap_or_default())
    }

    async fn delete_webhook(&self, task_id: &str, webhook_id: &str) -> Result<(), TaskError> {
        if let Some(hooks) = self.store.lock().webhooks.get_mut(task_id) {
            hooks.retain(|h| h.id != webhook_id);
        }
        Ok(())
    }

    async fn poll_cursor(&self, _task_id: &str) -> Result<PollingCursor, TaskError> {
        Ok(PollingCursor::START)
    }
}
