//! Worker Pool: owns N worker loops, each dequeuing a task, invoking the
//! registered `TaskExecutor` for its `task_type`, and updating
//! progress/heartbeat/terminal status through the Repository. Grounded in
//! the teacher's `TaskWatcher` polling loop (`crates/agent/src/tasks.rs`) —
//! same bounded-poll-and-observe shape, generalized from "watch one session's
//! task" to "run N independent worker loops against a shared queue".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::model::{BackgroundTask, ResourceSnapshot, TaskExecutionHistory, TaskStatus};
use crate::notify::{NotificationHub, TaskEventKind};
use crate::queue::TaskQueue;
use crate::repository::TaskRepository;
use crate::resource::ResourceMonitor;
use crate::stuck;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Enforces the two status-keyed invariants from the data model: `completed_at`
/// set iff `status ∈ {completed, failed, cancelled}`, `worker_id` set iff
/// `status ∈ {running, paused}`. Called after every status write so no path
/// can drift the record out of sync with its own `status` field.
fn apply_status_invariants(task: &mut BackgroundTask) {
    task.completed_at = match task.status {
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => Some(now_unix()),
        _ => None,
    };
    if !matches!(task.status, TaskStatus::Running | TaskStatus::Paused) {
        task.worker_id = None;
    }
}

/// Outcome a `TaskExecutor` reports for one task attempt.
pub enum ExecOutcome {
    Completed,
    Failed(String),
}

/// Per-`task_type` execution contract. `progress` lets the executor report
/// incremental status; the pool samples it on a `heartbeat_interval_s` cadence.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &BackgroundTask,
        cancel: CancellationToken,
        progress: ProgressReporter,
    ) -> ExecOutcome;
}

/// Handed to a running `TaskExecutor` to push progress without touching the
/// repository directly.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: String,
    hub: Arc<NotificationHub>,
    last_progress: Arc<Mutex<u8>>,
}

impl ProgressReporter {
    /// Reports progress; silently clamps a regression to the last reported
    /// value (progress must never decrease within one execution attempt).
    pub async fn report(&self, progress: u8, message: impl Into<String>) {
        let mut last = self.last_progress.lock().await;
        let clamped = progress.max(*last);
        *last = clamped;
        self.hub
            .publish(&self.task_id, TaskEventKind::Progress {
                progress: clamped,
                message: message.into(),
            })
            .await;
    }
}

/// Worker Pool resource budget declared by each worker; `Scale(n)` adjusts
/// worker count, not the budget.
#[derive(Debug, Clone, Copy)]
pub struct WorkerBudget {
    pub max_cpu_cores: f64,
    pub max_memory_mb: u64,
}

impl Default for WorkerBudget {
    fn default() -> Self {
        Self {
            max_cpu_cores: 4.0,
            max_memory_mb: 8192,
        }
    }
}

pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    repository: Arc<dyn TaskRepository>,
    hub: Arc<NotificationHub>,
    executors: Arc<RwLock<HashMap<String, Arc<dyn TaskExecutor>>>>,
    budget: WorkerBudget,
    workers: Mutex<Vec<(CancellationToken, JoinHandle<()>)>>,
    poll_interval_ms: u64,
    resource_monitor: RwLock<Option<Arc<ResourceMonitor>>>,
    sweeper: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<TaskQueue>,
        repository: Arc<dyn TaskRepository>,
        hub: Arc<NotificationHub>,
        budget: WorkerBudget,
    ) -> Self {
        Self {
            queue,
            repository,
            hub,
            executors: Arc::new(RwLock::new(HashMap::new())),
            budget,
            workers: Mutex::new(Vec::new()),
            poll_interval_ms: 200,
            resource_monitor: RwLock::new(None),
            sweeper: Mutex::new(None),
        }
    }

    pub async fn register_executor(&self, task_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.executors.write().await.insert(task_type.into(), executor);
    }

    /// Supplies the Resource Monitor used by the stuck-detection sweep to
    /// record CPU/memory snapshots for running tasks that expose a `process_pid`.
    /// Left unset, the sweep still runs heartbeat-based stuck detection — the
    /// sampler is an optional external collaborator, not a dependency of it.
    pub async fn set_resource_monitor(&self, monitor: Arc<ResourceMonitor>) {
        *self.resource_monitor.write().await = Some(monitor);
    }

    /// Adjusts the live worker count to `n`, spawning or cancelling loops.
    pub async fn scale(self: &Arc<Self>, n: usize) {
        let mut workers = self.workers.lock().await;
        while workers.len() < n {
            let token = CancellationToken::new();
            let worker_id = format!("worker-{}", workers.len() + 1);
            let pool = Arc::clone(self);
            let worker_token = token.clone();
            let handle = tokio::spawn(async move { pool.run_worker(worker_id, worker_token).await });
            workers.push((token, handle));
        }
        while workers.len() > n {
            if let Some((token, handle)) = workers.pop() {
                token.cancel();
                handle.abort();
            }
        }
    }

    /// Starts the periodic stuck-detection sweep on `interval`, replacing any
    /// sweep already running. Every tick: samples resources (when a monitor is
    /// configured and the task reports a `process_pid`), then evaluates every
    /// `Running` task against the Stuck Detector and fails the ones that trip
    /// it through the normal retry-aware failure path.
    pub async fn spawn_stuck_sweeper(self: &Arc<Self>, interval: Duration) {
        let token = CancellationToken::new();
        let pool = Arc::clone(self);
        let sweep_token = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = sweep_token.cancelled() => return,
                }
                pool.sweep_stuck_tasks().await;
            }
        });
        let mut sweeper = self.sweeper.lock().await;
        if let Some((old_token, old_handle)) = sweeper.take() {
            old_token.cancel();
            old_handle.abort();
        }
        *sweeper = Some((token, handle));
    }

    async fn sweep_stuck_tasks(&self) {
        let Ok(running) = self.repository.list(Some(TaskStatus::Running)).await else {
            return;
        };
        let monitor = self.resource_monitor.read().await.clone();
        for task in running {
            if let (Some(monitor), Some(pid)) = (&monitor, task.process_pid) {
                let _ = monitor.sample_and_record(&task.id, pid).await;
            }

            let snapshots = self
                .repository
                .recent_resource_snapshots(&task.id, 10)
                .await
                .unwrap_or_default();
            if let Some(reason) = stuck::evaluate(&task, now_unix(), &snapshots) {
                self.finish_with_failure(task, format!("stuck: {reason:?}")).await;
            }
        }
    }

    async fn run_worker(self: Arc<Self>, worker_id: String, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let Some(task) = self
                .queue
                .dequeue(&worker_id, self.budget.max_cpu_cores, self.budget.max_memory_mb)
            else {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(self.poll_interval_ms)) => {}
                    _ = cancel.cancelled() => return,
                }
                continue;
            };
            self.run_task(task, &worker_id, &cancel).await;
        }
    }

    async fn run_task(&self, mut task: BackgroundTask, worker_id: &str, cancel: &CancellationToken) {
        task.status = TaskStatus::Running;
        task.worker_id = Some(worker_id.to_string());
        task.started_at = Some(now_unix());
        task.last_heartbeat_at = Some(now_unix());
        if self.repository.update(task.clone()).await.is_err() {
            return;
        }
        self.hub
            .publish(&task.id, TaskEventKind::StatusChanged {
                status: TaskStatus::Running,
            })
            .await;

        let Some(executor) = self.executors.read().await.get(&task.task_type).cloned() else {
            self.finish_with_failure(task, "no executor registered for task_type".into())
                .await;
            return;
        };

        let progress = ProgressReporter {
            task_id: task.id.clone(),
            hub: Arc::clone(&self.hub),
            last_progress: Arc::new(Mutex::new(task.progress)),
        };

        let outcome = executor.execute(&task, cancel.clone(), progress).await;
        self.queue.notify_finished();

        match outcome {
            ExecOutcome::Completed => self.finish_with_success(task).await,
            ExecOutcome::Failed(reason) => self.finish_with_failure(task, reason).await,
        }
    }

    async fn finish_with_success(&self, mut task: BackgroundTask) {
        let worker_id = task.worker_id.clone();
        task.status = TaskStatus::Completed;
        task.progress = 100;
        apply_status_invariants(&mut task);
        let _ = self.repository.update(task.clone()).await;
        let _ = self
            .repository
            .append_history(TaskExecutionHistory {
                task_id: task.id.clone(),
                event_type: "completed".to_string(),
                event_data: serde_json::json!({}),
                worker_id,
                created_at: now_unix(),
            })
            .await;
        self.hub
            .publish(&task.id, TaskEventKind::Completed)
            .await;
    }

    /// Failure path: retries when `retry_count < max_retries` (or `endless`),
    /// otherwise moves the task to the dead-letter queue.
    async fn finish_with_failure(&self, mut task: BackgroundTask, reason: String) {
        task.last_error = Some(reason.clone());
        let can_retry = task.config.endless || task.retry_count < task.max_retries;
        if can_retry {
            task.retry_count += 1;
            task.status = TaskStatus::Failed;
            apply_status_invariants(&mut task);
            let _ = self.repository.update(task.clone()).await;
            self.hub
                .publish(&task.id, TaskEventKind::Failed {
                    error: reason.clone(),
                })
                .await;
            let delay = task.config.retry_delay_s;
            let mut retried = task;
            retried.status = TaskStatus::Pending;
            apply_status_invariants(&mut retried);
            self.queue.requeue(retried, delay);
        } else {
            task.status = TaskStatus::Dead;
            apply_status_invariants(&mut task);
            let _ = self.repository.update(task.clone()).await;
            self.hub
                .publish(&task.id, TaskEventKind::Failed { error: reason.clone() })
                .await;
            self.queue.move_to_dead_letter(task, reason);
        }
    }

    /// `DeleteTask`: accepted only in terminal states.
    pub async fn delete_task(&self, id: &str) -> Result<(), TaskError> {
        let task = self.repository.get(id).await?;
        if !task.status.is_terminal() {
            return Err(TaskError::NotTerminal(id.to_string()));
        }
        self.repository.delete(id).await
    }

    /// Validates and applies a requested status transition.
    pub async fn transition(&self, id: &str, to: TaskStatus) -> Result<(), TaskError> {
        let mut task = self.repository.get(id).await?;
        let allowed = task.status.can_transition_to(
            to,
            task.config.allow_pause,
            task.config.allow_cancel,
            task.retry_count,
            task.max_retries,
            task.config.endless,
        );
        if !allowed {
            return Err(TaskError::IllegalTransition {
                task_id: id.to_string(),
                from: task.status,
                to,
            });
        }
        task.status = to;
        apply_status_invariants(&mut task);
        self.repository.update(task).await?;
        self.hub
            .publish(id, TaskEventKind::StatusChanged { status: to })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, TaskConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct InMemoryRepo {
        tasks: Mutex<HashMap<String, BackgroundTask>>,
    }

    impl InMemoryRepo {
        fn new() -> Self {
            Self { tasks: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl TaskRepository for InMemoryRepo {
        async fn create(&self, task: BackgroundTask) -> Result<(), TaskError> {
            self.tasks.lock().await.insert(task.id.clone(), task);
            Ok(())
        }
        async fn get(&self, id: &str) -> Result<BackgroundTask, TaskError> {
            self.tasks.lock().await.get(id).cloned().ok_or_else(|| TaskError::NotFound(id.to_string()))
        }
        async fn update(&self, task: BackgroundTask) -> Result<(), TaskError> {
            self.tasks.lock().await.insert(task.id.clone(), task);
            Ok(())
        }
        async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, TaskError> {
            Ok(self
                .tasks
                .lock()
                .await
                .values()
                .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
                .cloned()
                .collect())
        }
        async fn delete(&self, id: &str) -> Result<(), TaskError> {
            self.tasks.lock().await.remove(id);
            Ok(())
        }
        async fn append_history(&self, _entry: TaskExecutionHistory) -> Result<(), TaskError> {
            Ok(())
        }
        async fn history(&self, _task_id: &str) -> Result<Vec<TaskExecutionHistory>, TaskError> {
            Ok(vec![])
        }
        async fn record_resource_snapshot(&self, _snapshot: ResourceSnapshot) -> Result<(), TaskError> {
            Ok(())
        }
        async fn recent_resource_snapshots(&self, _task_id: &str, _limit: usize) -> Result<Vec<ResourceSnapshot>, TaskError> {
            Ok(vec![])
        }
        async fn register_webhook(&self, _hook: crate::model::WebhookRegistration) -> Result<(), TaskError> {
            Ok(())
        }
        async fn webhooks_for_task(&self, _task_id: &str) -> Result<Vec<crate::model::WebhookRegistration>, TaskError> {
            Ok(vec![])
        }
        async fn delete_webhook(&self, _task_id: &str, _webhook_id: &str) -> Result<(), TaskError> {
            Ok(())
        }
        async fn poll_cursor(&self, _task_id: &str) -> Result<crate::model::PollingCursor, TaskError> {
            Ok(crate::model::PollingCursor::START)
        }
    }

    struct CountingExecutor(Arc<AtomicUsize>);

    #[async_trait]
    impl TaskExecutor for CountingExecutor {
        async fn execute(&self, _task: &BackgroundTask, _cancel: CancellationToken, progress: ProgressReporter) -> ExecOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            progress.report(50, "halfway").await;
            ExecOutcome::Completed
        }
    }

    fn sample_task(id: &str) -> BackgroundTask {
        BackgroundTask::new(id, "analysis", "t", Priority::Normal, TaskConfig::default(), serde_json::json!({}), 0)
    }

    #[tokio::test]
    async fn delete_rejects_non_terminal_task() {
        let repo = Arc::new(InMemoryRepo::new());
        repo.create(sample_task("t1")).await.unwrap();
        let queue = Arc::new(TaskQueue::new());
        let hub = Arc::new(NotificationHub::new());
        let pool = WorkerPool::new(queue, repo, hub, WorkerBudget::default());
        let err = pool.delete_task("t1").await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn transition_rejects_illegal_move() {
        let repo = Arc::new(InMemoryRepo::new());
        repo.create(sample_task("t1")).await.unwrap();
        let queue = Arc::new(TaskQueue::new());
        let hub = Arc::new(NotificationHub::new());
        let pool = WorkerPool::new(queue, repo, hub, WorkerBudget::default());
        let err = pool.transition("t1", TaskStatus::Completed).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn progress_reporter_never_regresses() {
        let hub = Arc::new(NotificationHub::new());
        let reporter = ProgressReporter {
            task_id: "t1".to_string(),
            hub: Arc::clone(&hub),
            last_progress: Arc::new(Mutex::new(40)),
        };
        reporter.report(10, "should clamp to 40").await;
        assert_eq!(*reporter.last_progress.lock().await, 40);
        reporter.report(60, "advances").await;
        assert_eq!(*reporter.last_progress.lock().await, 60);
    }

    #[tokio::test]
    async fn finish_with_failure_retry_sets_completed_at_and_clears_worker_id() {
        let repo = Arc::new(InMemoryRepo::new());
        let mut task = sample_task("t1");
        task.status = TaskStatus::Running;
        task.worker_id = Some("worker-1".to_string());
        repo.create(task.clone()).await.unwrap();
        let queue = Arc::new(TaskQueue::new());
        let hub = Arc::new(NotificationHub::new());
        let pool = WorkerPool::new(queue, Arc::clone(&repo), hub, WorkerBudget::default());

        pool.finish_with_failure(task, "boom".to_string()).await;

        let failed = repo.get("t1").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.completed_at.is_some());
        assert!(failed.worker_id.is_none());
    }

    #[tokio::test]
    async fn finish_with_failure_dead_letter_has_no_completed_at() {
        let repo = Arc::new(InMemoryRepo::new());
        let mut task = sample_task("t1");
        task.status = TaskStatus::Running;
        task.worker_id = Some("worker-1".to_string());
        task.retry_count = task.max_retries;
        repo.create(task.clone()).await.unwrap();
        let queue = Arc::new(TaskQueue::new());
        let hub = Arc::new(NotificationHub::new());
        let pool = WorkerPool::new(queue, Arc::clone(&repo), hub, WorkerBudget::default());

        pool.finish_with_failure(task, "boom".to_string()).await;

        let dead = repo.get("t1").await.unwrap();
        assert_eq!(dead.status, TaskStatus::Dead);
        assert!(dead.completed_at.is_none());
        assert!(dead.worker_id.is_none());
    }

    #[tokio::test]
    async fn sweep_fails_a_task_with_a_stale_heartbeat() {
        let repo = Arc::new(InMemoryRepo::new());
        let mut task = sample_task("t1");
        task.status = TaskStatus::Running;
        task.worker_id = Some("worker-1".to_string());
        task.last_heartbeat_at = Some(0);
        task.config.stuck_threshold_s = 1;
        repo.create(task).await.unwrap();
        let queue = Arc::new(TaskQueue::new());
        let hub = Arc::new(NotificationHub::new());
        let pool = WorkerPool::new(queue, Arc::clone(&repo), hub, WorkerBudget::default());

        pool.sweep_stuck_tasks().await;

        let swept = repo.get("t1").await.unwrap();
        assert_ne!(swept.status, TaskStatus::Running);
        assert!(swept.last_error.as_ref().unwrap().contains("stuck"));
    }

    #[tokio::test]
    async fn sweep_leaves_a_healthy_task_running() {
        let repo = Arc::new(InMemoryRepo::new());
        let mut task = sample_task("t1");
        task.status = TaskStatus::Running;
        task.last_heartbeat_at = Some(now_unix());
        repo.create(task).await.unwrap();
        let queue = Arc::new(TaskQueue::new());
        let hub = Arc::new(NotificationHub::new());
        let pool = WorkerPool::new(queue, Arc::clone(&repo), hub, WorkerBudget::default());

        pool.sweep_stuck_tasks().await;

        let unchanged = repo.get("t1").await.unwrap();
        assert_eq!(unchanged.status, TaskStatus::Running);
    }
}
