//! Background task data model. Grounded in the teacher's task/event shape in
//! `crates/agent/src/events.rs` (status enums, append-only event log) adapted
//! from session-lifecycle events to a persisted, queryable task record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Dead,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Dead
        )
    }

    /// Whether `self → next` is a legal transition per the status graph.
    /// `allow_pause`/`allow_cancel` gate the two conditional edges out of
    /// `Running`; `retry_count < max_retries` gates `Failed → Running`.
    pub fn can_transition_to(
        &self,
        next: TaskStatus,
        allow_pause: bool,
        allow_cancel: bool,
        retry_count: u32,
        max_retries: u32,
        endless: bool,
    ) -> bool {
        use TaskStatus::*;
        match (*self, next) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Paused) => allow_pause,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Running, Cancelled) => allow_cancel,
            (Paused, Running) | (Paused, Cancelled) => true,
            (Failed, Running) => endless || retry_count < max_retries,
            (Failed, Dead) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Dequeue order: critical first, then high, normal, low.
    pub const DEQUEUE_ORDER: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub timeout_s: u64,
    pub max_retries: u32,
    pub retry_delay_s: u64,
    #[serde(default)]
    pub endless: bool,
    #[serde(default)]
    pub allow_pause: bool,
    #[serde(default = "default_allow_cancel")]
    pub allow_cancel: bool,
    pub stuck_threshold_s: u64,
    pub heartbeat_interval_s: u64,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_allow_cancel() -> bool {
    true
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            timeout_s: 3600,
            max_retries: 3,
            retry_delay_s: 30,
            endless: false,
            allow_pause: false,
            allow_cancel: true,
            stuck_threshold_s: 120,
            heartbeat_interval_s: 15,
            tags: Vec::new(),
        }
    }
}

/// `{id, task_type, task_name, status, priority, progress, ...}` per the data
/// model. `completed_at` is set iff the status is terminal-with-outcome
/// (`completed`/`failed`/`cancelled`, not `dead`); `worker_id` is set iff
/// running or paused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: String,
    pub task_type: String,
    pub task_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    pub scheduled_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub config: TaskConfig,
    pub required_cpu_cores: f64,
    pub required_memory_mb: u64,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<u64>,
}

impl BackgroundTask {
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        task_name: impl Into<String>,
        priority: Priority,
        config: TaskConfig,
        payload: serde_json::Value,
        scheduled_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            task_name: task_name.into(),
            correlation_id: None,
            parent_task_id: None,
            status: TaskStatus::Pending,
            priority,
            progress: 0,
            progress_message: None,
            worker_id: None,
            process_pid: None,
            started_at: None,
            completed_at: None,
            scheduled_at,
            deadline: None,
            retry_count: 0,
            max_retries: config.max_retries,
            last_error: None,
            config,
            required_cpu_cores: 1.0,
            required_memory_mb: 256,
            payload,
            last_heartbeat_at: None,
        }
    }

    pub fn fits_budget(&self, max_cpu_cores: f64, max_memory_mb: u64) -> bool {
        self.required_cpu_cores <= max_cpu_cores && self.required_memory_mb <= max_memory_mb
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub task_id: String,
    pub cpu_percent: f64,
    pub memory_rss_bytes: u64,
    pub memory_percent: f64,
    pub sampled_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionHistory {
    pub task_id: String,
    pub event_type: String,
    pub event_data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub id: String,
    pub task_id: String,
    pub url: String,
    pub secret: String,
    pub events_subscribed: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Opaque `(task_id, last_event_seq)` cursor; monotonic per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingCursor {
    pub last_event_seq: u64,
}

impl PollingCursor {
    pub const START: PollingCursor = PollingCursor { last_event_seq: 0 };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_may_go_to_running_or_cancelled_only() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running, false, false, 0, 3, false));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled, false, false, 0, 3, false));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed, false, false, 0, 3, false));
    }

    #[test]
    fn running_to_paused_requires_allow_pause() {
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Paused, false, true, 0, 3, false));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Paused, true, true, 0, 3, false));
    }

    #[test]
    fn running_to_cancelled_requires_allow_cancel() {
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Cancelled, true, false, 0, 3, false));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Cancelled, true, true, 0, 3, false));
    }

    #[test]
    fn failed_to_running_requires_retries_remaining() {
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Running, false, false, 1, 3, false));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Running, false, false, 3, 3, false));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Running, false, false, 999, 3, true));
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        for terminal in [TaskStatus::Completed, TaskStatus::Cancelled, TaskStatus::Dead] {
            assert!(!terminal.can_transition_to(TaskStatus::Running, true, true, 0, 3, false));
        }
    }

    #[test]
    fn dequeue_order_is_priority_descending() {
        assert_eq!(
            Priority::DEQUEUE_ORDER,
            [Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
        );
    }
}
