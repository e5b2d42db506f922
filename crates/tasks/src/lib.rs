//! Background-task subsystem: queueing, worker scheduling, heartbeat/stuck
//! detection and event notifications for long-running analytical jobs.

pub mod error;
pub mod model;
pub mod notify;
pub mod pool;
pub mod queue;
pub mod repository;
pub mod resource;
pub mod stuck;

pub use error::TaskError;
pub use model::{
    BackgroundTask, PollingCursor, Priority, ResourceSnapshot, TaskConfig, TaskExecutionHistory,
    TaskStatus, WebhookRegistration,
};
pub use notify::{NotificationHub, PollingStore, TaskEvent, TaskEventKind, WebhookSender};
pub use pool::{ExecOutcome, ProgressReporter, TaskExecutor, WorkerBudget, WorkerPool};
pub use queue::TaskQueue;
pub use repository::{InMemoryTaskRepository, TaskRepository};
pub use resource::{RawSample, ResourceMonitor, ResourceSampler};
pub use stuck::{evaluate as evaluate_stuck, StuckReason};
