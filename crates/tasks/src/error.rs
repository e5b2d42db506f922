//! Structured error type for the task subsystem. Grounded in the teacher's
//! `AgentError` (thiserror enum, one variant per failure mode, `From` impls
//! at the boundaries) in `crates/agent/src/error.rs`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("illegal transition: {from:?} -> {to:?} for task {task_id}")]
    IllegalTransition {
        task_id: String,
        from: crate::model::TaskStatus,
        to: crate::model::TaskStatus,
    },

    #[error("task {0} is not in a terminal state")]
    NotTerminal(String),

    #[error("queue is shut down")]
    QueueClosed,

    #[error("notification store unavailable")]
    PollingStoreUnavailable,

    #[error("webhook signing failed: {0}")]
    WebhookSigning(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    pub fn status_code(&self) -> u16 {
        match self {
            TaskError::NotFound(_) => 404,
            TaskError::IllegalTransition { .. } | TaskError::NotTerminal(_) => 400,
            TaskError::QueueClosed | TaskError::PollingStoreUnavailable => 503,
            TaskError::WebhookSigning(_) | TaskError::Repository(_) | TaskError::Internal(_) => 500,
        }
    }
}
