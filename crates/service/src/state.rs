//! Shared server state threaded through every handler via axum's `State`
//! extractor. Grounded in the teacher's `ServerState` (service/src/main.rs) —
//! a small `Clone` struct of `Arc`s, no interior mutability beyond what the
//! wrapped types already provide.

use std::sync::Arc;

use helixagent_gateway::{ProviderRegistry, RequestPipeline, ScoreStore};
use helixagent_tasks::{NotificationHub, TaskQueue, TaskRepository, WorkerPool};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub pipeline: Arc<RequestPipeline>,
    pub scores: Arc<ScoreStore>,
    pub repository: Arc<dyn TaskRepository>,
    pub queue: Arc<TaskQueue>,
    pub pool: Arc<WorkerPool>,
    pub hub: Arc<NotificationHub>,
    pub auth_key: Option<String>,
}
