use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use helixagent_gateway::{ProviderRegistry, RequestPipeline, ScoreStore};
use helixagent_tasks::{InMemoryTaskRepository, NotificationHub, TaskQueue, WorkerBudget, WorkerPool};

mod chat;
mod errors;
mod executor;
mod lsp;
mod sse;
mod state;
mod tasks;
mod verifier;
mod webhooks;

use state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,
    /// Optional auth key required for requests (Bearer token)
    #[arg(long)]
    auth_key: Option<String>,
    /// Number of background-task workers to start
    #[arg(long, default_value_t = 2)]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("helixagent_service=info,tower_http=info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let args = Args::parse();

    info!(
        addr = %args.addr,
        auth = %args.auth_key.as_ref().map(|_| "enabled").unwrap_or("disabled"),
        workers = args.workers,
        "starting service"
    );

    let scores = Arc::new(ScoreStore::new());
    let registry = Arc::new(ProviderRegistry::new(scores.clone()));
    let pipeline = Arc::new(RequestPipeline::new(Arc::clone(&registry)));

    let repository: Arc<dyn helixagent_tasks::TaskRepository> = Arc::new(InMemoryTaskRepository::new());
    let queue = Arc::new(TaskQueue::new());
    let hub = Arc::new(NotificationHub::new());
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&queue),
        Arc::clone(&repository),
        Arc::clone(&hub),
        WorkerBudget::default(),
    ));
    pool.register_executor("echo", Arc::new(executor::EchoExecutor)).await;
    pool.scale(args.workers).await;
    pool.spawn_stuck_sweeper(Duration::from_secs(30)).await;

    let app_state = AppState {
        registry,
        pipeline,
        scores,
        repository,
        queue,
        pool,
        hub,
        auth_key: args.auth_key,
    };

    let app = Router::new()
        .route("/v1/models", get(chat::list_models))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/chat/completions/stream", post(chat::chat_completions_stream))
        .route("/v1/completions", post(chat::legacy_completions))
        .route("/v1/lsp/servers", get(lsp::list_servers))
        .route("/v1/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .route("/v1/tasks/queue/stats", get(tasks::queue_stats))
        .route("/v1/tasks/:id", get(tasks::get_task).delete(tasks::delete_task))
        .route("/v1/tasks/:id/status", get(tasks::get_task_status))
        .route("/v1/tasks/:id/logs", get(tasks::get_task_logs))
        .route("/v1/tasks/:id/resources", get(tasks::get_task_resources))
        .route("/v1/tasks/:id/analyze", get(tasks::analyze_task))
        .route("/v1/tasks/:id/poll", get(tasks::poll_task))
        .route("/v1/tasks/:id/events", get(tasks::task_events))
        .route("/v1/tasks/:id/pause", post(tasks::pause_task))
        .route("/v1/tasks/:id/resume", post(tasks::resume_task))
        .route("/v1/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/v1/tasks/:id/webhooks", get(webhooks::list_webhooks))
        .route("/v1/tasks/:id/webhooks/:webhook_id", delete(webhooks::delete_webhook))
        .route("/v1/webhooks", post(webhooks::register_webhook))
        .route("/api/v1/verifier/scores/batch", post(verifier::batch_scores))
        .route("/api/v1/verifier/scores/compare", get(verifier::compare_scores))
        .route("/api/v1/verifier/scores/top", get(verifier::top_scores))
        .route("/api/v1/verifier/scores/range", get(verifier::range_scores))
        .route(
            "/api/v1/verifier/scores/weights",
            get(verifier::get_weights).put(verifier::set_weights),
        )
        .route("/api/v1/verifier/scores/cache/invalidate", post(verifier::invalidate_cache))
        .route("/api/v1/verifier/scores/:model_id", get(verifier::get_score))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Bearer-token gate, active only when `--auth-key` is set. Runs ahead of
/// every handler via `middleware::from_fn_with_state`.
async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(key) = &state.auth_key else {
        return Ok(next.run(request).await);
    };

    let auth_header = headers.get("Authorization").ok_or(StatusCode::UNAUTHORIZED)?;
    let auth_str = auth_header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
    if !auth_str.starts_with("Bearer ") || &auth_str[7..] != key {
        warn!("unauthorized request");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}
