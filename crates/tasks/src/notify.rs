//! Notification Hub: fans out task events to SSE/WebSocket subscribers, the
//! Polling Store, and the webhook dispatch queue. Grounded directly in the
//! teacher's `EventBus` (`crates/agent/src/event_bus.rs`): a bounded
//! `tokio::sync::broadcast` channel for live subscribers plus a `JoinSet` of
//! spawned dispatch tasks so a slow observer never blocks the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::model::{PollingCursor, TaskStatus, WebhookRegistration};

const EVENT_BUS_BUFFER: usize = 1024;
/// Per-subscriber bounded buffer; overflow drops the oldest event and bumps
/// a per-subscriber drop counter rather than blocking the publisher.
const SUBSCRIBER_BUFFER: usize = 256;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone)]
pub enum TaskEventKind {
    StatusChanged { status: TaskStatus },
    Progress { progress: u8, message: String },
    Log { line: String },
    Completed,
    Failed { error: String },
    Cancelled,
}

impl TaskEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEventKind::StatusChanged { .. } => "status_changed",
            TaskEventKind::Progress { .. } => "progress",
            TaskEventKind::Log { .. } => "log",
            TaskEventKind::Completed => "completed",
            TaskEventKind::Failed { .. } => "failed",
            TaskEventKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub seq: u64,
    pub task_id: String,
    pub kind: TaskEventKind,
    pub created_at: u64,
}

/// Trait a webhook HTTP dispatcher implements; kept external so this crate
/// never depends on a concrete HTTP client.
#[async_trait::async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, headers: &HashMap<String, String>, body: &[u8]) -> Result<(), String>;
}

/// Appends events per-task in monotonic order; `poll_events` never returns a
/// `next_cursor` less than or equal to any returned event's sequence.
#[derive(Default)]
struct PollingStoreState {
    events: HashMap<String, Vec<TaskEvent>>,
}

pub struct PollingStore {
    state: Mutex<PollingStoreState>,
}

impl Default for PollingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PollingStoreState::default()),
        }
    }

    fn append(&self, event: TaskEvent) {
        self.state
            .lock()
            .events
            .entry(event.task_id.clone())
            .or_default()
            .push(event);
    }

    /// `PollEvents(task_id, cursor) → (events[], next_cursor)`.
    pub fn poll_events(&self, task_id: &str, cursor: PollingCursor) -> (Vec<TaskEvent>, PollingCursor) {
        let state = self.state.lock();
        let events: Vec<TaskEvent> = state
            .events
            .get(task_id)
            .into_iter()
            .flatten()
            .filter(|e| e.seq > cursor.last_event_seq)
            .cloned()
            .collect();
        let next_cursor = events
            .iter()
            .map(|e| e.seq)
            .max()
            .map(|seq| PollingCursor { last_event_seq: seq })
            .unwrap_or(cursor);
        (events, next_cursor)
    }
}

struct WebhookRetryState {
    attempt: u32,
}

pub struct NotificationHub {
    sender: broadcast::Sender<TaskEvent>,
    sequence: AtomicU64,
    polling_store: Arc<PollingStore>,
    webhooks: Mutex<HashMap<String, Vec<WebhookRegistration>>>,
    dispatch_tasks: Mutex<JoinSet<()>>,
    sse_drop_counts: Mutex<HashMap<u64, u64>>,
    webhook_sender: Mutex<Option<Arc<dyn WebhookSender>>>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_BUFFER);
        Self {
            sender,
            sequence: AtomicU64::new(1),
            polling_store: Arc::new(PollingStore::new()),
            webhooks: Mutex::new(HashMap::new()),
            dispatch_tasks: Mutex::new(JoinSet::new()),
            sse_drop_counts: Mutex::new(HashMap::new()),
            webhook_sender: Mutex::new(None),
        }
    }

    pub fn set_webhook_sender(&self, sender: Arc<dyn WebhookSender>) {
        *self.webhook_sender.lock() = Some(sender);
    }

    pub fn polling_store(&self) -> Arc<PollingStore> {
        Arc::clone(&self.polling_store)
    }

    /// Subscribes to the live SSE/WebSocket event stream. Buffer overflow
    /// (`RecvError::Lagged`) is the caller's signal that events were dropped;
    /// bounded by `SUBSCRIBER_BUFFER` worth of backlog via the shared channel
    /// capacity.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn register_webhook(&self, hook: WebhookRegistration) {
        self.webhooks
            .lock()
            .entry(hook.task_id.clone())
            .or_default()
            .push(hook);
    }

    pub fn unregister_webhook(&self, task_id: &str, webhook_id: &str) {
        if let Some(hooks) = self.webhooks.lock().get_mut(task_id) {
            hooks.retain(|h| h.id != webhook_id);
        }
    }

    /// Publishes an event to the SSE/WebSocket channel, the Polling Store,
    /// and the webhook dispatch queue. Never blocks: dispatch work is handed
    /// to a spawned task on a `JoinSet`, mirroring the teacher's event bus.
    pub async fn publish(&self, task_id: &str, kind: TaskEventKind) {
        let event = TaskEvent {
            seq: self.sequence.fetch_add(1, Ordering::Relaxed),
            task_id: task_id.to_string(),
            kind,
            created_at: now_unix(),
        };

        // SSE/WS fan-out: a full channel (no live receivers, or a lagging
        // one) never blocks `send` — `broadcast::Sender::send` only errors
        // when there are zero receivers, which we deliberately ignore.
        let _ = self.sender.send(event.clone());

        self.polling_store.append(event.clone());

        let hooks = self
            .webhooks
            .lock()
            .get(task_id)
            .cloned()
            .unwrap_or_default();
        if hooks.is_empty() {
            return;
        }
        let Some(sender) = self.webhook_sender.lock().clone() else {
            return;
        };

        let mut tasks = self.dispatch_tasks.lock();
        for hook in hooks {
            if !hook.events_subscribed.is_empty() && !hook.events_subscribed.contains(&event.kind.name().to_string()) {
                continue;
            }
            let sender = Arc::clone(&sender);
            let event = event.clone();
            tasks.spawn(async move {
                dispatch_webhook_with_retry(sender, hook, event).await;
            });
        }
    }
}

/// HMAC-SHA256 signature over the JSON body, hex-encoded, using the
/// registration's secret.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> Result<String, String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| e.to_string())?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

async fn dispatch_webhook_with_retry(sender: Arc<dyn WebhookSender>, hook: WebhookRegistration, event: TaskEvent) {
    let body = serde_json::json!({
        "task_id": event.task_id,
        "event": event.kind.name(),
        "seq": event.seq,
        "created_at": event.created_at,
    });
    let body_bytes = serde_json::to_vec(&body).unwrap_or_default();

    let signature = match sign_webhook_body(&hook.secret, &body_bytes) {
        Ok(sig) => sig,
        Err(e) => {
            log::error!("webhook signing failed for {}: {e}", hook.id);
            return;
        }
    };

    // Registration headers are merged last but never override the
    // signature/content-type headers the hub itself sets.
    let mut headers = hook.headers.clone();
    headers.insert("content-type".to_string(), "application/json".to_string());
    headers.insert("x-helixagent-signature".to_string(), format!("sha256={signature}"));

    const MAX_ATTEMPTS: u32 = 5;
    let mut state = WebhookRetryState { attempt: 0 };
    loop {
        state.attempt += 1;
        match sender.send(&hook.url, &headers, &body_bytes).await {
            Ok(()) => return,
            Err(e) => {
                if state.attempt >= MAX_ATTEMPTS {
                    log::error!("webhook {} to {} failed after {} attempts: {e}", hook.id, hook.url, state.attempt);
                    return;
                }
                let backoff = Duration::from_millis(200u64.saturating_mul(1 << state.attempt.min(10)));
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_visible_to_subscriber() {
        let hub = NotificationHub::new();
        let mut rx = hub.subscribe();
        hub.publish("task-1", TaskEventKind::Completed).await;
        let event = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(event.task_id, "task-1");
        assert_eq!(event.kind.name(), "completed");
    }

    #[tokio::test]
    async fn polling_store_cursor_is_monotonic() {
        let hub = NotificationHub::new();
        hub.publish("task-1", TaskEventKind::Progress { progress: 10, message: "a".into() }).await;
        hub.publish("task-1", TaskEventKind::Progress { progress: 20, message: "b".into() }).await;

        let store = hub.polling_store();
        let (events, cursor) = store.poll_events("task-1", PollingCursor::START);
        assert_eq!(events.len(), 2);
        assert!(cursor.last_event_seq > events[0].seq.max(events[1].seq) - 1);
        assert!(events.iter().all(|e| e.seq <= cursor.last_event_seq));

        let (more, _) = store.poll_events("task-1", cursor);
        assert!(more.is_empty());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let hub = NotificationHub::new();
        hub.publish("task-1", TaskEventKind::Cancelled).await;
    }

    #[test]
    fn hmac_signature_is_deterministic() {
        let sig1 = sign_webhook_body("secret", b"{\"a\":1}").unwrap();
        let sig2 = sign_webhook_body("secret", b"{\"a\":1}").unwrap();
        assert_eq!(sig1, sig2);
        let sig3 = sign_webhook_body("other-secret", b"{\"a\":1}").unwrap();
        assert_ne!(sig1, sig3);
    }

    struct CapturingSender {
        captured: Arc<Mutex<Option<HashMap<String, String>>>>,
    }

    #[async_trait::async_trait]
    impl WebhookSender for CapturingSender {
        async fn send(&self, _url: &str, headers: &HashMap<String, String>, _body: &[u8]) -> Result<(), String> {
            *self.captured.lock() = Some(headers.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn headers_cannot_override_signature_or_content_type() {
        let captured = Arc::new(Mutex::new(None));
        let hub = NotificationHub::new();
        hub.set_webhook_sender(Arc::new(CapturingSender { captured: Arc::clone(&captured) }));
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        headers.insert("x-helixagent-signature".to_string(), "forged".to_string());
        hub.register_webhook(WebhookRegistration {
            id: "hook-1".into(),
            task_id: "task-1".into(),
            url: "http://example.invalid/hook".into(),
            secret: "shh".into(),
            events_subscribed: vec![],
            headers,
        });

        hub.publish("task-1", TaskEventKind::Completed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent_headers = captured.lock().clone().expect("dispatch ran");
        assert_eq!(sent_headers.get("content-type").unwrap(), "application/json");
        assert_ne!(sent_headers.get("x-helixagent-signature").unwrap(), "forged");
    }
}
