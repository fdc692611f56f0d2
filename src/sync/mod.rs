//! Client-side entity cache and mutation queue.
//!
//! The engine keeps a per-entity cache of server state, applies mutations to
//! it optimistically, and queues the corresponding server calls. A single
//! pass drains the queue at a time; failed operations are retried a bounded
//! number of times and then surfaced as alerts. Server responses are
//! reconciled back into the cache so the optimistic state converges on the
//! server's truth.

use chrono::{DateTime, Utc};
use log::warn;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::models::{CommentView, FindView, FriendshipView, LikeState, UserSummary};

/// How often the pump looks for queued work.
const PUMP_INTERVAL: Duration = Duration::from_millis(100);
/// Pause after a pass, giving the server room between bursts.
const PASS_BACKOFF: Duration = Duration::from_secs(1);
/// Retries after the first attempt, so four attempts in total.
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Find,
    User,
    Friendship,
}

pub type EntityKey = (EntityType, String);

/// Cached server data, tagged by entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Find(FindView),
    User(UserSummary),
    Friendship(FriendshipView),
}

/// Cache slot for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub data: Option<EntityData>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl EntityState {
    fn with_data(data: EntityData) -> Self {
        Self {
            data: Some(data),
            is_loading: false,
            error: None,
            last_updated: Utc::now(),
        }
    }
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Mutation payload, tagged by what it mutates.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationData {
    Like { is_liked: bool },
    Comment { content: String },
}

impl OperationData {
    /// Discriminant used for queue deduplication.
    fn action(&self) -> &'static str {
        match self {
            OperationData::Like { .. } => "like",
            OperationData::Comment { .. } => "comment",
        }
    }
}

/// Identity of a queued operation. Two operations with the same key are the
/// same intent; the later one is dropped.
pub type OperationKey = (EntityType, String, OperationKind, &'static str);

#[derive(Debug, Clone)]
pub struct QueuedOperation {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub kind: OperationKind,
    pub data: OperationData,
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    fn key(&self) -> OperationKey {
        (
            self.entity_type,
            self.entity_id.clone(),
            self.kind,
            self.data.action(),
        )
    }
}

/// Surfaced when an operation exhausts its retries.
#[derive(Debug, Clone)]
pub struct SyncAlert {
    pub entity_id: String,
    pub message: String,
}

#[derive(Debug)]
pub enum TransportError {
    Network(String),
    Status(u16, String),
    Decode(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Network(msg) => write!(f, "network error: {}", msg),
            TransportError::Status(code, msg) => write!(f, "server returned {}: {}", code, msg),
            TransportError::Decode(msg) => write!(f, "bad response: {}", msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
}

/// Single place that decides how a transport failure is handled. Every
/// failure is currently treated the same way and retried, including ones a
/// retry cannot fix, such as a conflict from a like that already exists on
/// the server. Those burn their retries and end in an alert.
fn classify_failure(_error: &TransportError) -> FailureClass {
    FailureClass::Retryable
}

/// Server calls the engine makes on behalf of queued operations.
pub trait SyncTransport: Send + Sync + 'static {
    fn set_like(
        &self,
        find_id: &str,
        is_liked: bool,
    ) -> impl Future<Output = Result<LikeState, TransportError>> + Send;

    fn create_comment(
        &self,
        find_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<CommentView, TransportError>> + Send;
}

struct EngineState {
    entities: HashMap<EntityKey, EntityState>,
    queue: Vec<QueuedOperation>,
    pass_running: bool,
}

/// The sync engine. Shared via Arc; all state lives behind one mutex which
/// is never held across an await.
pub struct SyncEngine<T: SyncTransport> {
    transport: T,
    state: Mutex<EngineState>,
    snapshot_tx: watch::Sender<HashMap<EntityKey, EntityState>>,
    alert_tx: broadcast::Sender<SyncAlert>,
}

impl<T: SyncTransport> SyncEngine<T> {
    pub fn new(transport: T) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(HashMap::new());
        let (alert_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            transport,
            state: Mutex::new(EngineState {
                entities: HashMap::new(),
                queue: Vec::new(),
                pass_running: false,
            }),
            snapshot_tx,
            alert_tx,
        })
    }

    /// Watch the entity cache. The receiver sees a full snapshot after every
    /// change.
    pub fn subscribe(&self) -> watch::Receiver<HashMap<EntityKey, EntityState>> {
        self.snapshot_tx.subscribe()
    }

    /// Receive alerts for operations that gave up.
    pub fn alerts(&self) -> broadcast::Receiver<SyncAlert> {
        self.alert_tx.subscribe()
    }

    fn publish(&self, state: &EngineState) {
        let _ = self.snapshot_tx.send(state.entities.clone());
    }

    /// Snapshot of one entity's cache slot; unknown entities resolve to the
    /// default (no data, not loading, no error).
    pub fn get_entity(&self, entity_type: EntityType, id: &str) -> EntityState {
        let state = self.state.lock().unwrap();
        state
            .entities
            .get(&(entity_type, id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_entity(&self, entity_type: EntityType, id: &str, data: EntityData) {
        let mut state = self.state.lock().unwrap();
        state
            .entities
            .insert((entity_type, id.to_string()), EntityState::with_data(data));
        self.publish(&state);
    }

    pub fn set_loading(&self, entity_type: EntityType, id: &str, loading: bool) {
        let mut state = self.state.lock().unwrap();
        let slot = state
            .entities
            .entry((entity_type, id.to_string()))
            .or_insert_with(|| EntityState {
                data: None,
                is_loading: false,
                error: None,
                last_updated: Utc::now(),
            });
        slot.is_loading = loading;
        self.publish(&state);
    }

    pub fn set_error(&self, entity_type: EntityType, id: &str, error: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.entities.get_mut(&(entity_type, id.to_string())) {
            slot.error = Some(error.into());
            slot.is_loading = false;
        }
        self.publish(&state);
    }

    /// Seed the cache with a page of finds, typically a feed response.
    pub fn initialize_finds(&self, finds: Vec<FindView>) {
        let mut state = self.state.lock().unwrap();
        for find in finds {
            state.entities.insert(
                (EntityType::Find, find.id.clone()),
                EntityState::with_data(EntityData::Find(find)),
            );
        }
        self.publish(&state);
    }

    /// Number of operations waiting to be sent.
    pub fn pending_operations(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Queue a mutation. An operation with the same identity already in the
    /// queue wins; the new one is silently dropped.
    pub fn queue_operation(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        kind: OperationKind,
        data: OperationData,
    ) {
        let mut state = self.state.lock().unwrap();
        let op = QueuedOperation {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type,
            entity_id: entity_id.to_string(),
            kind,
            data,
            retry_count: 0,
            max_retries: MAX_RETRIES,
            enqueued_at: Utc::now(),
        };
        if state.queue.iter().any(|queued| queued.key() == op.key()) {
            return;
        }
        if let Some(slot) = state.entities.get_mut(&(entity_type, entity_id.to_string())) {
            slot.is_loading = true;
        }
        state.queue.push(op);
        self.publish(&state);
    }

    /// Flip the viewer's like on a cached find, adjusting the count, and
    /// queue the server call. Unknown finds are ignored; there is no cached
    /// state to flip and nothing sensible to send.
    pub fn toggle_like(&self, find_id: &str) {
        let is_liked = {
            let mut state = self.state.lock().unwrap();
            let key = (EntityType::Find, find_id.to_string());
            let Some(EntityState {
                data: Some(EntityData::Find(view)),
                last_updated,
                ..
            }) = state.entities.get_mut(&key)
            else {
                warn!("toggle_like on uncached find {}, ignoring", find_id);
                return;
            };
            view.is_liked_by_user = !view.is_liked_by_user;
            view.like_count += if view.is_liked_by_user { 1 } else { -1 };
            *last_updated = Utc::now();
            let is_liked = view.is_liked_by_user;
            self.publish(&state);
            is_liked
        };
        self.queue_operation(
            EntityType::Find,
            find_id,
            OperationKind::Update,
            OperationData::Like { is_liked },
        );
    }

    /// Queue a comment on a find.
    pub fn add_comment(&self, find_id: &str, content: impl Into<String>) {
        self.queue_operation(
            EntityType::Find,
            find_id,
            OperationKind::Create,
            OperationData::Comment {
                content: content.into(),
            },
        );
    }

    /// Run one pass over the queue. Only one pass runs at a time; a call
    /// that finds a pass already running returns immediately. Each queued
    /// operation gets exactly one attempt per pass. Operations stay in the
    /// queue while their attempt is in flight, so a duplicate enqueued
    /// mid-pass is still deduplicated; they leave the queue on success or
    /// when the retry budget runs out. The state lock is released around
    /// every server call.
    pub async fn process_queue(&self) {
        let batch = {
            let mut state = self.state.lock().unwrap();
            if state.pass_running || state.queue.is_empty() {
                return;
            }
            state.pass_running = true;
            state.queue.clone()
        };

        for op in batch {
            match self.execute(&op).await {
                Ok(()) => {
                    let mut state = self.state.lock().unwrap();
                    state.queue.retain(|queued| queued.id != op.id);
                }
                Err(error) => {
                    let FailureClass::Retryable = classify_failure(&error);
                    self.handle_failure(&op, &error);
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        state.pass_running = false;
        self.publish(&state);
    }

    async fn execute(&self, op: &QueuedOperation) -> Result<(), TransportError> {
        match &op.data {
            OperationData::Like { is_liked } => {
                let outcome = self.transport.set_like(&op.entity_id, *is_liked).await?;
                self.reconcile_like(&op.entity_id, outcome);
                Ok(())
            }
            OperationData::Comment { content } => {
                let comment = self
                    .transport
                    .create_comment(&op.entity_id, content)
                    .await?;
                self.reconcile_comment(&comment);
                Ok(())
            }
        }
    }

    /// Patch the cached find with the server's like state. Only the like
    /// fields are touched; the rest of the cached view is left alone.
    fn reconcile_like(&self, find_id: &str, outcome: LikeState) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state
            .entities
            .get_mut(&(EntityType::Find, find_id.to_string()))
        {
            if let Some(EntityData::Find(view)) = slot.data.as_mut() {
                view.is_liked_by_user = outcome.is_liked;
                view.like_count = outcome.like_count;
            }
            slot.is_loading = false;
            slot.error = None;
            slot.last_updated = Utc::now();
        }
        self.publish(&state);
    }

    fn reconcile_comment(&self, comment: &CommentView) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state
            .entities
            .get_mut(&(EntityType::Find, comment.find_id.clone()))
        {
            if let Some(EntityData::Find(view)) = slot.data.as_mut() {
                if let Some(count) = view.comment_count.as_mut() {
                    *count += 1;
                }
            }
            slot.is_loading = false;
            slot.error = None;
            slot.last_updated = Utc::now();
        }
        self.publish(&state);
    }

    fn handle_failure(&self, op: &QueuedOperation, error: &TransportError) {
        let attempts = {
            let mut state = self.state.lock().unwrap();
            let Some(pos) = state.queue.iter().position(|queued| queued.id == op.id) else {
                return;
            };
            let queued = &mut state.queue[pos];
            queued.retry_count += 1;
            if queued.retry_count <= queued.max_retries {
                return;
            }
            let attempts = queued.retry_count;
            state.queue.remove(pos);
            attempts
        };

        warn!(
            "Giving up on {} for {} after {} attempts: {}",
            op.data.action(),
            op.entity_id,
            attempts,
            error
        );
        let message = format!("Failed to sync {}. Please try again.", op.data.action());
        {
            let mut state = self.state.lock().unwrap();
            if let Some(slot) = state
                .entities
                .get_mut(&(op.entity_type, op.entity_id.clone()))
            {
                slot.error = Some(message.clone());
                slot.is_loading = false;
            }
            self.publish(&state);
        }
        let _ = self.alert_tx.send(SyncAlert {
            entity_id: op.entity_id.clone(),
            message,
        });
    }

    /// Drive the queue in the background. Idle polls are cheap; after a
    /// pass the pump backs off before looking again.
    pub fn spawn_pump(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if engine.pending_operations() > 0 {
                    engine.process_queue().await;
                }
                // retries left in the queue wait out the longer interval
                let interval = if engine.pending_operations() > 0 {
                    PASS_BACKOFF
                } else {
                    PUMP_INTERVAL
                };
                tokio::time::sleep(interval).await;
            }
        })
    }
}

/// Talks to the HTTP API with a bearer token.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    async fn decode<D: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<D, TransportError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16(), body));
        }
        #[derive(serde::Deserialize)]
        struct Envelope<D> {
            data: Option<D>,
            error: Option<String>,
        }
        let envelope: Envelope<D> =
            serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))?;
        envelope
            .data
            .ok_or_else(|| TransportError::Decode(envelope.error.unwrap_or_default()))
    }
}

impl SyncTransport for HttpTransport {
    fn set_like(
        &self,
        find_id: &str,
        is_liked: bool,
    ) -> impl Future<Output = Result<LikeState, TransportError>> + Send {
        let url = format!("{}/api/finds/{}/like", self.base_url, find_id);
        async move {
            let request = if is_liked {
                self.client.post(&url)
            } else {
                self.client.delete(&url)
            };
            let response = request
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;
            Self::decode(response).await
        }
    }

    fn create_comment(
        &self,
        find_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<CommentView, TransportError>> + Send {
        let url = format!("{}/api/finds/{}/comments", self.base_url, find_id);
        let body = serde_json::json!({ "content": content });
        async move {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;
            Self::decode(response).await
        }
    }
}
