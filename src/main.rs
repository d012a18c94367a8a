//! Ibadah Sync Agent - offline-first sync for a shared worship tracker
//!
//! A local agent that keeps one device in step with the group's shared
//! document:
//! - Last-write-wins merge of per-user trackers by record timestamp
//! - Moderation status that a member's own sync can never overwrite
//! - Jittered read-modify-write retries for registration and profile edits
//! - Sled-backed local snapshot used whenever the remote is unreachable

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

mod config;
mod model;
mod mutation;
mod remote;
mod session;
mod storage;
mod sync;

use config::AppConfig;
use model::{Account, AccountStatus, DayEntry, ProfileUpdate, Tracker};
use mutation::{MutationError, Mutations, Registration, WriteOutcome, Written};
use remote::{MemoryRemoteStore, PostgrestRemoteStore, RemoteStore};
use session::{Session, SessionStore};
use storage::{Snapshot, SnapshotStore, StorageError, StorageResult};
use sync::{Connectivity, SyncEngine, SyncError, SyncReport, SyncScheduler, SyncState};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    /// What the UI currently holds
    session: Arc<SessionStore>,
    /// Background and on-demand sync
    scheduler: Arc<SyncScheduler>,
    /// Retrying write paths
    mutations: Mutations,
    /// No remote configured; the in-memory document stands in
    local_only: bool,
    /// Agent start time
    started_at: Instant,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn SnapshotStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> StorageResult<Self> {
        let local = Snapshot::new(store);
        let connectivity = Connectivity::new();

        let engine = Arc::new(SyncEngine::new(
            local.clone(),
            remote.clone(),
            connectivity.clone(),
            config.sync.client_id.clone(),
        ));
        let session = Arc::new(SessionStore::new(local.clone())?);
        let scheduler = Arc::new(SyncScheduler::new(
            engine,
            session.clone(),
            config.sync.interval,
        ));
        let mutations = Mutations::new(remote, local, connectivity)
            .with_backoff(config.base_backoff_ms, config.jitter_ms);

        Ok(Self {
            session,
            scheduler,
            mutations,
            local_only: config.is_local_only(),
            started_at: Instant::now(),
        })
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    sync_state: SyncState,
    online: bool,
    local_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    session: Session,
    last_sync: Option<SyncReport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeginSessionRequest {
    account: Account,
    tracker: Option<Tracker>,
    groups: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ActorRequest {
    actor: String,
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    actor: String,
    status: AccountStatus,
}

#[derive(Debug, Deserialize)]
struct GroupsRequest {
    actor: String,
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AssetRequest {
    actor: String,
    payload: String,
}

#[derive(Debug, Serialize)]
struct WriteResponse {
    offline: bool,
}

impl<T> From<&Written<T>> for WriteResponse {
    fn from(written: &Written<T>) -> Self {
        Self {
            offline: written.outcome == WriteOutcome::Offline,
        }
    }
}

/// An error rendered as `{"error": "..."}` with a status code
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<MutationError> for ApiError {
    fn from(e: MutationError) -> Self {
        let status = match &e {
            MutationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            MutationError::UsernameTaken(_) => StatusCode::CONFLICT,
            MutationError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            MutationError::Forbidden(_) => StatusCode::FORBIDDEN,
            MutationError::InvalidAsset(_) => StatusCode::UNPROCESSABLE_ENTITY,
            MutationError::RetriesExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            MutationError::Storage(_) => {
                error!("Local storage failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        error!("Local storage failure: {}", e);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        error!("Sync failure: {}", e);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.scheduler.engine();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        sync_state: engine.state(),
        online: engine.connectivity().is_online(),
        local_only: state.local_only,
    })
}

/// Current session and the outcome of the last sync
async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    Json(StateResponse {
        session: state.session.snapshot(),
        last_sync: state.session.last_report(),
    })
}

/// Log an account in on this device
async fn begin_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BeginSessionRequest>,
) -> ApiResult<Session> {
    info!("Session started for {}", payload.account.username);
    let session = state
        .session
        .begin(payload.account, payload.tracker, payload.groups)?;
    Ok(Json(session))
}

async fn end_session(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.end();
    StatusCode::NO_CONTENT
}

/// Edit one day of the logged-in user's tracker
async fn edit_day(
    State(state): State<Arc<AppState>>,
    Path(day): Path<u32>,
    Json(mut entry): Json<DayEntry>,
) -> ApiResult<Tracker> {
    if state.session.username().is_none() {
        return Err(ApiError::new(StatusCode::CONFLICT, "No active session"));
    }
    entry.day = day;
    let now_ms = chrono::Utc::now().timestamp_millis();

    match state.session.edit_day(entry, now_ms)? {
        Some(tracker) => Ok(Json(tracker)),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("Day {} is outside the tracker", day),
        )),
    }
}

/// Run a sync cycle now
async fn sync_now(State(state): State<Arc<AppState>>) -> ApiResult<SyncReport> {
    match state.scheduler.sync_now().await? {
        Some(report) => Ok(Json(report)),
        None => Err(ApiError::new(
            StatusCode::CONFLICT,
            "A sync cycle is already in progress",
        )),
    }
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Registration>,
) -> ApiResult<WriteResponse> {
    let written = state.mutations.register(payload).await?;
    Ok(Json(WriteResponse::from(&written)))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<WriteResponse> {
    let written = state.mutations.update_profile(&username, update).await?;
    state.session.refresh_account(std::slice::from_ref(&written.value));
    Ok(Json(WriteResponse::from(&written)))
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(payload): Json<ActorRequest>,
) -> ApiResult<WriteResponse> {
    let written = state
        .mutations
        .delete_account(&payload.actor, &username)
        .await?;
    if state.session.username().as_deref() == Some(username.as_str()) {
        state.session.end();
    }
    Ok(Json(WriteResponse::from(&written)))
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(payload): Json<StatusRequest>,
) -> ApiResult<WriteResponse> {
    let written = state
        .mutations
        .set_status(&payload.actor, &username, payload.status)
        .await?;
    state.session.refresh_account(std::slice::from_ref(&written.value));
    Ok(Json(WriteResponse::from(&written)))
}

async fn update_groups(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GroupsRequest>,
) -> ApiResult<WriteResponse> {
    let written = state
        .mutations
        .update_groups(&payload.actor, payload.groups)
        .await?;
    state.session.set_groups(written.value.clone())?;
    Ok(Json(WriteResponse::from(&written)))
}

async fn upload_asset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<AssetRequest>,
) -> ApiResult<WriteResponse> {
    let written = state
        .mutations
        .upload_asset(&payload.actor, &id, payload.payload)
        .await?;
    Ok(Json(WriteResponse::from(&written)))
}

async fn delete_asset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ActorRequest>,
) -> ApiResult<WriteResponse> {
    let written = state.mutations.delete_asset(&payload.actor, &id).await?;
    Ok(Json(WriteResponse::from(&written)))
}

/// Build the HTTP router
fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Session and sync
        .route("/api/state", get(get_state))
        .route("/api/session", post(begin_session).delete(end_session))
        .route("/api/session/days/:day", put(edit_day))
        .route("/api/sync", post(sync_now))
        // Accounts
        .route("/api/accounts", post(register))
        .route(
            "/api/accounts/:username",
            patch(update_profile).delete(delete_account),
        )
        .route("/api/accounts/:username/status", put(set_status))
        // Mentor-managed shared state
        .route("/api/groups", put(update_groups))
        .route("/api/assets/:id", put(upload_asset).delete(delete_asset))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ibadah_sync=info,tower_http=info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    info!("Opening local snapshot at: {}", config.storage.path);
    let store = config.storage.clone().open()?;

    let remote: Arc<dyn RemoteStore> = match &config.remote {
        Some(remote_config) => {
            let remote = PostgrestRemoteStore::new(remote_config.clone());
            info!("Remote document: {}", remote.describe());
            Arc::new(remote)
        }
        None => {
            warn!("SUPABASE_URL not configured - running in local-only mode");
            Arc::new(MemoryRemoteStore::new())
        }
    };

    // Create application state
    let state = Arc::new(AppState::new(&config, store, remote)?);

    // Start background sync
    let sync_task = state.scheduler.clone().start();

    let app = router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Ibadah sync agent v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Client id: {}", config.sync.client_id);
    info!("   Sync interval: {:?}", config.sync.interval);
    info!("   Listening on: http://{}", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Push anything still pending before exiting
    state.scheduler.shutdown();
    sync_task.await?;
    info!("Ibadah sync agent stopped");
    Ok(())
}
