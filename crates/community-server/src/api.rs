use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, Method, StatusCode},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use community_shared::{ChatId, RankId, UserId};
use community_store::{
    Chat, ChatSummary, Database, HeldRank, MessageWithSender, NewRank, NewUser, Rank, User,
    UserRank,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rank_engine::{ActivityOutcome, RankEngine};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::realtime;
use crate::registry::ConnectionRegistry;

/// The single store connection, shared by HTTP handlers and socket sessions.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Header carrying the caller's user id on user-facing routes.
const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDatabase,
    pub registry: ConnectionRegistry,
    pub rank_engine: Arc<RankEngine>,
    pub rate_limiter: RateLimiter,
    pub message_limiter: RateLimiter<UserId>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, rank_engine: RankEngine, config: ServerConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            registry: ConnectionRegistry::new(),
            rank_engine: Arc::new(rank_engine),
            rate_limiter: RateLimiter::new(config.http_rate, config.http_burst),
            message_limiter: RateLimiter::new(config.message_rate, config.message_burst),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(realtime::ws_handler))
        .route("/api/users", post(create_user))
        .route("/api/users/{id}", get(get_user))
        .route("/api/ranks", get(list_ranks))
        .route("/api/chats", get(list_chats).post(open_chat))
        .route("/api/chats/{chat_id}/messages", get(chat_history))
        .route("/api/admin/users/{id}/add-activity", post(admin_add_activity))
        .route("/api/admin/ranks", post(admin_create_rank))
        .route(
            "/api/admin/users/{id}/ranks",
            get(admin_list_user_ranks).post(admin_assign_rank),
        )
        .route(
            "/api/admin/users/{user_id}/ranks/{rank_id}",
            delete(admin_remove_rank),
        )
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Public routes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ServerError> {
    let Json(mut new) = payload?;
    new.username = new.username.trim().to_string();
    if new.username.is_empty() {
        return Err(ServerError::BadRequest("Username must not be empty".into()));
    }

    let user = state.db.lock().await.create_user(&new)?;
    info!(user = %user.id, username = %user.username, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ServerError> {
    Ok(Json(state.db.lock().await.get_user(UserId(id))?))
}

async fn list_ranks(State(state): State<AppState>) -> Result<Json<Vec<Rank>>, ServerError> {
    Ok(Json(state.db.lock().await.list_ranks()?))
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

fn header_user_id(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(UserId)
}

/// Resolve the calling user from the `x-user-id` header.
fn caller(headers: &HeaderMap, db: &Database) -> Result<UserId, ServerError> {
    let id = header_user_id(headers).ok_or_else(|| {
        ServerError::Unauthorized("Missing or invalid x-user-id header".into())
    })?;

    match db.get_user(id) {
        Ok(_) => Ok(id),
        Err(community_store::StoreError::NotFound) => {
            Err(ServerError::Unauthorized(format!("Unknown user {id}")))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenChatRequest {
    participant_id: UserId,
}

async fn open_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<OpenChatRequest>, JsonRejection>,
) -> Result<Json<Chat>, ServerError> {
    let db = state.db.lock().await;
    let me = caller(&headers, &db)?;
    let Json(req) = payload?;

    if req.participant_id == me {
        return Err(ServerError::BadRequest("Cannot open a chat with yourself".into()));
    }
    db.get_user(req.participant_id)?;

    Ok(Json(db.get_or_create_chat(me, req.participant_id)?))
}

async fn list_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatSummary>>, ServerError> {
    let db = state.db.lock().await;
    let me = caller(&headers, &db)?;
    Ok(Json(db.list_chats_for_user(me)?))
}

async fn chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<i64>,
) -> Result<Json<Vec<MessageWithSender>>, ServerError> {
    let db = state.db.lock().await;
    let me = caller(&headers, &db)?;

    let chat = db.get_chat(ChatId(chat_id))?;
    if !chat.has_participant(me) {
        return Err(ServerError::Forbidden(format!(
            "Not a participant of chat {chat_id}"
        )));
    }

    Ok(Json(db.fetch_chat_history(chat.id, me)?))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

/// A request that presented the admin bearer token.
///
/// Rejects with 403 when the token is wrong or the admin API is disabled.
/// The optional `x-user-id` header names the acting admin for audit columns.
pub struct AdminAuth {
    acting: Option<UserId>,
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected = state.config.admin_token.as_deref().ok_or_else(|| {
            ServerError::Forbidden("Admin API is disabled (no ADMIN_TOKEN configured)".into())
        })?;

        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default();

        if !tokens_match(presented, expected) {
            warn!(path = %parts.uri.path(), "Rejected admin request");
            return Err(ServerError::Forbidden("Invalid admin token".into()));
        }

        Ok(Self {
            acting: header_user_id(&parts.headers),
        })
    }
}

/// Constant-time for equal lengths; length itself is not secret.
fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

#[derive(Deserialize)]
struct AddActivityRequest {
    points: i64,
}

async fn admin_add_activity(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<i64>,
    payload: Result<Json<AddActivityRequest>, JsonRejection>,
) -> Result<Json<ActivityOutcome>, ServerError> {
    let Json(req) = payload?;

    let db = state.db.lock().await;
    let outcome = state
        .rank_engine
        .add_activity_points(&db, UserId(id), req.points)?;
    Ok(Json(outcome))
}

async fn admin_create_rank(
    State(state): State<AppState>,
    admin: AdminAuth,
    payload: Result<Json<NewRank>, JsonRejection>,
) -> Result<(StatusCode, Json<Rank>), ServerError> {
    let Json(new) = payload?;

    let db = state.db.lock().await;
    let rank = state.rank_engine.create_rank(&db, &new, admin.acting)?;
    Ok((StatusCode::CREATED, Json(rank)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignRankRequest {
    rank_id: RankId,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

async fn admin_assign_rank(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(id): Path<i64>,
    payload: Result<Json<AssignRankRequest>, JsonRejection>,
) -> Result<Json<UserRank>, ServerError> {
    let Json(req) = payload?;

    let db = state.db.lock().await;
    let assignment = state.rank_engine.assign_rank_to_user(
        &db,
        UserId(id),
        req.rank_id,
        admin.acting,
        req.is_active,
    )?;
    Ok(Json(assignment))
}

async fn admin_list_user_ranks(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<i64>,
) -> Result<Json<Vec<HeldRank>>, ServerError> {
    let db = state.db.lock().await;
    db.get_user(UserId(id))?;
    Ok(Json(db.list_user_ranks(UserId(id))?))
}

async fn admin_remove_rank(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path((user_id, rank_id)): Path<(i64, i64)>,
) -> Result<Json<User>, ServerError> {
    let db = state.db.lock().await;
    let user = state
        .rank_engine
        .remove_rank_from_user(&db, UserId(user_id), RankId(rank_id))?;
    Ok(Json(user))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
