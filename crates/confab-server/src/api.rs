use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::Method,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use confab_call::{CallCoordinator, CallSnapshot};
use confab_chat::ChatService;
use confab_shared::protocol::{
    CreateRoomRequest, DeclineCallRequest, EditMessageRequest, HistoryQuery, MarkReadRequest,
    PlaceCallRequest, PrivateMessageRequest, SendMessageRequest, ToggleReactionRequest,
};
use confab_shared::{CallId, MessageId, RoomId, UserId};
use confab_store::{CallRecord, ChatRoom, Message, MessageCursor, MessagePage, ReactionSummary};

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<Mutex<ChatService>>,
    pub calls: Arc<CallCoordinator>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/rooms", post(create_room))
        .route("/rooms/{id}", get(get_room))
        .route("/rooms/{id}/messages", post(send_message))
        .route("/rooms/{id}/messages", get(chat_history))
        .route("/messages/private", post(send_private_message))
        .route("/messages/{id}", get(get_message))
        .route("/messages/{id}", put(edit_message))
        .route("/messages/{id}", delete(delete_message))
        .route("/messages/{id}/read", post(mark_read))
        .route("/reactions/toggle", post(toggle_reaction))
        .route("/users/{id}/rooms", get(rooms_for_user))
        .route("/users/{id}/calls", get(calls_for_user))
        .route("/calls", post(place_call))
        .route("/calls/{id}", get(call_snapshot))
        .route("/calls/{id}/accept", post(accept_call))
        .route("/calls/{id}/decline", post(decline_call))
        .route("/calls/{id}/end", post(end_call))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    ring_timeout_secs: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        ring_timeout_secs: state.config.ring_timeout_secs,
    })
}

// ---------------------------------------------------------------------------
// Rooms and messages
// ---------------------------------------------------------------------------

async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<ChatRoom>, ServerError> {
    let room = state
        .chat
        .lock()
        .await
        .create_room(req.participants, req.is_group, req.name, req.is_secret)?;
    Ok(Json(room))
}

async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<RoomId>,
) -> Result<Json<ChatRoom>, ServerError> {
    Ok(Json(state.chat.lock().await.get_room(id)?))
}

async fn rooms_for_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<Vec<ChatRoom>>, ServerError> {
    Ok(Json(state.chat.lock().await.rooms_for_user(id)?))
}

async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    if req.room_id != room_id {
        return Err(ServerError::BadRequest(
            "Room id in path and body disagree".to_string(),
        ));
    }
    let message = state
        .chat
        .lock()
        .await
        .send_message(room_id, req.sender_id, req.body)?;
    Ok(Json(message))
}

async fn send_private_message(
    State(state): State<AppState>,
    Json(req): Json<PrivateMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let message = state
        .chat
        .lock()
        .await
        .send_private_message(req.sender_id, req.receiver_id, req.body)?;
    Ok(Json(message))
}

async fn chat_history(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePage>, ServerError> {
    let cursor = match (query.after_ts, query.after_id) {
        (Some(created_at), Some(id)) => Some(MessageCursor { created_at, id }),
        (None, None) => None,
        _ => {
            return Err(ServerError::BadRequest(
                "after_ts and after_id must be supplied together".to_string(),
            ))
        }
    };
    let page = state
        .chat
        .lock()
        .await
        .chat_history(room_id, cursor, query.limit)?;
    Ok(Json(page))
}

async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
) -> Result<Json<Message>, ServerError> {
    Ok(Json(state.chat.lock().await.get_message(id)?))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<Message>, ServerError> {
    Ok(Json(state.chat.lock().await.mark_read(id, req.user_id)?))
}

async fn edit_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    Ok(Json(state.chat.lock().await.edit_message(id, req.body)?))
}

async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let deleted = state.chat.lock().await.delete_message(id)?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn toggle_reaction(
    State(state): State<AppState>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ReactionSummary>, ServerError> {
    let summary = state
        .chat
        .lock()
        .await
        .toggle_reaction(req.subject_id, req.user_id, req.kind)?;
    Ok(Json(summary))
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

async fn place_call(
    State(state): State<AppState>,
    Json(req): Json<PlaceCallRequest>,
) -> Result<Json<CallSnapshot>, ServerError> {
    let snapshot = state
        .calls
        .place_call(req.caller_id, req.receiver_id, req.call_type)?;

    spawn_ring_timeout(state, snapshot.id);
    Ok(Json(snapshot))
}

async fn call_snapshot(
    State(state): State<AppState>,
    Path(id): Path<CallId>,
) -> Result<Json<CallSnapshot>, ServerError> {
    Ok(Json(state.calls.snapshot(id)?))
}

async fn accept_call(
    State(state): State<AppState>,
    Path(id): Path<CallId>,
) -> Result<Json<CallSnapshot>, ServerError> {
    Ok(Json(state.calls.accept_call(id)?))
}

async fn decline_call(
    State(state): State<AppState>,
    Path(id): Path<CallId>,
    Json(req): Json<DeclineCallRequest>,
) -> Result<Json<CallSnapshot>, ServerError> {
    let snapshot = state.calls.decline_call(id, req.actor)?;
    persist_call_outcome(&state, &snapshot).await?;
    Ok(Json(snapshot))
}

async fn end_call(
    State(state): State<AppState>,
    Path(id): Path<CallId>,
    Json(req): Json<DeclineCallRequest>,
) -> Result<Json<CallSnapshot>, ServerError> {
    let snapshot = state.calls.end_call(id, req.actor)?;
    persist_call_outcome(&state, &snapshot).await?;
    Ok(Json(snapshot))
}

async fn calls_for_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<Vec<CallRecord>>, ServerError> {
    Ok(Json(state.chat.lock().await.calls_for_user(id)?))
}

/// Write a terminal session into the call log and drop it from the live
/// registry.
async fn persist_call_outcome(
    state: &AppState,
    snapshot: &CallSnapshot,
) -> Result<(), ServerError> {
    let record = snapshot_to_record(snapshot);
    state.chat.lock().await.record_call(&record)?;
    if let Err(err) = state.calls.forget(snapshot.id) {
        debug!(call = %snapshot.id, error = %err, "session already evicted");
    }
    Ok(())
}

fn snapshot_to_record(snapshot: &CallSnapshot) -> CallRecord {
    CallRecord {
        id: snapshot.id,
        caller_id: snapshot.caller_id,
        receiver_id: snapshot.receiver_id,
        call_type: snapshot.call_type,
        outcome: snapshot.state,
        ended_by: snapshot.ended_by,
        duration_secs: snapshot.duration_secs(),
        started_at: snapshot.started_at,
        ended_at: snapshot.ended_at.unwrap_or_else(Utc::now),
    }
}

/// Arm the ring-timeout timer for a freshly placed call.  If nobody resolves
/// the ring first, the call is marked missed; losing the race to an accept
/// or decline is the expected quiet outcome.
fn spawn_ring_timeout(state: AppState, call_id: CallId) {
    let timeout = std::time::Duration::from_secs(state.config.ring_timeout_secs);
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        match state.calls.timeout_call(call_id) {
            Ok(snapshot) => {
                info!(call = %call_id, "ring timed out, call missed");
                if let Err(err) = persist_call_outcome(&state, &snapshot).await {
                    warn!(call = %call_id, error = %err, "failed to record missed call");
                }
            }
            Err(err) => {
                debug!(call = %call_id, error = %err, "ring already resolved");
            }
        }
    });
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
