// src/router/mod.rs
// Thin REST surface (spec §4.8, §6): conversation CRUD, history fetch,
// session config, and anything that doesn't need a live session. Built
// the way the teacher assembles `api::http` — small per-resource
// `Router<AppState>` builders merged in `build()` — generalized from its
// single `auth` + `health` pair to the spec's `/conversations` and
// `/system` surfaces.

mod auth_middleware;

use crate::error::{AppError, AppResult};
use crate::model::{ConversationFilter, ConversationPatch, NewConversation, SessionConfigPatch};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

pub fn build(state: AppState) -> Router {
    let api = Router::new()
        .route("/system/info", get(system_info))
        .route("/system/models", get(system_models))
        .route("/conversations", get(list_conversations).post(create_conversation))
        .route("/conversations/sessions/resumable", get(resumable_sessions))
        .route("/conversations/sessions/recent", get(recent_sessions))
        .route("/conversations/sessions/config", get(get_session_config).put(update_session_config))
        .route("/conversations/notifications/pending", get(drain_pending_notifications))
        .route("/conversations/tools/availability", get(tools_availability))
        .route("/conversations/{id}", delete(delete_conversation).patch(patch_conversation))
        .route("/conversations/{id}/fork", post(fork_conversation))
        .route("/conversations/{id}/messages", get(get_messages))
        .route("/conversations/{id}/approval", post(submit_approval))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware::require_bearer))
        .with_state(state.clone());

    Router::new()
        .nest("/api", api)
        .route("/ws", get(crate::hub::ws_handler))
        .route("/healthz", get(liveness_check))
        .route("/readyz", get(readiness_check))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    db: &'static str,
}

/// Liveness probe (spec §10): the process is up and serving. No Store
/// access — a wedged DB should fail `/readyz`, not `/healthz`.
async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "alive"})))
}

/// Readiness probe (spec §10): Store reachability. A server with zero
/// live sessions is still ready; a server that can't reach its Store is not.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store.ping().await.is_ok();
    let body = HealthResponse { status: if db_ok { "ready" } else { "not ready" }, db: if db_ok { "ok" } else { "error" } };
    if db_ok {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}

// ---- system -------------------------------------------------------------

async fn system_info() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

/// Model catalogue. The spec leaves the source unspecified ("from CLI or
/// cache"); since probing each CLI's own model list requires a live
/// process per tool, this returns the static catalogue a deployment
/// knows about today and leaves room to grow into a cached CLI query
/// later without changing the wire shape.
async fn system_models() -> impl IntoResponse {
    Json(json!({
        "claude": ["claude-opus-4-1", "claude-sonnet-4-5", "claude-haiku-4-5"],
        "cursor-agent": ["gpt-5", "claude-sonnet-4-5"],
        "gemini": ["gemini-2.5-pro", "gemini-2.5-flash"],
    }))
}

// ---- conversations --------------------------------------------------------

#[derive(Deserialize)]
struct ListQuery {
    #[serde(rename = "projectPath")]
    project_path: Option<String>,
    status: Option<String>,
}

async fn list_conversations(State(state): State<AppState>, Query(q): Query<ListQuery>) -> AppResult<impl IntoResponse> {
    let rows = state
        .store
        .list_conversations(&ConversationFilter {
            project_path: q.project_path,
            status: q.status,
            active_since: None,
        })
        .await?;
    Ok(Json(rows))
}

async fn create_conversation(State(state): State<AppState>, Json(spec): Json<NewConversation>) -> AppResult<impl IntoResponse> {
    let conversation = state.manager.create(spec).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn delete_conversation(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<impl IntoResponse> {
    state.manager.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PatchBody {
    topic: Option<String>,
}

async fn patch_conversation(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<PatchBody>) -> AppResult<impl IntoResponse> {
    let updated = state
        .store
        .update_conversation(&id, &ConversationPatch { topic: body.topic, ..Default::default() })
        .await?;
    Ok(Json(updated))
}

/// Duplicate a conversation with its full history (spec §6 `fork`). The
/// copy starts `ended` — forking doesn't imply resuming a live PTY, the
/// client issues a `sendMessage` against the new conversation id to
/// start one, the same way any fresh conversation would.
async fn fork_conversation(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<impl IntoResponse> {
    let source = state.store.get_conversation(&id).await?;
    let messages = state.store.get_messages(&id, i64::MAX, None).await?;

    let now = crate::model::now_ms();
    let mut forked = source.clone();
    forked.id = uuid::Uuid::new_v4().to_string();
    forked.status = crate::model::ConversationStatus::Ended;
    forked.session_id = None;
    forked.created_at = now;
    forked.updated_at = now;
    forked.last_activity = now;

    state.store.create_conversation(&forked).await?;
    for block in &messages {
        state.store.append_message(&forked.id, block).await?;
    }
    Ok((StatusCode::CREATED, Json(forked)))
}

#[derive(Deserialize)]
struct MessagesQuery {
    limit: Option<i64>,
    before: Option<i64>,
}

async fn get_messages(State(state): State<AppState>, Path(id): Path<String>, Query(q): Query<MessagesQuery>) -> AppResult<impl IntoResponse> {
    let limit = q.limit.unwrap_or(200).clamp(1, 2000);
    let blocks = state.store.get_messages(&id, limit, q.before).await?;
    Ok(Json(blocks))
}

// ---- sessions ---------------------------------------------------------

async fn resumable_sessions(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.manager.list_resumable().await?))
}

#[derive(Deserialize)]
struct RecentQuery {
    hours: Option<i64>,
}

async fn recent_sessions(State(state): State<AppState>, Query(q): Query<RecentQuery>) -> AppResult<impl IntoResponse> {
    let hours = q.hours.unwrap_or(24).max(1);
    let since = crate::model::now_ms() - hours * 3_600_000;
    Ok(Json(state.manager.list_recent(since).await?))
}

async fn get_session_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.config())
}

/// `SessionManager` has no back-pointer into `HistoryBuffer`/`Hub` (spec
/// §9 one-way ownership), so the two capacities it doesn't own are
/// pushed out here, where `AppState` already holds all three.
async fn update_session_config(State(state): State<AppState>, Json(patch): Json<SessionConfigPatch>) -> AppResult<impl IntoResponse> {
    let updated = state.manager.update_config(patch).await?;
    state.history.set_capacity(updated.history_buffer_capacity as usize);
    state.hub.set_outbound_queue_capacity(updated.outbound_queue_capacity as usize);
    Ok(Json(updated))
}

// ---- notifications ------------------------------------------------------

/// Destructive drain — matches the flagged source behavior (spec §9, §7
/// "drained destructively without acknowledgement"): a lost HTTP
/// response loses these notifications, by design parity with the
/// original, not by accident.
async fn drain_pending_notifications(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.store.drain_pending_notifications().await?))
}

// ---- tools --------------------------------------------------------------

#[derive(Serialize)]
struct ToolAvailability {
    available: bool,
}

async fn tools_availability(State(state): State<AppState>) -> impl IntoResponse {
    let mut out: HashMap<&'static str, ToolAvailability> = HashMap::new();
    for (tool, default_bin) in [("claude", "claude"), ("cursor-agent", "cursor-agent"), ("gemini", "gemini")] {
        let exe = state.tools.resolve(tool, default_bin);
        out.insert(tool, ToolAvailability { available: binary_on_path(&exe) });
    }
    Json(out)
}

fn binary_on_path(exe: &str) -> bool {
    if exe.contains('/') {
        return std::path::Path::new(exe).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(exe).is_file()))
        .unwrap_or(false)
}

// ---- approval (REST alternative to chatApproval) ------------------------

#[derive(Deserialize)]
struct ApprovalBody {
    #[serde(rename = "blockId")]
    block_id: String,
    approved: bool,
}

async fn submit_approval(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<ApprovalBody>) -> AppResult<impl IntoResponse> {
    let handle = state.manager.get(&id).ok_or_else(|| AppError::NotFound(id.clone()))?;
    handle.approve(body.block_id, body.approved).await?;
    Ok(StatusCode::NO_CONTENT)
}
