use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::chat::ChatMessage;
use crate::models::{FightSnapshot, MeterKind, MeterSummary, Side};
use crate::parser::Session;
use crate::tracker::{PickupEvent, TrackedItem};
use crate::translate::TranslationSettings;

/// Shared state behind the HTTP surface. The session mutex is the mutual
/// exclusion that keeps the engine effectively single-threaded; watchdog
/// knobs are runtime-togglable without holding it.
pub struct AppState {
    pub session: Arc<Mutex<Session>>,
    pub auto_reset: AtomicBool,
    pub reset_delay_secs: AtomicU64,
}

impl AppState {
    pub fn new(session: Arc<Mutex<Session>>, auto_reset: bool, reset_delay_secs: u64) -> Self {
        AppState {
            session,
            auto_reset: AtomicBool::new(auto_reset),
            reset_delay_secs: AtomicU64::new(reset_delay_secs),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/meter/{mode}", get(meter))
        .route("/api/history", get(history))
        .route("/api/chat", get(chat_feed).delete(clear_chat))
        .route("/api/chat/{id}/translate", post(translate_message))
        .route("/api/tracker", get(tracker_items).post(tracker_add))
        .route("/api/tracker/events/drain", post(drain_pickup_events))
        .route("/api/tracker/{id}", post(tracker_update).delete(tracker_remove))
        .route("/api/status", get(status))
        .route("/api/invalidations/drain", post(drain_invalidations))
        .route("/api/override", post(set_override))
        .route("/api/bind", post(bind_summon))
        .route("/api/reset", post(reset))
        .route("/api/translation", post(set_translation))
        .route("/api/watchdog", post(set_watchdog))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn meter(
    State(state): State<Arc<AppState>>,
    Path(mode): Path<String>,
) -> Result<Json<MeterSummary>, (StatusCode, String)> {
    let kind = match mode.as_str() {
        "damage" => MeterKind::Damage,
        "healing" => MeterKind::Healing,
        "armor" => MeterKind::Armor,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown meter mode: {}", other),
            ))
        }
    };
    let session = state.session.lock().await;
    Ok(Json(session.meter_summary(kind)))
}

async fn history(State(state): State<Arc<AppState>>) -> Json<Vec<FightSnapshot>> {
    let session = state.session.lock().await;
    Json(session.history.iter().cloned().collect())
}

async fn chat_feed(State(state): State<Arc<AppState>>) -> Json<Vec<ChatMessage>> {
    let session = state.session.lock().await;
    Json(session.chat.messages().cloned().collect())
}

async fn clear_chat(State(state): State<Arc<AppState>>) -> StatusCode {
    let mut session = state.session.lock().await;
    session.chat.clear();
    StatusCode::NO_CONTENT
}

async fn translate_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut session = state.session.lock().await;
    if session.queue_manual_translation(id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err((StatusCode::NOT_FOUND, "message not found".to_string()))
    }
}

async fn tracker_items(State(state): State<Arc<AppState>>) -> Json<Vec<TrackedItem>> {
    let session = state.session.lock().await;
    Json(session.tracker.items.clone())
}

#[derive(Deserialize)]
struct TrackRequest {
    name: String,
    target: u64,
    #[serde(default)]
    profession: Option<String>,
}

async fn tracker_add(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrackRequest>,
) -> Result<Json<TrackedItem>, (StatusCode, String)> {
    if req.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "item name required".to_string()));
    }
    let mut session = state.session.lock().await;
    let item = session.tracker.add_item(&req.name, req.target, req.profession);
    session.flush_tracker();
    Ok(Json(item))
}

#[derive(Deserialize)]
struct ProgressRequest {
    current: u64,
    target: u64,
}

async fn tracker_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(req): Json<ProgressRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut session = state.session.lock().await;
    if session.tracker.set_progress(id, req.current, req.target) {
        session.flush_tracker();
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "item not found".to_string()))
    }
}

async fn tracker_remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut session = state.session.lock().await;
    if session.tracker.remove_item(id) {
        session.flush_tracker();
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "item not found".to_string()))
    }
}

#[derive(Serialize)]
struct Status {
    last_combat_activity: DateTime<Utc>,
    awaiting_new_fight: bool,
    current_caster: String,
    current_spell: String,
    history_fights: usize,
    chat_messages: usize,
    auto_reset: bool,
    reset_delay_secs: u64,
    translation: TranslationSettings,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Status> {
    let session = state.session.lock().await;
    Json(Status {
        last_combat_activity: session.last_combat_activity,
        awaiting_new_fight: session.state.awaiting_new_fight,
        current_caster: session.state.current_caster.clone(),
        current_spell: session.state.current_spell.clone(),
        history_fights: session.history.len(),
        chat_messages: session.chat.len(),
        auto_reset: state.auto_reset.load(Ordering::Relaxed),
        reset_delay_secs: state.reset_delay_secs.load(Ordering::Relaxed),
        translation: session.translation,
    })
}

/// Names whose icons need re-rendering since the last drain.
async fn drain_invalidations(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    let mut session = state.session.lock().await;
    Json(std::mem::take(&mut session.ctx.icon_invalidations))
}

/// Pickup notifications (including goal-reached transitions) since the
/// last drain.
async fn drain_pickup_events(State(state): State<Arc<AppState>>) -> Json<Vec<PickupEvent>> {
    let mut session = state.session.lock().await;
    Json(std::mem::take(&mut session.pickup_events).into_iter().collect())
}

#[derive(Deserialize)]
struct OverrideRequest {
    name: String,
    /// `ally`, `enemy`, or null to remove the override.
    side: Option<Side>,
}

async fn set_override(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OverrideRequest>,
) -> StatusCode {
    let mut session = state.session.lock().await;
    session.set_override(&req.name, req.side);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct BindRequest {
    summon: String,
    master: String,
}

async fn bind_summon(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BindRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut session = state.session.lock().await;
    session
        .bind_summon(&req.summon, &req.master)
        .map_err(|err| (StatusCode::BAD_REQUEST, err))?;
    info!(summon = %req.summon, master = %req.master, "summon bound");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
struct ResetRequest {
    #[serde(default)]
    hard: bool,
}

async fn reset(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ResetRequest>>,
) -> StatusCode {
    let hard = body.map(|Json(r)| r.hard).unwrap_or(false);
    let mut session = state.session.lock().await;
    session.perform_reset(hard);
    info!(hard, "meter reset");
    StatusCode::NO_CONTENT
}

async fn set_translation(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<TranslationSettings>,
) -> StatusCode {
    let mut session = state.session.lock().await;
    session.translation = settings;
    if !settings.enabled {
        // Disabling clears the queue immediately; an in-flight request is
        // discarded by the worker's flag check on resolution.
        session.pending_translations.clear();
    }
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct WatchdogRequest {
    auto_reset: bool,
    reset_delay_secs: u64,
}

async fn set_watchdog(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WatchdogRequest>,
) -> StatusCode {
    state.auto_reset.store(req.auto_reset, Ordering::Relaxed);
    state
        .reset_delay_secs
        .store(req.reset_delay_secs.max(5), Ordering::Relaxed);
    StatusCode::NO_CONTENT
}
