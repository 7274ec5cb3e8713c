//! REST API route handlers.
//!
//! GET handlers serve from the engine's latest snapshot and never wait on the
//! engine loop, except the per-device track view which needs the full history.
//! POST/DELETE handlers go through the engine and report whether anything
//! changed.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use minetrack_core::types::{Device, DeviceCategory, Geofence, ZoneType};

use crate::engine::{Action, PlaybackAction};
use crate::web::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AlertParams {
    unread: Option<bool>,
    device: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct SeekBody {
    index: i64,
}

#[derive(Deserialize)]
pub struct SpeedBody {
    multiplier: f64,
}

#[derive(Deserialize)]
pub struct ActiveBody {
    active: bool,
}

#[derive(Deserialize)]
pub struct DeviceBody {
    id: String,
    name: String,
    category: DeviceCategory,
}

#[derive(Deserialize)]
pub struct GeofenceBody {
    id: Option<String>,
    name: String,
    lat: f64,
    lng: f64,
    radius_m: f64,
    zone_type: ZoneType,
    #[serde(default = "default_true")]
    alert_on_enter: bool,
    #[serde(default = "default_true")]
    alert_on_exit: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn applied(ok: bool) -> Json<serde_json::Value> {
    Json(json!({ "applied": ok }))
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("{what} not found") }))).into_response()
}

fn device_known(state: &AppState, device_id: &str) -> bool {
    state
        .engine
        .snapshot()
        .tracking
        .devices
        .iter()
        .any(|d| d.device.id == device_id)
}

// ---------------------------------------------------------------------------
// Read-only views
// ---------------------------------------------------------------------------

/// GET /api/snapshot — everything consumers render.
pub async fn api_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot();
    Json(json!(&*snapshot))
}

/// GET /api/stats — persisted row counts plus live counts.
pub async fn api_stats(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.engine.snapshot();
    let live = json!({
        "devices": snapshot.tracking.devices.len(),
        "online": snapshot.tracking.devices.iter().filter(|d| d.device.online).count(),
        "alerts": snapshot.tracking.alerts.len(),
        "unread_alerts": snapshot.tracking.unread_alerts,
    });

    let stored = match &state.store {
        Some(store) => match store.stats().await {
            Ok(stats) => json!(stats),
            Err(e) => {
                tracing::warn!(error = %e, "stats query failed");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "store unavailable", "live": live })),
                )
                    .into_response();
            }
        },
        None => serde_json::Value::Null,
    };

    Json(json!({ "live": live, "stored": stored })).into_response()
}

/// GET /api/devices — devices with their current and last live position.
pub async fn api_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!(state.engine.snapshot().tracking.devices))
}

/// POST /api/devices — register a device before its first fix.
pub async fn api_devices_register(State(state): State<Arc<AppState>>, Json(body): Json<DeviceBody>) -> Response {
    if body.id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "id is required" }))).into_response();
    }
    let device = Device::new(&body.id, &body.name, body.category);
    if state.engine.act(Action::RegisterDevice(device.clone())).await {
        (StatusCode::CREATED, Json(json!(device))).into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": "device already registered" })),
        )
            .into_response()
    }
}

/// GET /api/devices/:id/track — full history and playback state.
pub async fn api_device_track(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.engine.track(&id).await {
        Some(track) => Json(track).into_response(),
        None => not_found("device"),
    }
}

/// GET /api/alerts — newest first.
pub async fn api_alerts(State(state): State<Arc<AppState>>, Query(params): Query<AlertParams>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot();
    let alerts: Vec<_> = snapshot
        .tracking
        .alerts
        .iter()
        .filter(|a| params.unread != Some(true) || !a.read)
        .filter(|a| params.device.as_deref().map_or(true, |d| a.device_id == d))
        .take(params.limit.unwrap_or(usize::MAX))
        .collect();
    Json(json!(alerts))
}

/// GET /api/zones
pub async fn api_zones(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!(state.engine.snapshot().tracking.zones))
}

// ---------------------------------------------------------------------------
// Manual triggers
// ---------------------------------------------------------------------------

/// POST /api/devices/:id/emergency — no-op without a known position.
pub async fn api_emergency(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    if !device_known(&state, &id) {
        return not_found("device");
    }
    applied(state.engine.act(Action::Emergency(id)).await).into_response()
}

/// POST /api/devices/:id/breakdown
pub async fn api_breakdown(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    if !device_known(&state, &id) {
        return not_found("device");
    }
    applied(state.engine.act(Action::Breakdown(id)).await).into_response()
}

/// POST /api/devices/:id/clear
pub async fn api_clear(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    if !device_known(&state, &id) {
        return not_found("device");
    }
    applied(state.engine.act(Action::ClearEmergency(id)).await).into_response()
}

/// POST /api/alerts/:id/dismiss — idempotent; unknown ids are a no-op.
pub async fn api_dismiss(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    applied(state.engine.act(Action::DismissAlert(id)).await)
}

/// POST /api/alerts/dismiss-all
pub async fn api_dismiss_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    applied(state.engine.act(Action::DismissAllAlerts).await)
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

async fn playback(state: &AppState, device_id: String, action: PlaybackAction) -> Response {
    if state.engine.act(Action::Playback { device_id, action }).await {
        applied(true).into_response()
    } else {
        not_found("device history")
    }
}

/// POST /api/devices/:id/playback/play
pub async fn api_playback_play(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    playback(&state, id, PlaybackAction::Play).await
}

/// POST /api/devices/:id/playback/stop
pub async fn api_playback_stop(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    playback(&state, id, PlaybackAction::Stop).await
}

/// POST /api/devices/:id/playback/live
pub async fn api_playback_live(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    playback(&state, id, PlaybackAction::Live).await
}

/// POST /api/devices/:id/playback/seek — index is clamped into the history.
pub async fn api_playback_seek(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SeekBody>,
) -> Response {
    playback(&state, id, PlaybackAction::Seek(body.index)).await
}

/// POST /api/devices/:id/playback/speed — non-positive multipliers are ignored.
pub async fn api_playback_speed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SpeedBody>,
) -> Response {
    playback(&state, id, PlaybackAction::Speed(body.multiplier)).await
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// POST /api/simulation/start — idempotent.
pub async fn api_simulation_start(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.act(Action::SimulationStart).await;
    Json(json!(state.engine.snapshot().simulation))
}

/// POST /api/simulation/stop
pub async fn api_simulation_stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    applied(state.engine.act(Action::SimulationStop).await)
}

// ---------------------------------------------------------------------------
// Geofences
// ---------------------------------------------------------------------------

/// GET /api/geofences
pub async fn api_geofences_list(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!(state.engine.snapshot().tracking.geofences))
}

/// POST /api/geofences — create a geofence.
pub async fn api_geofences_add(State(state): State<Arc<AppState>>, Json(body): Json<GeofenceBody>) -> Response {
    if !(body.radius_m.is_finite() && body.radius_m > 0.0) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "radius_m must be positive" })),
        )
            .into_response();
    }
    if !(-90.0..=90.0).contains(&body.lat) || !(-180.0..=180.0).contains(&body.lng) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "coordinates out of range" })),
        )
            .into_response();
    }

    let geofence = Geofence {
        id: body
            .id
            .unwrap_or_else(|| format!("gf-{}", uuid::Uuid::new_v4().simple())),
        name: body.name,
        lat: body.lat,
        lng: body.lng,
        radius_m: body.radius_m,
        active: true,
        alert_on_enter: body.alert_on_enter,
        alert_on_exit: body.alert_on_exit,
        zone_type: body.zone_type,
    };

    if state.engine.act(Action::AddGeofence(geofence.clone())).await {
        (StatusCode::CREATED, Json(json!(geofence))).into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": "geofence id already exists" })),
        )
            .into_response()
    }
}

/// DELETE /api/geofences/:id
pub async fn api_geofences_delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    if state.engine.act(Action::RemoveGeofence(id)).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found("geofence")
    }
}

/// POST /api/geofences/:id/active — the only mutable geofence field.
pub async fn api_geofences_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ActiveBody>,
) -> Response {
    let action = Action::SetGeofenceActive {
        geofence_id: id,
        active: body.active,
    };
    if state.engine.act(action).await {
        applied(true).into_response()
    } else {
        not_found("geofence")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
