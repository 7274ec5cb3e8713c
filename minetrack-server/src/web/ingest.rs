//! Live ingest API — position sources and the change feed POST here.
//!
//! Sources identify the device they report for. Fixes are validated before
//! they reach the engine; invalid ones are counted and dropped.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use minetrack_core::source::{ChangeRecord, Fix, SourceError, SourceStatus};

use crate::engine::Action;
use crate::web::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct IngestRequest {
    device: String,
    fixes: Vec<Fix>,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Idle,
    Active,
    Failed,
}

#[derive(Deserialize)]
pub struct SourceStatusRequest {
    state: SourceState,
    /// Free-form error code from the source, classified on receipt.
    error: Option<String>,
}

#[derive(Deserialize)]
pub struct RecordsRequest {
    records: Vec<ChangeRecord>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn valid_fix(fix: &Fix) -> bool {
    let in_range = |v: Option<f64>| v.map_or(true, |v| v.is_finite() && (0.0..=100.0).contains(&v));
    fix.lat.is_finite()
        && fix.lng.is_finite()
        && (-90.0..=90.0).contains(&fix.lat)
        && (-180.0..=180.0).contains(&fix.lng)
        && fix.timestamp.is_finite()
        && fix.speed_kmh.is_finite()
        && fix.speed_kmh >= 0.0
        && fix.heading.is_finite()
        && in_range(fix.battery)
        && in_range(fix.signal)
        && fix.depth.map_or(true, f64::is_finite)
}

fn engine_gone() -> (StatusCode, Json<Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "engine stopped"})),
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/positions — batch of fixes for one device, applied in order.
pub async fn api_ingest_positions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestRequest>,
) -> (StatusCode, Json<Value>) {
    if body.device.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "device is required"})),
        );
    }

    let mut accepted = 0u64;
    let mut rejected = 0u64;
    for fix in body.fixes {
        if !valid_fix(&fix) {
            rejected += 1;
            continue;
        }
        let action = Action::IngestFix {
            device_id: body.device.clone(),
            fix,
        };
        if state.engine.act(action).await {
            accepted += 1;
        } else {
            rejected += 1;
        }
    }

    if rejected > 0 {
        tracing::debug!(device = %body.device, accepted, rejected, "fixes rejected");
    }

    (
        StatusCode::OK,
        Json(json!({
            "device": body.device,
            "accepted": accepted,
            "rejected": rejected,
        })),
    )
}

/// POST /api/v1/source-status — the source reports its health. Errors are
/// surfaced in the snapshot and never touch tracking state.
pub async fn api_source_status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SourceStatusRequest>,
) -> (StatusCode, Json<Value>) {
    let status = match body.state {
        SourceState::Idle => SourceStatus::Idle,
        SourceState::Active => SourceStatus::Active,
        SourceState::Failed => SourceStatus::Failed(
            body.error
                .as_deref()
                .map(SourceError::classify)
                .unwrap_or(SourceError::Unknown),
        ),
    };

    if !state.engine.act(Action::SourceStatus(status)).await {
        return engine_gone();
    }
    (StatusCode::ACCEPTED, Json(json!(status)))
}

/// POST /api/v1/records — change-feed records pushed over HTTP.
pub async fn api_ingest_records(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RecordsRequest>,
) -> (StatusCode, Json<Value>) {
    let mut applied = 0u64;
    let total = body.records.len();
    for record in body.records {
        if state.engine.act(Action::Record(record)).await {
            applied += 1;
        }
    }
    (
        StatusCode::OK,
        Json(json!({"received": total, "applied": applied})),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::web::tests::{body_json, post_json, test_state};

    #[tokio::test]
    async fn test_ingest_positions_validates() {
        let (state, _shutdown) = test_state();
        let body = r#"{"device":"haul-07","fixes":[
            {"lat":-26.2041,"lng":28.0473,"timestamp":1.0,"speed_kmh":12.0},
            {"lat":95.0,"lng":28.0,"timestamp":2.0},
            {"lat":-26.2041,"lng":28.0473,"timestamp":3.0,"battery":150.0}]}"#;
        let response = crate::web::build_router(state.clone())
            .oneshot(post_json("/api/v1/positions", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["accepted"], 1);
        assert_eq!(json["rejected"], 2);

        let snapshot = state.engine.snapshot();
        assert_eq!(snapshot.tracking.devices.len(), 1);
        assert_eq!(snapshot.tracking.source, SourceStatus::Active);
    }

    #[tokio::test]
    async fn test_ingest_requires_device() {
        let (state, _shutdown) = test_state();
        let response = crate::web::build_router(state)
            .oneshot(post_json("/api/v1/positions", r#"{"device":" ","fixes":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_source_failure_keeps_state() {
        let (state, _shutdown) = test_state();
        let body = r#"{"device":"haul-07","fixes":[{"lat":-26.2041,"lng":28.0473,"timestamp":1.0}]}"#;
        crate::web::build_router(state.clone())
            .oneshot(post_json("/api/v1/positions", body))
            .await
            .unwrap();

        let response = crate::web::build_router(state.clone())
            .oneshot(post_json(
                "/api/v1/source-status",
                r#"{"state":"failed","error":"PERMISSION_DENIED"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["error"], "permission-denied");

        let response = crate::web::build_router(state)
            .oneshot(Request::builder().uri("/api/snapshot").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["source"]["state"], "failed");
        assert_eq!(json["devices"][0]["history_len"], 1);
    }

    #[tokio::test]
    async fn test_ingest_records_dedups_alerts() {
        let (state, _shutdown) = test_state();
        let body = r#"{"records":[
            {"table":"device","record":{"id":"drill-03","name":"Drill Rig 3","category":"drill",
                "status":"maintenance","online":false,"last_seen":null}},
            {"table":"alert","record":{"id":"a-1","alert_type":"offline","message":"gone",
                "timestamp":1.0,"read":false,"device_id":"drill-03","geofence_id":null,
                "priority":"high","location":null}},
            {"table":"alert","record":{"id":"a-1","alert_type":"offline","message":"gone",
                "timestamp":1.0,"read":false,"device_id":"drill-03","geofence_id":null,
                "priority":"high","location":null}}]}"#;
        let response = crate::web::build_router(state.clone())
            .oneshot(post_json("/api/v1/records", body))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["received"], 3);
        assert_eq!(json["applied"], 2);

        let snapshot = state.engine.snapshot();
        assert_eq!(snapshot.tracking.alerts.len(), 1);
        assert_eq!(snapshot.tracking.devices[0].device.id, "drill-03");
    }
}
