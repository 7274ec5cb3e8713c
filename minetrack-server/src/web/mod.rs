//! Web server — axum REST API over the tracking engine.
//!
//! Reads come from the engine's published snapshot; every state change is
//! sent to the engine as an `Action` and applied on its task.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use http::header::CACHE_CONTROL;
use http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::engine::EngineHandle;
use crate::store::Store;

pub mod ingest;
pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub engine: EngineHandle,
    pub store: Option<Arc<dyn Store>>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Views and registration
        .route("/api/snapshot", get(routes::api_snapshot))
        .route("/api/stats", get(routes::api_stats))
        .route(
            "/api/devices",
            get(routes::api_devices).post(routes::api_devices_register),
        )
        .route("/api/devices/:id/track", get(routes::api_device_track))
        .route("/api/alerts", get(routes::api_alerts))
        .route("/api/zones", get(routes::api_zones))
        // Manual triggers
        .route("/api/devices/:id/emergency", post(routes::api_emergency))
        .route("/api/devices/:id/breakdown", post(routes::api_breakdown))
        .route("/api/devices/:id/clear", post(routes::api_clear))
        .route("/api/alerts/dismiss-all", post(routes::api_dismiss_all))
        .route("/api/alerts/:id/dismiss", post(routes::api_dismiss))
        // Playback
        .route("/api/devices/:id/playback/play", post(routes::api_playback_play))
        .route("/api/devices/:id/playback/stop", post(routes::api_playback_stop))
        .route("/api/devices/:id/playback/live", post(routes::api_playback_live))
        .route("/api/devices/:id/playback/seek", post(routes::api_playback_seek))
        .route("/api/devices/:id/playback/speed", post(routes::api_playback_speed))
        // Simulation
        .route("/api/simulation/start", post(routes::api_simulation_start))
        .route("/api/simulation/stop", post(routes::api_simulation_stop))
        // Geofences
        .route(
            "/api/geofences",
            get(routes::api_geofences_list).post(routes::api_geofences_add),
        )
        .route("/api/geofences/:id", delete(routes::api_geofences_delete))
        .route("/api/geofences/:id/active", post(routes::api_geofences_active))
        // Live ingest (position source and change feed over HTTP)
        .route("/api/v1/positions", post(ingest::api_ingest_positions))
        .route("/api/v1/source-status", post(ingest::api_source_status))
        .route("/api/v1/records", post(ingest::api_ingest_records))
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(cors)
}

/// Serve the API until `shutdown` fires.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16, shutdown: CancellationToken) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("minetrack listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
