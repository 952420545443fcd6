//! `cadence serve` -- HTTP JSON API for the decision engine.
//!
//! Runs the engine over the in-memory store with logging collaborators and
//! the periodic scheduler, exposed via `axum` + `tokio`.
//!
//! Endpoints:
//! - GET  /health                        - Server status
//! - POST /v1/events                     - Ingest one event
//! - GET  /v1/users/{id}/state           - A user's FSM record
//! - GET  /v1/users/{id}/overlays        - A user's overlay instances
//! - GET  /v1/users/{id}/overlays/visible - The single surfaced overlay
//! - POST /v1/sweep                      - Run one sweep pass now
//!
//! All responses use Content-Type: application/json.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use cadence_core::EventTag;
use cadence_engine::{
    AuditLog, CollaboratorError, Collaborators, CreditLedger, Engine, EngineConfig, EngineError,
    Notifier, SystemClock, TagStore,
};
use cadence_storage::MemoryStore;

use crate::load_snapshot;

struct AppState {
    engine: Arc<Engine>,
}

/// Collaborator that logs each call; stands in for the real ledger, tag
/// store, delivery channel, and audit sink behind this surface.
struct LoggingCollaborator;

#[async_trait]
impl CreditLedger for LoggingCollaborator {
    async fn grant(
        &self,
        user_id: &str,
        amount: rust_decimal::Decimal,
        reason: &str,
    ) -> Result<(), CollaboratorError> {
        info!(user_id, %amount, reason, "GRANT_BONUS");
        Ok(())
    }
}

#[async_trait]
impl TagStore for LoggingCollaborator {
    async fn tag(&self, user_id: &str, tag: &str) -> Result<(), CollaboratorError> {
        info!(user_id, tag, "TAG_USER");
        Ok(())
    }
}

#[async_trait]
impl Notifier for LoggingCollaborator {
    async fn send(
        &self,
        user_id: &str,
        message: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        info!(user_id, %message, "SEND_MESSAGE");
        Ok(())
    }

    async fn send_offer(
        &self,
        user_id: &str,
        offer: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        info!(user_id, %offer, "SEND_SPECIAL_OFFER");
        Ok(())
    }
}

#[async_trait]
impl AuditLog for LoggingCollaborator {
    async fn record(
        &self,
        user_id: &str,
        entry: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        info!(user_id, %entry, "LOG_EVENT");
        Ok(())
    }
}

pub(crate) async fn run(snapshot_path: &Path, port: u16, sweep_interval: u64) -> i32 {
    let snapshot = match load_snapshot(snapshot_path) {
        Ok(snapshot) => snapshot,
        Err(message) => {
            eprintln!("invalid snapshot: {}", message);
            return 1;
        }
    };

    let collaborator = Arc::new(LoggingCollaborator);
    let engine = Arc::new(Engine::new(
        Arc::new(snapshot),
        Arc::new(MemoryStore::new()),
        Collaborators {
            ledger: collaborator.clone(),
            tags: collaborator.clone(),
            notifier: collaborator.clone(),
            audit: collaborator,
        },
        Arc::new(SystemClock),
        EngineConfig::default(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = cadence_engine::scheduler::spawn(
        engine.clone(),
        Duration::from_secs(sweep_interval.max(1)),
        shutdown_rx,
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let state = Arc::new(AppState { engine });
    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/v1/events", post(handle_event))
        .route("/v1/users/{id}/state", get(handle_user_state))
        .route("/v1/users/{id}/overlays", get(handle_user_overlays))
        .route("/v1/users/{id}/overlays/visible", get(handle_visible_overlay))
        .route("/v1/sweep", post(handle_sweep))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {}: {}", addr, e);
            return 1;
        }
    };
    info!(%addr, sweep_interval, "cadence serving");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    // Stop the scheduler after the server drains; a tick in progress
    // finishes its current user.
    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;

    match result {
        Ok(()) => {
            info!("server shut down");
            0
        }
        Err(e) => {
            eprintln!("server error: {}", e);
            1
        }
    }
}

fn json_error(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn engine_error(e: EngineError) -> axum::response::Response {
    match e {
        EngineError::Conflict { .. } => json_error(StatusCode::CONFLICT, &e.to_string()),
        _ => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// ─── Route handlers ─────────────────────────────────────────────────────────

async fn handle_health(State(state): State<Arc<AppState>>) -> axum::response::Response {
    let snapshot = state.engine.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "activeVersion": { "id": snapshot.version.id, "name": snapshot.version.name },
    }))
    .into_response()
}

#[derive(Deserialize)]
struct EventRequest {
    user_id: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

async fn handle_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EventRequest>,
) -> axum::response::Response {
    let Some(tag) = EventTag::parse(&request.event) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            &format!("unknown event tag '{}'", request.event),
        );
    };
    match state
        .engine
        .process_event(&request.user_id, tag, &request.payload)
        .await
    {
        Ok(outcome) => Json(serde_json::json!({ "outcome": outcome })).into_response(),
        Err(e) => engine_error(e),
    }
}

async fn handle_user_state(
    State(state): State<Arc<AppState>>,
    UrlPath(user_id): UrlPath<String>,
) -> axum::response::Response {
    match state.engine.user_state(&user_id).await {
        Ok(Some(record)) => Json(serde_json::json!({ "state": record })).into_response(),
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            &format!("no state for user '{}'", user_id),
        ),
        Err(e) => engine_error(e),
    }
}

async fn handle_user_overlays(
    State(state): State<Arc<AppState>>,
    UrlPath(user_id): UrlPath<String>,
) -> axum::response::Response {
    match state.engine.user_overlays(&user_id).await {
        Ok(overlays) => Json(serde_json::json!({ "overlays": overlays })).into_response(),
        Err(e) => engine_error(e),
    }
}

async fn handle_visible_overlay(
    State(state): State<Arc<AppState>>,
    UrlPath(user_id): UrlPath<String>,
) -> axum::response::Response {
    match state.engine.visible_overlay(&user_id).await {
        Ok(overlay) => Json(serde_json::json!({ "overlay": overlay })).into_response(),
        Err(e) => engine_error(e),
    }
}

async fn handle_sweep(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match state.engine.sweep().await {
        Ok(report) => Json(serde_json::json!({ "sweep": report })).into_response(),
        Err(e) => engine_error(e),
    }
}

async fn handle_not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not found")
}
