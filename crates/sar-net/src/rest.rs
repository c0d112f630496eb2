//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Drone, observer, and operator network surfaces."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use sar_core::{EngineError, EngineStatus};
use sar_msg::{ErrorNotice, FleetUpdate, ManualCommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::server::AppState;

/// Body returned by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    /// Drones known this session.
    pub drones: usize,
    /// Drones whose telemetry timed out.
    pub stale_drones: usize,
    /// Survivors detected this session.
    pub survivors: usize,
    /// Survivors marked rescued.
    pub rescued: usize,
    /// Fraction of the world scanned.
    pub coverage: f64,
    /// Open observer connections.
    pub observers: usize,
    /// Receivers attached to the broadcast channel.
    pub subscribers: usize,
    /// Sequence of the newest alert.
    pub alert_sequence: u64,
    /// Current session epoch.
    pub epoch: u64,
}

impl StatusSnapshot {
    fn new(status: EngineStatus, observers: usize, subscribers: usize) -> Self {
        Self {
            drones: status.drones,
            stale_drones: status.stale_drones,
            survivors: status.survivors,
            rescued: status.rescued,
            coverage: status.coverage,
            observers,
            subscribers,
            alert_sequence: status.alert_sequence,
            epoch: status.epoch,
        }
    }
}

fn error_response(err: &EngineError) -> Response {
    let status = match err {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Validation(_) | EngineError::Decode(_) => StatusCode::BAD_REQUEST,
        EngineError::ModeConflict { .. } => StatusCode::CONFLICT,
        EngineError::Unsupported { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(ErrorNotice::new(err.reason(), err.to_string()))).into_response()
}

pub(crate) async fn post_command(State(state): State<Arc<AppState>>, body: String) -> Response {
    let command: ManualCommand = match serde_json::from_str(&body) {
        Ok(command) => command,
        Err(err) => {
            warn!(error = %err, "rejecting undecodable command");
            return error_response(&EngineError::Decode(err));
        }
    };
    debug!(drone = %command.drone_id, command = ?command.command, "rest command received");
    match state.ingress.commands().handle_manual(command) {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn post_reset(State(state): State<Arc<AppState>>) -> Response {
    let epoch = state.ingress.commands().reset_session();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "epoch": epoch })),
    )
        .into_response()
}

pub(crate) async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    let status = state.ingress.engine().status();
    Json(StatusSnapshot::new(
        status,
        state.observer_count(),
        state.hub.receiver_count(),
    ))
}

pub(crate) async fn get_snapshot(State(state): State<Arc<AppState>>) -> Json<FleetUpdate> {
    let frame = state.hub.full_sync(state.ingress.engine());
    Json(frame.fleet)
}

pub(crate) async fn get_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

pub(crate) async fn get_metrics(State(state): State<Arc<AppState>>) -> Response {
    let Some(registry) = &state.registry else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics registry unavailable",
        )
            .into_response();
    };

    match sar_metrics::encode_text(registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, sar_metrics::text_content_type())],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
