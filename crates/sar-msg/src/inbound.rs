//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema for telemetry ingress and observer broadcasts."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::types::{CellCoord, ControlMode, DroneStatus, Position, TelemetrySource};

/// Any message accepted by the engine from drones or operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Per-drone state report.
    DroneReport(DroneReport),
    /// Batch of cells covered by a drone's sensors.
    ScanReport(ScanReport),
    /// Completion of a survivor rescue.
    RescueReport(RescueReport),
    /// Operator override command.
    ManualCommand(ManualCommand),
    /// Operator request to scan an area.
    ScanRequest(ScanRequest),
    /// Survivor sighting confirmed by an operator.
    ManualDetection(ManualDetection),
    /// Restart the session from a clean world.
    ResetSession,
}

impl InboundMessage {
    /// Label of the message kind, used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::DroneReport(_) => "drone_report",
            InboundMessage::ScanReport(_) => "scan_report",
            InboundMessage::RescueReport(_) => "rescue_report",
            InboundMessage::ManualCommand(_) => "manual_command",
            InboundMessage::ScanRequest(_) => "scan_request",
            InboundMessage::ManualDetection(_) => "manual_detection",
            InboundMessage::ResetSession => "reset_session",
        }
    }
}

/// Telemetry sample emitted by one drone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneReport {
    /// Stable drone identifier.
    pub id: String,
    /// Display name; the id is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Horizontal world coordinate.
    pub x: f64,
    /// Vertical world coordinate.
    pub y: f64,
    /// Battery fraction; out-of-range readings are clamped by the engine.
    pub battery: f64,
    /// Reported mission status.
    pub status: DroneStatus,
    /// Which controller produced the report.
    #[serde(default)]
    pub source: TelemetrySource,
    /// Waypoints the reporting controller is flying, if it tracks any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waypoints: Option<Vec<Position>>,
    /// Progress through the waypoint list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waypoint_index: Option<usize>,
    /// Thermal detections made since the previous report.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detections: Vec<DetectionReport>,
    /// Survivor the drone is flying to, when `status` is `responding`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responding_to: Option<String>,
}

impl DroneReport {
    /// Position carried by the report.
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// A single survivor detection carried inside a drone report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Survivor identifier assigned by the detecting side.
    pub id: String,
    /// Horizontal world coordinate.
    pub x: f64,
    /// Vertical world coordinate.
    pub y: f64,
    /// Detection confidence; clamped into `[0, 1]` by the engine.
    pub confidence: f64,
}

/// Cells covered by a drone's sensor footprint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanReport {
    /// Reporting drone, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drone_id: Option<String>,
    /// Scanned cells as `[gx, gy]` pairs.
    pub cells: Vec<CellCoord>,
}

/// Rescue completion event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescueReport {
    /// Survivor that has been rescued.
    pub survivor_id: String,
    /// Drone that completed the rescue.
    pub drone_id: String,
}

/// Operator request to have an area scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Horizontal world coordinate of the area centre.
    pub x: f64,
    /// Vertical world coordinate of the area centre.
    pub y: f64,
    /// Requested radius in world units, if the operator gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    /// Console or operator that raised the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

impl ScanRequest {
    /// Centre of the requested area.
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

fn full_confidence() -> f64 {
    1.0
}

/// Survivor reported directly by an operator, e.g. from a video feed.
///
/// Shares the detection id space with drone reports, so re-sending the same
/// id never creates a second survivor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualDetection {
    /// Survivor identifier.
    pub id: String,
    /// Horizontal world coordinate.
    pub x: f64,
    /// Vertical world coordinate.
    pub y: f64,
    /// Confidence; a human confirmation defaults to certain.
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    /// Operator or drone credited with the sighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<String>,
}

impl ManualDetection {
    /// The sighting as a regular detection record.
    pub fn detection(&self) -> DetectionReport {
        DetectionReport {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
            confidence: self.confidence,
        }
    }
}

/// Operator command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Switch between auto and manual control.
    SetMode,
    /// Replace the manual waypoint list.
    SetWaypoints,
}

/// Operator override command as received on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualCommand {
    /// Target drone.
    pub drone_id: String,
    /// Command verb.
    pub command: CommandKind,
    /// Requested mode for `set_mode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ControlMode>,
    /// Requested waypoints for `set_waypoints`, each `[x, y]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waypoints: Option<Vec<Position>>,
}

impl ManualCommand {
    /// Build a `set_mode` command.
    pub fn set_mode(drone_id: impl Into<String>, mode: ControlMode) -> Self {
        Self {
            drone_id: drone_id.into(),
            command: CommandKind::SetMode,
            mode: Some(mode),
            waypoints: None,
        }
    }

    /// Build a `set_waypoints` command.
    pub fn set_waypoints(drone_id: impl Into<String>, waypoints: Vec<Position>) -> Self {
        Self {
            drone_id: drone_id.into(),
            command: CommandKind::SetWaypoints,
            mode: None,
            waypoints: Some(waypoints),
        }
    }
}
