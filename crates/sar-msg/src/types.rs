//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema for telemetry ingress and observer broadcasts."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point in world units. Encoded on the wire as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Position {
    /// Horizontal world coordinate.
    pub x: f64,
    /// Vertical world coordinate.
    pub y: f64,
}

impl Position {
    /// Construct a position from its coordinates.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// True when both coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<[f64; 2]> for Position {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Position> for [f64; 2] {
    fn from(value: Position) -> Self {
        [value.x, value.y]
    }
}

/// Integer visibility-grid cell. Encoded on the wire as `[gx, gy]`.
///
/// Coordinates are signed so that out-of-bounds reports decode cleanly and
/// are discarded by the tracker instead of failing the whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[i64; 2]", into = "[i64; 2]")]
pub struct CellCoord {
    /// Column index.
    pub x: i64,
    /// Row index.
    pub y: i64,
}

impl CellCoord {
    /// Construct a cell coordinate.
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl From<[i64; 2]> for CellCoord {
    fn from([x, y]: [i64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<CellCoord> for [i64; 2] {
    fn from(value: CellCoord) -> Self {
        [value.x, value.y]
    }
}

impl From<(i64, i64)> for CellCoord {
    fn from((x, y): (i64, i64)) -> Self {
        Self { x, y }
    }
}

/// Mission status reported by a drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneStatus {
    /// Waiting for a mission.
    #[default]
    Idle,
    /// Sweeping cells for heat signatures.
    Scanning,
    /// En route to a detected survivor.
    Responding,
    /// Heading back to base.
    Returning,
}

impl DroneStatus {
    /// Wire label of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            DroneStatus::Idle => "idle",
            DroneStatus::Scanning => "scanning",
            DroneStatus::Responding => "responding",
            DroneStatus::Returning => "returning",
        }
    }
}

impl fmt::Display for DroneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who currently owns a drone's movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// The autonomous mission source drives the drone.
    #[default]
    Auto,
    /// An operator has taken control.
    Manual,
}

impl ControlMode {
    /// Telemetry source that is authoritative while in this mode.
    pub fn owning_source(&self) -> TelemetrySource {
        match self {
            ControlMode::Auto => TelemetrySource::Autonomous,
            ControlMode::Manual => TelemetrySource::Manual,
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Auto => f.write_str("auto"),
            ControlMode::Manual => f.write_str("manual"),
        }
    }
}

/// Origin of a drone report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    /// Autonomous mission execution (simulator or flight stack mission mode).
    #[default]
    Autonomous,
    /// Flight stack executing operator waypoints.
    Manual,
}

impl fmt::Display for TelemetrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetrySource::Autonomous => f.write_str("autonomous"),
            TelemetrySource::Manual => f.write_str("manual"),
        }
    }
}

/// Point-in-time view of one drone as carried in `fleet_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneState {
    /// Stable drone identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Horizontal world coordinate.
    pub x: f64,
    /// Vertical world coordinate.
    pub y: f64,
    /// Battery fraction in `[0, 1]`.
    pub battery: f64,
    /// Reported mission status.
    pub status: DroneStatus,
    /// Current control owner.
    pub control_mode: ControlMode,
    /// Ordered operator waypoints.
    #[serde(default)]
    pub waypoints: Vec<Position>,
    /// Index of the waypoint currently being flown to.
    #[serde(default)]
    pub waypoint_index: usize,
    /// Survivor this drone is currently responding to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responding_to: Option<String>,
    /// True when no telemetry arrived within the staleness timeout.
    #[serde(default)]
    pub stale: bool,
}

impl DroneState {
    /// Position of the drone.
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Detected survivor and their rescue lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survivor {
    /// Stable survivor identifier assigned at detection.
    pub id: String,
    /// Horizontal world coordinate.
    pub x: f64,
    /// Vertical world coordinate.
    pub y: f64,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Drone that first detected the survivor.
    pub detected_by: String,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
    /// Drone assigned to the rescue, once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescuer: Option<String>,
    /// Whether the rescue completed.
    #[serde(default)]
    pub rescued: bool,
}

impl Survivor {
    /// Position of the survivor.
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Thermal bloom reference data, revealed only once its cell is scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatSignature {
    /// Stable identifier.
    pub id: String,
    /// Horizontal world coordinate.
    pub x: f64,
    /// Vertical world coordinate.
    pub y: f64,
    /// Relative intensity in `[0, 1]`.
    pub intensity: f64,
    /// Bloom diameter in world units.
    pub size: f64,
}

/// Alert classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// A new survivor was detected.
    SurvivorDetected,
    /// A drone was assigned to rescue a survivor.
    RescueNeeded,
    /// A drone turned back with a low battery.
    DroneLowBattery,
    /// An operator asked for an area to be scanned.
    ScanRequested,
    /// Session lifecycle and link health notices.
    System,
}

/// Optional structured context attached to an alert.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Primary entity (survivor or drone) the alert is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Secondary entity, e.g. the drone that detected or rescues a survivor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    /// Location the alert refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl AlertPayload {
    /// Payload naming a single entity.
    pub fn entity(id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Attach a secondary entity.
    pub fn with_related(mut self, id: impl Into<String>) -> Self {
        self.related_id = Some(id.into());
        self
    }

    /// Attach a location.
    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

/// Immutable alert record published on the alert bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Strictly increasing sequence number assigned on publish.
    pub sequence: u64,
    /// Alert classification.
    #[serde(rename = "type")]
    pub kind: AlertKind,
    /// Human readable message.
    pub message: String,
    /// Optional structured context.
    #[serde(default)]
    pub payload: AlertPayload,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn positions_and_cells_use_array_encoding() {
        let position: Position = serde_json::from_value(json!([100.0, 250.5])).unwrap();
        assert_eq!(position, Position::new(100.0, 250.5));
        assert_eq!(serde_json::to_value(position).unwrap(), json!([100.0, 250.5]));

        let cell: CellCoord = serde_json::from_value(json!([-1, 29])).unwrap();
        assert_eq!(cell, CellCoord::new(-1, 29));
    }

    #[test]
    fn alert_kind_serialises_as_screaming_snake_case() {
        let alert = Alert {
            sequence: 3,
            kind: AlertKind::DroneLowBattery,
            message: "D-1 returning".into(),
            payload: AlertPayload::entity("D-1"),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["type"], "DRONE_LOW_BATTERY");
        assert_eq!(value["payload"]["entity_id"], "D-1");
        assert!(value["payload"].get("position").is_none());
    }

    #[test]
    fn mode_maps_to_owning_source() {
        assert_eq!(
            ControlMode::Auto.owning_source(),
            TelemetrySource::Autonomous
        );
        assert_eq!(ControlMode::Manual.owning_source(), TelemetrySource::Manual);
    }
}
