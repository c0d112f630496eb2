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

use crate::types::{Alert, CellCoord, DroneState, HeatSignature, Survivor};

/// Messages pushed to observer connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Fleet, survivor, and alert state.
    FleetUpdate(FleetUpdate),
    /// Newly revealed cells, or the entire bitmap on a full sync.
    ScanUpdate(ScanUpdate),
}

/// Coalesced fleet view emitted once per broadcast tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FleetUpdate {
    /// Broadcast tick sequence; zero for on-demand full syncs.
    pub sequence: u64,
    /// Session epoch; changes when the session is reset.
    pub epoch: u64,
    /// Every known drone in first-seen order.
    pub drones: Vec<DroneState>,
    /// Every known survivor in detection order.
    pub survivors: Vec<Survivor>,
    /// Heat signatures located in scanned cells.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heat_signatures: Vec<HeatSignature>,
    /// Alerts the receiving observer has not seen yet.
    pub alerts_delta: Vec<Alert>,
    /// Fraction of the world scanned so far.
    pub coverage: f64,
}

/// Visibility change notification.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanUpdate {
    /// Broadcast tick sequence; zero for on-demand full syncs.
    pub sequence: u64,
    /// Session epoch; changes when the session is reset.
    pub epoch: u64,
    /// True when `cells` is the entire scanned set rather than a delta.
    pub full: bool,
    /// Scanned cells as `[gx, gy]` pairs.
    pub cells: Vec<CellCoord>,
}

/// Reply sent on the same link to a peer whose message was rejected.
///
/// Encoded untagged as `{"error": "...", "reason": "..."}`; the link stays open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Human readable detail.
    pub error: String,
    /// Stable error category.
    pub reason: String,
}

impl ErrorNotice {
    /// Build a notice from a category and detail message.
    pub fn new(reason: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: reason.into(),
        }
    }
}
