//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema for telemetry ingress and observer broadcasts."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Wire schema shared between drone links, operator consoles, and observers.
//!
//! Every message is a JSON object tagged by its `type` field.
#![warn(missing_docs)]

pub mod inbound;
pub mod outbound;
pub mod types;

pub use inbound::{
    CommandKind, DetectionReport, DroneReport, InboundMessage, ManualCommand, ManualDetection,
    RescueReport, ScanReport, ScanRequest,
};
pub use outbound::{ErrorNotice, FleetUpdate, OutboundMessage, ScanUpdate};
pub use types::{
    Alert, AlertKind, AlertPayload, CellCoord, ControlMode, DroneState, DroneStatus,
    HeatSignature, Position, Survivor, TelemetrySource,
};
