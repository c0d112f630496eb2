//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Drone, observer, and operator network surfaces."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! One axum server carrying drone telemetry links, observer streams, and the
//! operator REST API.
#![warn(missing_docs)]

pub mod rest;
pub mod server;
mod websocket;

pub use rest::StatusSnapshot;
pub use server::{
    FleetServerBuilder, FleetServerHandle, DEFAULT_MAX_DRONE_LINKS, DEFAULT_MAX_OBSERVERS,
};
