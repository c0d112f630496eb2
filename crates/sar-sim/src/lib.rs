//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Seeded autonomous mission source for the fleet engine.
//!
//! The simulator plays the part of the drones' onboard flight stacks: it
//! reads operator overrides back from the engine and reports through the same
//! ingress path a real drone link would use.

pub mod drone;
pub mod mission;

pub use drone::{callsign, SimDrone, Task};
pub use mission::MissionSimulator;
