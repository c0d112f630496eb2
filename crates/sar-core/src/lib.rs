//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Authoritative fleet model for search-and-rescue operations.
//!
//! Telemetry enters through [`TelemetryIngress`], operator overrides through
//! [`CommandRouter`], and observers are fed exclusively by the
//! [`BroadcastScheduler`].

pub mod alerts;
pub mod broadcast;
pub mod commands;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod heat;
pub mod ingress;
pub mod survivors;
pub mod sweeper;
pub mod visibility;
pub mod world;

pub use alerts::{AlertBus, DEFAULT_ALERT_CAPACITY};
pub use broadcast::{BroadcastFrame, BroadcastHub, BroadcastScheduler};
pub use commands::{Command, CommandOutcome, CommandRouter};
pub use engine::{EngineSettings, EngineStatus, SituationEngine};
pub use error::{EngineError, EntityKind, ValidationError};
pub use fleet::{ControlChange, FleetStateStore, TelemetryApplied};
pub use heat::HeatField;
pub use ingress::{IngestOutcome, LinkRole, TelemetryIngress};
pub use survivors::{Registration, RescueAssignment, SurvivorRegistry};
pub use sweeper::{Cadence, StaleSweeper};
pub use visibility::VisibilityTracker;
pub use world::WorldGrid;
