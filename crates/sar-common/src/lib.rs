//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the fleet engine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the SAR fleet workspace.
//! This crate exposes configuration loading and logging setup consumed
//! by the engine, the network surface, and the daemon.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, BroadcastConfig, FleetConfig, LoadedAppConfig, LoggingConfig, ServerConfig,
    SimulationConfig, WorldConfig,
};
pub use logging::{init_tracing, FilterSource, LogFormat, LogGuards};
