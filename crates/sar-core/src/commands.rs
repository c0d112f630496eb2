//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use sar_msg::{CommandKind, ControlMode, ManualCommand, Position};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::SituationEngine;
use crate::error::{EngineError, ValidationError};

/// Validated operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMode {
        drone_id: String,
        mode: ControlMode,
    },
    SetWaypoints {
        drone_id: String,
        waypoints: Vec<Position>,
    },
}

impl Command {
    pub fn drone_id(&self) -> &str {
        match self {
            Command::SetMode { drone_id, .. } | Command::SetWaypoints { drone_id, .. } => drone_id,
        }
    }
}

impl TryFrom<ManualCommand> for Command {
    type Error = ValidationError;

    fn try_from(command: ManualCommand) -> Result<Self, Self::Error> {
        if command.drone_id.trim().is_empty() {
            return Err(ValidationError::Empty("drone_id"));
        }
        match command.command {
            CommandKind::SetMode => {
                let mode = command.mode.ok_or(ValidationError::Missing("mode"))?;
                Ok(Command::SetMode {
                    drone_id: command.drone_id,
                    mode,
                })
            }
            CommandKind::SetWaypoints => {
                let waypoints = command
                    .waypoints
                    .ok_or(ValidationError::Missing("waypoints"))?;
                if !waypoints.iter().all(Position::is_finite) {
                    return Err(ValidationError::NonFinite("waypoints"));
                }
                Ok(Command::SetWaypoints {
                    drone_id: command.drone_id,
                    waypoints,
                })
            }
        }
    }
}

/// Resulting control state of the commanded drone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub drone_id: String,
    pub mode: ControlMode,
    pub waypoints: Vec<Position>,
    pub mode_changed: bool,
}

/// Applies operator overrides to the fleet store.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    engine: Arc<SituationEngine>,
}

impl CommandRouter {
    pub fn new(engine: Arc<SituationEngine>) -> Self {
        Self { engine }
    }

    pub fn handle_manual(&self, command: ManualCommand) -> Result<CommandOutcome, EngineError> {
        match Command::try_from(command) {
            Ok(command) => self.handle(command),
            Err(err) => {
                self.record("validation");
                warn!(error = %err, "manual command rejected");
                Err(err.into())
            }
        }
    }

    pub fn handle(&self, command: Command) -> Result<CommandOutcome, EngineError> {
        let fleet = self.engine.fleet();
        let result = match &command {
            Command::SetMode { drone_id, mode } => fleet.set_control_mode(drone_id, *mode),
            Command::SetWaypoints {
                drone_id,
                waypoints,
            } => fleet.set_waypoints(drone_id, waypoints.clone()),
        };
        match result {
            Ok(change) => {
                self.engine.mark_changed();
                self.record("applied");
                info!(
                    drone = %change.state.id,
                    mode = %change.state.control_mode,
                    waypoints = change.state.waypoints.len(),
                    "operator command applied"
                );
                Ok(CommandOutcome {
                    mode_changed: change.mode_changed(),
                    drone_id: change.state.id,
                    mode: change.state.control_mode,
                    waypoints: change.state.waypoints,
                })
            }
            Err(err) => {
                self.record(err.reason());
                warn!(drone = command.drone_id(), error = %err, "operator command rejected");
                Err(err)
            }
        }
    }

    /// Restart the session. Returns the new epoch.
    pub fn reset_session(&self) -> u64 {
        self.record("reset");
        self.engine.reset_session()
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = self.engine.metrics() {
            metrics.record_command(outcome);
        }
    }
}
