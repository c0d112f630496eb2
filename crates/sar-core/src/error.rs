//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use sar_msg::{ControlMode, TelemetrySource};
use thiserror::Error;

/// Entity families addressed by identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Drone,
    Survivor,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Drone => f.write_str("drone"),
            EntityKind::Survivor => f.write_str("survivor"),
        }
    }
}

/// Field-level input problems. The offending message is dropped whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} must be a finite number")]
    NonFinite(&'static str),
    #[error("{0} is required for this command")]
    Missing(&'static str),
}

/// Per-message failures. None of these are fatal to the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("drone {drone_id} is under {mode} control; {origin} report ignored")]
    ModeConflict {
        drone_id: String,
        mode: ControlMode,
        origin: TelemetrySource,
    },
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{kind} messages are not accepted on this link")]
    Unsupported { kind: &'static str },
}

impl EngineError {
    pub fn drone_not_found(id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind: EntityKind::Drone,
            id: id.into(),
        }
    }

    pub fn survivor_not_found(id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind: EntityKind::Survivor,
            id: id.into(),
        }
    }

    /// Stable label used for metrics and error notices.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::ModeConflict { .. } => "mode_conflict",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Decode(_) => "decode",
            EngineError::Unsupported { .. } => "unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_entity() {
        let err = EngineError::survivor_not_found("s-9");
        assert_eq!(err.to_string(), "survivor s-9 not found");
        assert_eq!(err.reason(), "not_found");

        let conflict = EngineError::ModeConflict {
            drone_id: "D-1".into(),
            mode: ControlMode::Manual,
            origin: TelemetrySource::Autonomous,
        };
        assert_eq!(
            conflict.to_string(),
            "drone D-1 is under manual control; autonomous report ignored"
        );
    }
}
