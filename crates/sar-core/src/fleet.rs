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
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use sar_msg::{ControlMode, DroneReport, DroneState, DroneStatus, Position, TelemetrySource};
use tracing::{debug, info};

use crate::error::EngineError;

#[derive(Debug)]
struct DroneRecord {
    state: DroneState,
    last_seen: Instant,
    /// Source of the last accepted report.
    source: TelemetrySource,
}

impl DroneRecord {
    fn from_report(report: &DroneReport, now: Instant) -> Self {
        let waypoints = report.waypoints.clone().unwrap_or_default();
        Self {
            state: DroneState {
                id: report.id.clone(),
                name: report.name.clone().unwrap_or_else(|| report.id.clone()),
                x: report.x,
                y: report.y,
                battery: report.battery,
                status: report.status,
                control_mode: ControlMode::Auto,
                waypoints: waypoints.clone(),
                waypoint_index: report.waypoint_index.unwrap_or(0).min(waypoints.len()),
                responding_to: match report.status {
                    DroneStatus::Responding => report.responding_to.clone(),
                    _ => None,
                },
                stale: false,
            },
            last_seen: now,
            source: report.source,
        }
    }
}

/// Result of applying one accepted drone report.
#[derive(Debug, Clone)]
pub struct TelemetryApplied {
    pub created: bool,
    /// Status before this report; `None` for a newly created drone.
    pub previous_status: Option<DroneStatus>,
    pub state: DroneState,
}

/// Result of a control-mode or waypoint change.
#[derive(Debug, Clone)]
pub struct ControlChange {
    pub state: DroneState,
    /// Mode the drone was in before the change.
    pub previous_mode: ControlMode,
}

impl ControlChange {
    pub fn mode_changed(&self) -> bool {
        self.previous_mode != self.state.control_mode
    }
}

/// Canonical drone state.
///
/// The outer map lock is only write-locked to insert a new drone. Updates to an
/// existing drone serialise on that drone's own mutex, so reports for different
/// drones proceed in parallel.
#[derive(Debug, Default)]
pub struct FleetStateStore {
    drones: RwLock<IndexMap<String, Arc<Mutex<DroneRecord>>>>,
}

impl FleetStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, drone_id: &str) -> Option<Arc<Mutex<DroneRecord>>> {
        self.drones.read().get(drone_id).cloned()
    }

    /// Apply a validated report from `report.source`.
    ///
    /// Creates the drone on first sight. A report from the source that does not
    /// own the drone's current control mode fails with `ModeConflict` and leaves
    /// the record untouched.
    pub fn upsert_telemetry(
        &self,
        report: &DroneReport,
        now: Instant,
    ) -> Result<TelemetryApplied, EngineError> {
        let entry = match self.entry(&report.id) {
            Some(entry) => entry,
            None => {
                if report.source != TelemetrySource::Autonomous {
                    return Err(EngineError::ModeConflict {
                        drone_id: report.id.clone(),
                        mode: ControlMode::Auto,
                        origin: report.source,
                    });
                }
                let mut drones = self.drones.write();
                let mut inserted = false;
                let entry = drones
                    .entry(report.id.clone())
                    .or_insert_with(|| {
                        inserted = true;
                        Arc::new(Mutex::new(DroneRecord::from_report(report, now)))
                    })
                    .clone();
                drop(drones);
                if inserted {
                    info!(drone = %report.id, "drone registered");
                    let state = entry.lock().state.clone();
                    return Ok(TelemetryApplied {
                        created: true,
                        previous_status: None,
                        state,
                    });
                }
                entry
            }
        };

        let mut record = entry.lock();
        let owner = record.state.control_mode.owning_source();
        if report.source != owner {
            return Err(EngineError::ModeConflict {
                drone_id: report.id.clone(),
                mode: record.state.control_mode,
                origin: report.source,
            });
        }

        let previous_status = record.state.status;
        record.last_seen = now;
        record.source = report.source;
        let state = &mut record.state;
        state.stale = false;
        if let Some(name) = &report.name {
            state.name.clone_from(name);
        }
        state.x = report.x;
        state.y = report.y;
        state.battery = report.battery;
        state.status = report.status;
        match state.control_mode {
            ControlMode::Auto => {
                if let Some(waypoints) = &report.waypoints {
                    state.waypoints.clone_from(waypoints);
                }
            }
            // Operator waypoints stay authoritative; the flight stack only reports progress.
            ControlMode::Manual => {}
        }
        if let Some(index) = report.waypoint_index {
            state.waypoint_index = index;
        }
        state.waypoint_index = state.waypoint_index.min(state.waypoints.len());
        state.responding_to = match report.status {
            DroneStatus::Responding => report
                .responding_to
                .clone()
                .or_else(|| state.responding_to.take()),
            _ => None,
        };

        Ok(TelemetryApplied {
            created: false,
            previous_status: Some(previous_status),
            state: state.clone(),
        })
    }

    /// Refresh liveness without touching any other field. Returns true when the
    /// drone was stale and is now live again.
    pub fn touch(&self, drone_id: &str, now: Instant) -> bool {
        let Some(entry) = self.entry(drone_id) else {
            return false;
        };
        let mut record = entry.lock();
        record.last_seen = now;
        std::mem::replace(&mut record.state.stale, false)
    }

    pub fn set_control_mode(
        &self,
        drone_id: &str,
        mode: ControlMode,
    ) -> Result<ControlChange, EngineError> {
        let entry = self
            .entry(drone_id)
            .ok_or_else(|| EngineError::drone_not_found(drone_id))?;
        let mut record = entry.lock();
        let previous_mode = record.state.control_mode;
        record.state.control_mode = mode;
        if mode == ControlMode::Auto && previous_mode == ControlMode::Manual {
            // The autonomous source regenerates its own mission.
            record.state.waypoints.clear();
            record.state.waypoint_index = 0;
        }
        debug!(drone = drone_id, from = %previous_mode, to = %mode, "control mode set");
        Ok(ControlChange {
            state: record.state.clone(),
            previous_mode,
        })
    }

    /// Replace the waypoint list. A drone in auto mode is switched to manual first.
    pub fn set_waypoints(
        &self,
        drone_id: &str,
        waypoints: Vec<Position>,
    ) -> Result<ControlChange, EngineError> {
        let entry = self
            .entry(drone_id)
            .ok_or_else(|| EngineError::drone_not_found(drone_id))?;
        let mut record = entry.lock();
        let previous_mode = record.state.control_mode;
        record.state.control_mode = ControlMode::Manual;
        record.state.waypoints = waypoints;
        record.state.waypoint_index = 0;
        debug!(
            drone = drone_id,
            waypoints = record.state.waypoints.len(),
            implicit_takeover = previous_mode == ControlMode::Auto,
            "waypoints set"
        );
        Ok(ControlChange {
            state: record.state.clone(),
            previous_mode,
        })
    }

    /// Flag drones silent for longer than `timeout`. Only newly stale drones are returned.
    pub fn mark_stale(&self, now: Instant, timeout: Duration) -> Vec<DroneState> {
        let drones = self.drones.read();
        let mut newly_stale = Vec::new();
        for entry in drones.values() {
            let mut record = entry.lock();
            if record.state.stale {
                continue;
            }
            if now.saturating_duration_since(record.last_seen) > timeout {
                record.state.stale = true;
                newly_stale.push(record.state.clone());
            }
        }
        newly_stale
    }

    /// Consistent copy of every drone in first-seen order.
    pub fn snapshot(&self) -> Vec<DroneState> {
        let drones = self.drones.read();
        drones
            .values()
            .map(|entry| entry.lock().state.clone())
            .collect()
    }

    pub fn get(&self, drone_id: &str) -> Option<DroneState> {
        self.entry(drone_id).map(|entry| entry.lock().state.clone())
    }

    /// Source of the last report accepted for the drone.
    pub fn last_source(&self, drone_id: &str) -> Option<TelemetrySource> {
        self.entry(drone_id).map(|entry| entry.lock().source)
    }

    pub fn len(&self) -> usize {
        self.drones.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drones.read().is_empty()
    }

    pub fn stale_count(&self) -> usize {
        let drones = self.drones.read();
        drones.values().filter(|entry| entry.lock().state.stale).count()
    }

    /// Drop every drone. Only used for a full session restart.
    pub fn clear(&self) {
        self.drones.write().clear();
    }
}
