//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Decode, validate, and apply inbound messages.
//!
//! Everything a message changes is validated before the first store is
//! touched, so a rejected message never leaves partial state behind.

use std::sync::Arc;

use chrono::Utc;
use sar_msg::{
    AlertKind, AlertPayload, DroneReport, DroneStatus, InboundMessage, ManualDetection, Position,
    RescueReport, ScanReport, ScanRequest,
};
use tracing::{debug, warn};

use crate::commands::{CommandOutcome, CommandRouter};
use crate::engine::SituationEngine;
use crate::error::{EngineError, ValidationError};
use crate::survivors::{Registration, RescueAssignment};

/// Kind of connection a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Drone or flight-stack telemetry link.
    Drone,
    /// Operator console or observer link.
    Operator,
    /// In-process callers (simulator, tests) may send anything.
    Internal,
}

impl LinkRole {
    pub fn permits(&self, message: &InboundMessage) -> bool {
        match self {
            LinkRole::Internal => true,
            LinkRole::Drone => matches!(
                message,
                InboundMessage::DroneReport(_)
                    | InboundMessage::ScanReport(_)
                    | InboundMessage::RescueReport(_)
            ),
            LinkRole::Operator => matches!(
                message,
                InboundMessage::ManualCommand(_)
                    | InboundMessage::ResetSession
                    | InboundMessage::ScanRequest(_)
                    | InboundMessage::ManualDetection(_)
            ),
        }
    }
}

/// What an accepted message changed.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Drone {
        drone_id: String,
        created: bool,
        new_survivors: usize,
        alerts: usize,
    },
    Scan {
        revealed: usize,
    },
    Rescue {
        survivor_id: String,
        changed: bool,
    },
    Command(CommandOutcome),
    ScanRequested {
        sequence: u64,
    },
    Sighting {
        survivor_id: String,
        created: bool,
    },
    SessionReset {
        epoch: u64,
    },
}

/// Entry point for every inbound message regardless of transport.
#[derive(Debug, Clone)]
pub struct TelemetryIngress {
    engine: Arc<SituationEngine>,
    commands: CommandRouter,
}

impl TelemetryIngress {
    pub fn new(engine: Arc<SituationEngine>) -> Self {
        let commands = CommandRouter::new(engine.clone());
        Self { engine, commands }
    }

    pub fn engine(&self) -> &Arc<SituationEngine> {
        &self.engine
    }

    pub fn commands(&self) -> &CommandRouter {
        &self.commands
    }

    /// Decode one JSON text frame and apply it.
    pub fn ingest_json(&self, text: &str) -> Result<IngestOutcome, EngineError> {
        self.ingest_json_as(LinkRole::Internal, text)
    }

    pub fn ingest_json_as(&self, role: LinkRole, text: &str) -> Result<IngestOutcome, EngineError> {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => self.ingest_as(role, message),
            Err(err) => {
                warn!(error = %err, "dropping undecodable message");
                self.record_rejected("decode");
                Err(EngineError::Decode(err))
            }
        }
    }

    pub fn ingest(&self, message: InboundMessage) -> Result<IngestOutcome, EngineError> {
        self.ingest_as(LinkRole::Internal, message)
    }

    pub fn ingest_as(
        &self,
        role: LinkRole,
        message: InboundMessage,
    ) -> Result<IngestOutcome, EngineError> {
        let kind = message.kind();
        if !role.permits(&message) {
            warn!(kind, ?role, "message not accepted on this link");
            self.record_rejected("unsupported");
            return Err(EngineError::Unsupported { kind });
        }

        let result = match message {
            InboundMessage::DroneReport(report) => self.apply_drone_report(report),
            InboundMessage::ScanReport(report) => Ok(self.apply_scan_report(report)),
            InboundMessage::RescueReport(report) => self.apply_rescue_report(report),
            InboundMessage::ScanRequest(request) => self.apply_scan_request(request),
            InboundMessage::ManualDetection(sighting) => self.apply_manual_detection(sighting),
            InboundMessage::ManualCommand(command) => {
                return self.commands.handle_manual(command).map(IngestOutcome::Command);
            }
            InboundMessage::ResetSession => {
                let epoch = self.commands.reset_session();
                return Ok(IngestOutcome::SessionReset { epoch });
            }
        };

        match &result {
            Ok(_) => {
                if let Some(metrics) = self.engine.metrics() {
                    metrics.record_accepted(kind);
                }
            }
            Err(EngineError::ModeConflict { drone_id, .. }) => {
                debug!(drone = %drone_id, "report from non-owning source ignored");
                self.record_rejected("mode_conflict");
            }
            Err(err) => {
                warn!(kind, error = %err, "dropping invalid message");
                self.record_rejected(err.reason());
            }
        }
        result
    }

    fn apply_drone_report(&self, mut report: DroneReport) -> Result<IngestOutcome, EngineError> {
        validate_report(&report)?;
        report.battery = report.battery.clamp(0.0, 1.0);

        // Same clock the staleness sweeper ticks on.
        let now = tokio::time::Instant::now().into_std();
        let fleet = self.engine.fleet();
        let applied = match fleet.upsert_telemetry(&report, now) {
            Ok(applied) => applied,
            Err(err @ EngineError::ModeConflict { .. }) => {
                if fleet.touch(&report.id, now) {
                    self.engine.mark_changed();
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let state = &applied.state;
        let mut alerts = 0;

        let entered_returning = state.status == DroneStatus::Returning
            && applied.previous_status != Some(DroneStatus::Returning);
        if entered_returning && state.battery < self.engine.settings().low_battery_threshold {
            self.engine.alerts().publish(
                AlertKind::DroneLowBattery,
                format!(
                    "{} returning ({:.0}% battery)",
                    state.name,
                    state.battery * 100.0
                ),
                AlertPayload::entity(state.id.clone()).at(state.position()),
            );
            alerts += 1;
        }

        let mut new_survivors = 0;
        let detected_at = Utc::now();
        for detection in &report.detections {
            let registration =
                self.engine
                    .survivors()
                    .register_detection(detection, &state.id, detected_at);
            if let Registration::Created(survivor) = registration {
                self.engine.alerts().publish(
                    AlertKind::SurvivorDetected,
                    format!("{} detected heat signature", state.name),
                    AlertPayload::entity(survivor.id.clone())
                        .with_related(state.id.clone())
                        .at(survivor.position()),
                );
                new_survivors += 1;
                alerts += 1;
            }
        }

        if let (DroneStatus::Responding, Some(survivor_id)) =
            (state.status, report.responding_to.as_deref())
        {
            match self.engine.survivors().assign_rescue(survivor_id, &state.id) {
                Ok(RescueAssignment::Assigned { survivor, previous }) => {
                    if let Some(previous) = previous {
                        debug!(survivor = %survivor.id, from = %previous, to = %state.id, "rescue reassigned");
                    }
                    self.engine.alerts().publish(
                        AlertKind::RescueNeeded,
                        format!("{} responding to survivor {}", state.name, survivor.id),
                        AlertPayload::entity(survivor.id.clone())
                            .with_related(state.id.clone())
                            .at(survivor.position()),
                    );
                    alerts += 1;
                }
                Ok(RescueAssignment::Unchanged | RescueAssignment::AlreadyRescued) => {}
                Err(err) => {
                    debug!(drone = %state.id, error = %err, "rescue target unknown");
                }
            }
        }

        self.engine.mark_changed();
        Ok(IngestOutcome::Drone {
            drone_id: applied.state.id.clone(),
            created: applied.created,
            new_survivors,
            alerts,
        })
    }

    fn apply_scan_report(&self, report: ScanReport) -> IngestOutcome {
        let revealed = self.engine.visibility().mark_scanned(report.cells).len();
        if revealed > 0 {
            self.engine.mark_changed();
        }
        IngestOutcome::Scan { revealed }
    }

    fn apply_rescue_report(&self, report: RescueReport) -> Result<IngestOutcome, EngineError> {
        if report.survivor_id.trim().is_empty() {
            return Err(ValidationError::Empty("survivor_id").into());
        }
        if report.drone_id.trim().is_empty() {
            return Err(ValidationError::Empty("drone_id").into());
        }
        let rescued = self
            .engine
            .survivors()
            .mark_rescued(&report.survivor_id, &report.drone_id)?;
        let changed = rescued.is_some();
        if let Some(survivor) = rescued {
            let name = self
                .engine
                .fleet()
                .get(&report.drone_id)
                .map(|drone| drone.name)
                .unwrap_or_else(|| report.drone_id.clone());
            self.engine.publish_alert(
                AlertKind::System,
                format!("{name} rescued survivor {}", survivor.id),
                AlertPayload::entity(survivor.id.clone())
                    .with_related(report.drone_id.clone())
                    .at(survivor.position()),
            );
        }
        Ok(IngestOutcome::Rescue {
            survivor_id: report.survivor_id,
            changed,
        })
    }

    fn apply_scan_request(&self, request: ScanRequest) -> Result<IngestOutcome, EngineError> {
        let position = request.position();
        if !position.is_finite() {
            return Err(ValidationError::NonFinite("position").into());
        }
        if matches!(request.radius, Some(radius) if !radius.is_finite() || radius < 0.0) {
            return Err(ValidationError::NonFinite("radius").into());
        }
        let mut payload = AlertPayload::default().at(position);
        payload.entity_id = request.requested_by;
        let sequence = self.engine.publish_alert(
            AlertKind::ScanRequested,
            format!("Scan requested for area ({:.0}, {:.0})", position.x, position.y),
            payload,
        );
        Ok(IngestOutcome::ScanRequested { sequence })
    }

    fn apply_manual_detection(
        &self,
        sighting: ManualDetection,
    ) -> Result<IngestOutcome, EngineError> {
        if sighting.id.trim().is_empty() {
            return Err(ValidationError::Empty("id").into());
        }
        let detection = sighting.detection();
        if !Position::new(detection.x, detection.y).is_finite() {
            return Err(ValidationError::NonFinite("position").into());
        }
        if !detection.confidence.is_finite() {
            return Err(ValidationError::NonFinite("confidence").into());
        }
        let reporter = match sighting.reported_by.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => "operator",
        };
        let registration =
            self.engine
                .survivors()
                .register_detection(&detection, reporter, Utc::now());
        let created = match registration {
            Registration::Created(survivor) => {
                self.engine.publish_alert(
                    AlertKind::SurvivorDetected,
                    format!("{reporter} reported survivor {}", survivor.id),
                    AlertPayload::entity(survivor.id.clone())
                        .with_related(reporter.to_owned())
                        .at(survivor.position()),
                );
                true
            }
            Registration::Duplicate => false,
        };
        Ok(IngestOutcome::Sighting {
            survivor_id: detection.id,
            created,
        })
    }

    fn record_rejected(&self, reason: &str) {
        if let Some(metrics) = self.engine.metrics() {
            metrics.record_rejected(reason);
        }
    }
}

fn validate_report(report: &DroneReport) -> Result<(), ValidationError> {
    if report.id.trim().is_empty() {
        return Err(ValidationError::Empty("id"));
    }
    if !report.position().is_finite() {
        return Err(ValidationError::NonFinite("position"));
    }
    if !report.battery.is_finite() {
        return Err(ValidationError::NonFinite("battery"));
    }
    if let Some(waypoints) = &report.waypoints {
        if !waypoints.iter().all(Position::is_finite) {
            return Err(ValidationError::NonFinite("waypoints"));
        }
    }
    if matches!(report.responding_to.as_deref(), Some(id) if id.trim().is_empty()) {
        return Err(ValidationError::Empty("responding_to"));
    }
    for detection in &report.detections {
        if detection.id.trim().is_empty() {
            return Err(ValidationError::Empty("detections.id"));
        }
        if !Position::new(detection.x, detection.y).is_finite() {
            return Err(ValidationError::NonFinite("detections.position"));
        }
        if !detection.confidence.is_finite() {
            return Err(ValidationError::NonFinite("detections.confidence"));
        }
    }
    Ok(())
}
