//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sar_common::AppConfig;
use sar_metrics::EngineMetrics;
use sar_msg::{AlertKind, AlertPayload, HeatSignature};
use serde::Serialize;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::alerts::AlertBus;
use crate::fleet::FleetStateStore;
use crate::heat::HeatField;
use crate::survivors::SurvivorRegistry;
use crate::visibility::VisibilityTracker;
use crate::world::WorldGrid;

/// Tunables for one engine instance, derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub world: WorldGrid,
    pub prescanned_corner: u32,
    pub heat_signature_count: usize,
    pub heat_seed: u64,
    pub low_battery_threshold: f64,
    pub stale_timeout: Duration,
    pub sweep_interval: Duration,
    pub broadcast_interval: Duration,
    pub alert_capacity: usize,
    pub channel_capacity: usize,
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            world: WorldGrid::from_config(&config.world),
            prescanned_corner: config.world.prescanned_corner,
            heat_signature_count: config.world.heat_signature_count,
            heat_seed: config.world.heat_seed,
            low_battery_threshold: config.fleet.low_battery_threshold,
            stale_timeout: config.fleet.stale_timeout,
            sweep_interval: config.fleet.sweep_interval,
            broadcast_interval: config.broadcast.interval,
            alert_capacity: config.broadcast.alert_capacity,
            channel_capacity: config.broadcast.channel_capacity,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Counts reported by `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub drones: usize,
    pub stale_drones: usize,
    pub survivors: usize,
    pub rescued: usize,
    pub coverage: f64,
    pub alert_sequence: u64,
    pub epoch: u64,
}

/// Authoritative situational model shared by ingress, commands and broadcast.
///
/// Every mutation goes through [`SituationEngine::mark_changed`], which bumps the
/// revision and wakes the broadcast scheduler.
#[derive(Debug)]
pub struct SituationEngine {
    settings: EngineSettings,
    fleet: FleetStateStore,
    survivors: SurvivorRegistry,
    visibility: VisibilityTracker,
    alerts: AlertBus,
    heat: RwLock<HeatField>,
    revision: AtomicU64,
    epoch: AtomicU64,
    changed: Notify,
    metrics: Option<EngineMetrics>,
}

impl SituationEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let world = settings.world;
        let visibility = VisibilityTracker::new(world);
        visibility.reveal_corner(settings.prescanned_corner);
        let heat = HeatField::generate(&world, settings.heat_signature_count, settings.heat_seed);
        let engine = Self {
            fleet: FleetStateStore::new(),
            survivors: SurvivorRegistry::new(),
            visibility,
            alerts: AlertBus::new(settings.alert_capacity),
            heat: RwLock::new(heat),
            revision: AtomicU64::new(0),
            epoch: AtomicU64::new(1),
            changed: Notify::new(),
            metrics: None,
            settings,
        };
        engine.publish_alert(
            AlertKind::System,
            "Session started",
            AlertPayload::default(),
        );
        engine
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn world(&self) -> &WorldGrid {
        &self.settings.world
    }

    pub fn fleet(&self) -> &FleetStateStore {
        &self.fleet
    }

    pub fn survivors(&self) -> &SurvivorRegistry {
        &self.survivors
    }

    pub fn visibility(&self) -> &VisibilityTracker {
        &self.visibility
    }

    pub fn alerts(&self) -> &AlertBus {
        &self.alerts
    }

    pub fn metrics(&self) -> Option<&EngineMetrics> {
        self.metrics.as_ref()
    }

    /// Heat signatures in scanned cells.
    pub fn visible_heat(&self) -> Vec<HeatSignature> {
        self.heat.read().visible(&self.visibility)
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Session counter. Changes only on [`SituationEngine::reset_session`].
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Record that observable state changed.
    pub fn mark_changed(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
        self.changed.notify_one();
    }

    /// Resolves after the next [`SituationEngine::mark_changed`], or immediately if
    /// one happened while nobody was waiting.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    pub fn publish_alert(
        &self,
        kind: AlertKind,
        message: impl Into<String>,
        payload: AlertPayload,
    ) -> u64 {
        let alert = self.alerts.publish(kind, message, payload);
        self.mark_changed();
        alert.sequence
    }

    /// Start a fresh session: empty fleet and survivor registry, base-only
    /// visibility, new heat field, new epoch. Alert history is kept.
    pub fn reset_session(&self) -> u64 {
        self.fleet.clear();
        self.survivors.clear();
        self.visibility.reset(self.settings.prescanned_corner);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        *self.heat.write() = HeatField::generate(
            &self.settings.world,
            self.settings.heat_signature_count,
            self.settings.heat_seed.wrapping_add(epoch),
        );
        info!(epoch, "session reset");
        self.publish_alert(AlertKind::System, "Session reset", AlertPayload::default());
        epoch
    }

    /// Flag drones that went silent. Returns how many became stale.
    pub fn sweep_stale(&self, now: Instant) -> usize {
        let stale = self.fleet.mark_stale(now, self.settings.stale_timeout);
        for drone in &stale {
            warn!(drone = %drone.id, "drone telemetry lost");
            self.alerts.publish(
                AlertKind::System,
                format!("{} telemetry lost", drone.name),
                AlertPayload::entity(drone.id.clone()).at(drone.position()),
            );
        }
        if !stale.is_empty() {
            self.mark_changed();
        }
        stale.len()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            drones: self.fleet.len(),
            stale_drones: self.fleet.stale_count(),
            survivors: self.survivors.len(),
            rescued: self.survivors.rescued_count(),
            coverage: self.visibility.coverage(),
            alert_sequence: self.alerts.latest_sequence(),
            epoch: self.epoch(),
        }
    }
}

impl Default for SituationEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sar_msg::{DroneReport, DroneStatus, TelemetrySource};

    fn small_settings() -> EngineSettings {
        EngineSettings {
            world: WorldGrid::new(10, 500.0),
            prescanned_corner: 2,
            heat_signature_count: 5,
            ..EngineSettings::default()
        }
    }

    fn report(id: &str) -> DroneReport {
        DroneReport {
            id: id.into(),
            name: Some(format!("{id}-name")),
            x: 100.0,
            y: 100.0,
            battery: 0.8,
            status: DroneStatus::Scanning,
            source: TelemetrySource::Autonomous,
            waypoints: None,
            waypoint_index: None,
            detections: Vec::new(),
            responding_to: None,
        }
    }

    #[test]
    fn new_session_reveals_base_and_announces_itself() {
        let engine = SituationEngine::new(small_settings());
        assert_eq!(engine.visibility().scanned_count(), 4);
        assert_eq!(engine.alerts().latest_sequence(), 1);
        assert_eq!(engine.epoch(), 1);
        assert!(engine.revision() > 0);
    }

    #[test]
    fn reset_clears_entities_but_keeps_alerts() {
        let engine = SituationEngine::new(small_settings());
        engine
            .fleet()
            .upsert_telemetry(&report("D-1"), Instant::now())
            .unwrap();
        engine.visibility().mark_scanned([sar_msg::CellCoord::new(8, 8)]);

        let revision = engine.revision();
        let epoch = engine.reset_session();
        assert_eq!(epoch, 2);
        assert!(engine.fleet().is_empty());
        assert!(!engine.visibility().is_scanned(8, 8));
        assert_eq!(engine.visibility().scanned_count(), 4);
        assert_eq!(engine.alerts().len(), 2);
        assert!(engine.revision() > revision);
    }

    #[test]
    fn sweep_publishes_one_alert_per_newly_stale_drone() {
        let engine = SituationEngine::new(small_settings());
        let start = Instant::now();
        engine
            .fleet()
            .upsert_telemetry(&report("D-1"), start)
            .unwrap();
        let later = start + engine.settings().stale_timeout + Duration::from_millis(1);

        assert_eq!(engine.sweep_stale(later), 1);
        assert_eq!(engine.sweep_stale(later), 0);
        let last = engine.alerts().recent(1);
        assert_eq!(last[0].message, "D-1-name telemetry lost");
        assert_eq!(engine.status().stale_drones, 1);
    }
}
