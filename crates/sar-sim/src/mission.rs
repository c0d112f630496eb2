//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Autonomous mission loop feeding the fleet engine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Normal;
use sar_common::SimulationConfig;
use sar_core::{Cadence, TelemetryIngress};
use sar_msg::{
    CellCoord, ControlMode, DetectionReport, DroneReport, DroneState, DroneStatus, InboundMessage,
    Position, RescueReport, ScanReport, TelemetrySource,
};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::drone::{spawn_fleet, SimDrone, Task, RECHARGE_RATE};

/// Battery needed before an idle drone accepts a scan mission.
const SCAN_MIN_BATTERY: f64 = 0.20;
/// Battery needed before a drone is sent to a survivor.
const RESCUE_MIN_BATTERY: f64 = 0.30;
/// Detections below this confidence are left for a second pass.
const RESCUE_MIN_CONFIDENCE: f64 = 0.8;
/// Detection scatter around the drone, in world units.
const DETECTION_SPREAD: f64 = 300.0;
const BATTERY_NOISE_SIGMA: f64 = 0.002;

/// Seeded autonomous flight stack driving a simulated fleet through the engine's ingress.
#[derive(Debug)]
pub struct MissionSimulator {
    ingress: TelemetryIngress,
    base: Position,
    speed: f64,
    scan_radius: u32,
    detection_probability: f64,
    return_threshold: f64,
    tick_interval: Duration,
    drone_count: usize,
    drones: Vec<SimDrone>,
    epoch: u64,
    detections: u64,
    rng: StdRng,
    noise: Normal<f64>,
}

impl MissionSimulator {
    pub fn new(ingress: TelemetryIngress, config: &SimulationConfig) -> Result<Self> {
        let base = Position::from(config.base);
        let engine = ingress.engine();
        let return_threshold = engine.settings().low_battery_threshold;
        let epoch = engine.epoch();
        Ok(Self {
            base,
            speed: config.speed,
            scan_radius: config.scan_radius,
            detection_probability: config.detection_probability.clamp(0.0, 1.0),
            return_threshold,
            tick_interval: config.tick_interval,
            drone_count: config.drone_count,
            drones: spawn_fleet(config.drone_count, base),
            epoch,
            detections: 0,
            rng: StdRng::seed_from_u64(config.seed),
            noise: Normal::new(0.0, BATTERY_NOISE_SIGMA)
                .context("invalid battery noise distribution")?,
            ingress,
        })
    }

    pub fn drones(&self) -> &[SimDrone] {
        &self.drones
    }

    /// Advance every drone by one tick and return the messages its flight stack would send.
    pub fn step(&mut self) -> Vec<InboundMessage> {
        let engine = self.ingress.engine().clone();
        if engine.epoch() != self.epoch {
            info!(epoch = engine.epoch(), "session reset; respawning simulated fleet");
            self.epoch = engine.epoch();
            self.drones = spawn_fleet(self.drone_count, self.base);
        }

        let tracked: Vec<Option<DroneState>> = self
            .drones
            .iter()
            .map(|drone| engine.fleet().get(&drone.id))
            .collect();
        self.sync_control_modes(&tracked);
        self.dispatch_rescues();
        self.assign_scan_targets();

        let mut messages = Vec::with_capacity(self.drones.len() * 2);
        for index in 0..self.drones.len() {
            let manual = tracked[index]
                .as_ref()
                .filter(|state| state.control_mode == ControlMode::Manual);
            let (report, rescue) = match manual {
                Some(state) => (self.fly_manual(index, state), None),
                None => self.fly_auto(index),
            };
            let footprint = engine
                .world()
                .footprint(report.position(), self.scan_radius);
            let drone_id = report.id.clone();
            messages.push(InboundMessage::DroneReport(report));
            if !footprint.is_empty() {
                messages.push(InboundMessage::ScanReport(ScanReport {
                    drone_id: Some(drone_id),
                    cells: footprint,
                }));
            }
            if let Some(rescue) = rescue {
                messages.push(InboundMessage::RescueReport(rescue));
            }
        }
        messages
    }

    /// Run one step through the ingress. Returns the number of accepted messages.
    pub fn tick(&mut self) -> usize {
        let mut accepted = 0;
        for message in self.step() {
            let kind = message.kind();
            match self.ingress.ingest(message) {
                Ok(_) => accepted += 1,
                Err(err) => debug!(kind, error = %err, "simulated message rejected"),
            }
        }
        accepted
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut cadence = Cadence::new(self.tick_interval);
        info!(
            drones = self.drones.len(),
            tick_ms = self.tick_interval.as_millis() as u64,
            "mission simulator started"
        );
        loop {
            tokio::select! {
                _ = cadence.tick() => {
                    self.tick();
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(ticks = cadence.ticks(), "mission simulator stopped");
    }

    fn sync_control_modes(&mut self, tracked: &[Option<DroneState>]) {
        for (drone, state) in self.drones.iter_mut().zip(tracked) {
            let manual = state
                .as_ref()
                .is_some_and(|state| state.control_mode == ControlMode::Manual);
            if manual && !drone.manual {
                debug!(drone = %drone.id, "operator took control");
                drone.manual = true;
                drone.task = Task::None;
            } else if !manual && drone.manual {
                // Missions are rebuilt from scratch once the operator lets go.
                debug!(drone = %drone.id, "autonomy resumed");
                drone.manual = false;
                drone.abandon_task();
            }
        }
    }

    fn dispatch_rescues(&mut self) {
        let claimed: HashSet<String> = self
            .drones
            .iter()
            .filter_map(|drone| drone.task.responding_to().map(str::to_owned))
            .collect();
        let survivors = self.ingress.engine().survivors().list();
        for survivor in survivors {
            if survivor.rescued
                || survivor.confidence <= RESCUE_MIN_CONFIDENCE
                || claimed.contains(&survivor.id)
            {
                continue;
            }
            let target = survivor.position();
            let nearest = self
                .drones
                .iter_mut()
                .filter(|drone| {
                    !drone.manual
                        && matches!(drone.status, DroneStatus::Idle | DroneStatus::Scanning)
                        && drone.battery > RESCUE_MIN_BATTERY
                })
                .min_by(|a, b| {
                    a.position
                        .distance_to(target)
                        .total_cmp(&b.position.distance_to(target))
                });
            if let Some(drone) = nearest {
                debug!(drone = %drone.id, survivor = %survivor.id, "dispatching rescue");
                drone.task = Task::Respond {
                    survivor_id: survivor.id.clone(),
                    target,
                };
                drone.status = DroneStatus::Responding;
            }
        }
    }

    fn assign_scan_targets(&mut self) {
        let engine = self.ingress.engine().clone();
        let world = engine.world();
        let mut claimed: HashSet<CellCoord> = self
            .drones
            .iter()
            .filter_map(|drone| match drone.task {
                Task::Scan(target) => world.cell_of(target),
                _ => None,
            })
            .collect();

        for drone in self.drones.iter_mut() {
            if !drone.is_unassigned() || drone.battery <= SCAN_MIN_BATTERY {
                continue;
            }
            let mut best: Option<(f64, CellCoord)> = None;
            for index in 0..world.cell_count() {
                let cell = world.cell_at(index);
                if claimed.contains(&cell) || engine.visibility().is_cell_scanned(cell) {
                    continue;
                }
                let distance = drone.position.distance_to(world.cell_center(cell));
                if best.map_or(true, |(closest, _)| distance < closest) {
                    best = Some((distance, cell));
                }
            }
            if let Some((_, cell)) = best {
                claimed.insert(cell);
                drone.task = Task::Scan(world.cell_center(cell));
                drone.status = DroneStatus::Scanning;
            }
        }
    }

    fn fly_auto(&mut self, index: usize) -> (DroneReport, Option<RescueReport>) {
        let (speed, base, threshold) = (self.speed, self.base, self.return_threshold);
        let drone = &mut self.drones[index];
        if drone.battery < threshold && drone.task != Task::Return {
            drone.task = Task::Return;
            drone.status = DroneStatus::Returning;
        }

        let mut rescue = None;
        if let Some(target) = drone.task.target(base) {
            let arrived = drone.fly_toward(target, speed);
            match drone.task.clone() {
                Task::Return if arrived => {
                    drone.battery = (drone.battery + RECHARGE_RATE).min(1.0);
                    if drone.battery >= 1.0 {
                        drone.abandon_task();
                    }
                }
                Task::Respond { survivor_id, .. } if arrived => {
                    rescue = Some(RescueReport {
                        survivor_id,
                        drone_id: drone.id.clone(),
                    });
                }
                Task::Scan(_) if arrived => drone.abandon_task(),
                _ => {}
            }
        }

        let waypoints = drone.task.target(base).map(|target| vec![target]);
        let mut report = self.report_for(index, TelemetrySource::Autonomous);
        report.waypoints = Some(waypoints.unwrap_or_default());
        report.waypoint_index = Some(0);
        if rescue.is_some() {
            self.drones[index].abandon_task();
        }
        (report, rescue)
    }

    fn fly_manual(&mut self, index: usize, state: &DroneState) -> DroneReport {
        let speed = self.speed;
        let drone = &mut self.drones[index];
        let mut waypoint_index = state.waypoint_index;
        if let Some(target) = state.waypoints.get(waypoint_index) {
            if drone.fly_toward(*target, speed) {
                waypoint_index += 1;
            }
        }
        drone.status = if waypoint_index < state.waypoints.len() {
            DroneStatus::Scanning
        } else {
            DroneStatus::Idle
        };
        let mut report = self.report_for(index, TelemetrySource::Manual);
        report.waypoint_index = Some(waypoint_index);
        report
    }

    /// Report for the drone's current ground truth, with sensor noise and detections.
    fn report_for(&mut self, index: usize, source: TelemetrySource) -> DroneReport {
        let detections = if self.drones[index].status == DroneStatus::Scanning {
            self.roll_detection(index).into_iter().collect()
        } else {
            Vec::new()
        };
        let battery = self.drones[index].battery + self.noise.sample(&mut self.rng);
        let drone = &self.drones[index];
        DroneReport {
            id: drone.id.clone(),
            name: Some(drone.name.clone()),
            x: drone.position.x,
            y: drone.position.y,
            battery,
            status: drone.status,
            source,
            waypoints: None,
            waypoint_index: None,
            detections,
            responding_to: drone.task.responding_to().map(str::to_owned),
        }
    }

    fn roll_detection(&mut self, index: usize) -> Option<DetectionReport> {
        if !self.rng.gen_bool(self.detection_probability) {
            return None;
        }
        let extent = self.ingress.engine().world().extent();
        let origin = self.drones[index].position;
        let x = origin.x + self.rng.gen_range(-DETECTION_SPREAD..=DETECTION_SPREAD);
        let y = origin.y + self.rng.gen_range(-DETECTION_SPREAD..=DETECTION_SPREAD);
        let confidence = self.rng.gen_range(0.65..=0.98);
        self.detections += 1;
        Some(DetectionReport {
            id: format!("survivor-{}-{}", self.epoch, self.detections),
            x: x.clamp(0.0, extent - 1.0),
            y: y.clamp(0.0, extent - 1.0),
            confidence,
        })
    }
}
