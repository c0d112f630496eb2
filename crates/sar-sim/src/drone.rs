//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated airframes, call signs, and kinematics."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use sar_msg::{DroneStatus, Position};

const CALLSIGNS: [&str; 10] = [
    "Alpha", "Beta", "Gamma", "Delta", "Epsilon", "Zeta", "Eta", "Theta", "Iota", "Kappa",
];

/// Drones per formation row at spawn.
const FORMATION_WIDTH: usize = 5;
/// Spacing between formation slots, in world units.
const FORMATION_SPACING: f64 = 100.0;

/// Battery drained per tick spent moving.
pub const MOVE_DRAIN: f64 = 0.003;
/// Battery restored per tick spent parked at base.
pub const RECHARGE_RATE: f64 = 0.1;

/// What the autonomous controller currently wants from a drone.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    None,
    Scan(Position),
    Respond { survivor_id: String, target: Position },
    Return,
}

impl Task {
    pub fn target(&self, base: Position) -> Option<Position> {
        match self {
            Task::None => None,
            Task::Scan(target) | Task::Respond { target, .. } => Some(*target),
            Task::Return => Some(base),
        }
    }

    pub fn responding_to(&self) -> Option<&str> {
        match self {
            Task::Respond { survivor_id, .. } => Some(survivor_id.as_str()),
            _ => None,
        }
    }
}

/// Ground truth for one simulated airframe.
#[derive(Debug, Clone)]
pub struct SimDrone {
    pub id: String,
    pub name: String,
    pub position: Position,
    pub battery: f64,
    pub status: DroneStatus,
    pub task: Task,
    /// Set while the operator holds the drone; cleared once auto resumes.
    pub manual: bool,
}

impl SimDrone {
    fn new(index: usize, base: Position) -> Self {
        let (id, name) = callsign(index);
        let column = (index % FORMATION_WIDTH) as f64;
        let row = (index / FORMATION_WIDTH) as f64;
        Self {
            id,
            name,
            position: Position::new(
                base.x + column * FORMATION_SPACING,
                base.y + row * FORMATION_SPACING,
            ),
            battery: 1.0,
            status: DroneStatus::Idle,
            task: Task::None,
            manual: false,
        }
    }

    /// Auto drone free to take a scan mission.
    pub fn is_unassigned(&self) -> bool {
        !self.manual && self.task == Task::None && self.status == DroneStatus::Idle
    }

    /// Move toward `target`, draining battery when any distance is covered.
    /// Returns true once the drone sits on the target.
    pub fn fly_toward(&mut self, target: Position, speed: f64) -> bool {
        let (next, arrived) = step_toward(self.position, target, speed);
        if next != self.position {
            self.battery = (self.battery - MOVE_DRAIN).max(0.0);
        }
        self.position = next;
        arrived
    }

    pub fn abandon_task(&mut self) {
        self.task = Task::None;
        self.status = DroneStatus::Idle;
    }
}

/// `(id, display name)` for the drone at `index`; call signs repeat with a suffix past ten.
pub fn callsign(index: usize) -> (String, String) {
    let sign = CALLSIGNS[index % CALLSIGNS.len()];
    let round = index / CALLSIGNS.len();
    if round == 0 {
        (format!("drone-{}", sign.to_lowercase()), format!("D-{sign}"))
    } else {
        (
            format!("drone-{}-{}", sign.to_lowercase(), round + 1),
            format!("D-{sign}-{}", round + 1),
        )
    }
}

pub fn spawn_fleet(count: usize, base: Position) -> Vec<SimDrone> {
    (0..count).map(|index| SimDrone::new(index, base)).collect()
}

/// Advance at most `speed` units toward `target`, snapping onto it when within reach.
pub fn step_toward(from: Position, target: Position, speed: f64) -> (Position, bool) {
    let distance = from.distance_to(target);
    if distance <= speed {
        return (target, true);
    }
    let ratio = speed / distance;
    (
        Position::new(
            from.x + (target.x - from.x) * ratio,
            from.y + (target.y - from.y) * ratio,
        ),
        false,
    )
}
