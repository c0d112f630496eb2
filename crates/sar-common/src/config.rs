//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the fleet engine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;
use tracing_subscriber::filter::EnvFilter;

use crate::logging::LogFormat;

/// Largest accepted grid edge; the visibility bitmap holds `grid_size²` cells.
pub const MAX_GRID_SIZE: u32 = 1024;
/// Largest simulated sensor footprint radius, in cells.
pub const MAX_SCAN_RADIUS: u32 = 16;

fn default_grid_size() -> u32 {
    30
}

fn default_cell_size() -> f64 {
    500.0
}

fn default_prescanned_corner() -> u32 {
    5
}

fn default_heat_signature_count() -> usize {
    15
}

fn default_heat_seed() -> u64 {
    0x5EA5_0F7E
}

fn default_low_battery_threshold() -> f64 {
    0.25
}

fn default_stale_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_broadcast_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_alert_capacity() -> usize {
    20
}

fn default_channel_capacity() -> usize {
    64
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_observers() -> usize {
    256
}

fn default_max_drone_links() -> usize {
    512
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_file() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_simulation_enabled() -> bool {
    true
}

fn default_simulation_seed() -> u64 {
    0xD20_4E5C
}

fn default_drone_count() -> usize {
    10
}

fn default_sim_tick() -> Duration {
    Duration::from_millis(100)
}

fn default_speed() -> f64 {
    200.0
}

fn default_scan_radius() -> u32 {
    2
}

fn default_detection_probability() -> f64 {
    0.005
}

fn default_base() -> [f64; 2] {
    [500.0, 500.0]
}

/// Primary configuration object for the fleet engine daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "SAR_CONFIG";

    /// Load configuration from disk, respecting the `SAR_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `SAR_CONFIG` path must exist. When none of the candidates
    /// exist the built-in defaults are used and `source` is `None`.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.world.validate()?;
        self.fleet.validate()?;
        self.broadcast.validate()?;
        self.server.validate()?;
        self.simulation.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Geometry of the disaster zone and its session-start reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    /// Side length, in cells, of the base area revealed at session start.
    #[serde(default = "default_prescanned_corner")]
    pub prescanned_corner: u32,
    #[serde(default = "default_heat_signature_count")]
    pub heat_signature_count: usize,
    #[serde(default = "default_heat_seed")]
    pub heat_seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            cell_size: default_cell_size(),
            prescanned_corner: default_prescanned_corner(),
            heat_signature_count: default_heat_signature_count(),
            heat_seed: default_heat_seed(),
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grid_size == 0 {
            return Err(anyhow!("world.grid_size must be positive"));
        }
        if self.grid_size > MAX_GRID_SIZE {
            return Err(anyhow!(
                "world.grid_size ({}) exceeds the limit of {MAX_GRID_SIZE}",
                self.grid_size
            ));
        }
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(anyhow!("world.cell_size must be a positive number"));
        }
        if self.prescanned_corner > self.grid_size {
            return Err(anyhow!(
                "world.prescanned_corner ({}) exceeds grid_size ({})",
                self.prescanned_corner,
                self.grid_size
            ));
        }
        Ok(())
    }

    /// World extent along one axis in world units.
    pub fn extent(&self) -> f64 {
        self.grid_size as f64 * self.cell_size
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_low_battery_threshold")]
    pub low_battery_threshold: f64,
    #[serde(default = "default_stale_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub stale_timeout: Duration,
    #[serde(default = "default_sweep_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sweep_interval: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            low_battery_threshold: default_low_battery_threshold(),
            stale_timeout: default_stale_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.low_battery_threshold > 0.0 && self.low_battery_threshold < 1.0) {
            return Err(anyhow!(
                "fleet.low_battery_threshold must lie strictly between 0 and 1"
            ));
        }
        if self.stale_timeout.is_zero() || self.sweep_interval.is_zero() {
            return Err(anyhow!(
                "fleet.stale_timeout and fleet.sweep_interval must be non-zero"
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Minimum spacing between two broadcast ticks.
    #[serde(default = "default_broadcast_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    /// Number of recent alerts retained and carried in each broadcast.
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,
    /// Frames buffered per observer before it is considered lagging.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval: default_broadcast_interval(),
            alert_capacity: default_alert_capacity(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl BroadcastConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("broadcast.interval must be non-zero"));
        }
        if self.alert_capacity == 0 || self.channel_capacity == 0 {
            return Err(anyhow!(
                "broadcast.alert_capacity and broadcast.channel_capacity must be positive"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_max_observers")]
    pub max_observers: usize,
    #[serde(default = "default_max_drone_links")]
    pub max_drone_links: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_observers: default_max_observers(),
            max_drone_links: default_max_drone_links(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_observers == 0 || self.max_drone_links == 0 {
            return Err(anyhow!(
                "server.max_observers and server.max_drone_links must be positive"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when neither a CLI override nor `SAR_LOG`/`RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Also write a daily-rolling JSON file under `directory`.
    #[serde(default = "default_log_file")]
    pub file: bool,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_logging_directory(),
            format: default_log_format(),
            file: default_log_file(),
            file_prefix: None,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        EnvFilter::try_new(&self.level)
            .map_err(|err| anyhow!("logging.level {:?} is not a valid filter: {err}", self.level))?;
        if matches!(&self.file_prefix, Some(prefix) if prefix.trim().is_empty()) {
            return Err(anyhow!("logging.file_prefix must not be empty"));
        }
        Ok(())
    }
}

/// Settings for the built-in autonomous mission source.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_enabled")]
    pub enabled: bool,
    #[serde(default = "default_simulation_seed")]
    pub seed: u64,
    #[serde(default = "default_drone_count")]
    pub drone_count: usize,
    #[serde(default = "default_sim_tick")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick_interval: Duration,
    /// World units travelled per tick.
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default = "default_scan_radius")]
    pub scan_radius: u32,
    #[serde(default = "default_detection_probability")]
    pub detection_probability: f64,
    #[serde(default = "default_base")]
    pub base: [f64; 2],
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: default_simulation_enabled(),
            seed: default_simulation_seed(),
            drone_count: default_drone_count(),
            tick_interval: default_sim_tick(),
            speed: default_speed(),
            scan_radius: default_scan_radius(),
            detection_probability: default_detection_probability(),
            base: default_base(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("simulation.tick_interval must be non-zero"));
        }
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(anyhow!("simulation.speed must be a positive number"));
        }
        if self.scan_radius > MAX_SCAN_RADIUS {
            return Err(anyhow!(
                "simulation.scan_radius ({}) exceeds the limit of {MAX_SCAN_RADIUS}",
                self.scan_radius
            ));
        }
        if !(0.0..=1.0).contains(&self.detection_probability) {
            return Err(anyhow!(
                "simulation.detection_probability must lie within [0, 1]"
            ));
        }
        Ok(())
    }
}
