//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render the registry in the prometheus text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics")
}

/// Content type matching [`encode_text`] output.
pub fn text_content_type() -> &'static str {
    prometheus::TEXT_FORMAT
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "sard_starts_total",
            "Total number of times the fleet daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sard_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Counters and gauges describing engine traffic and fleet state.
#[derive(Clone, Debug)]
pub struct EngineMetrics {
    registry: SharedRegistry,
    telemetry_accepted: IntCounterVec,
    telemetry_rejected: IntCounterVec,
    commands: IntCounterVec,
    broadcasts: IntCounter,
    observers: IntGauge,
    drones: IntGauge,
    coverage: Gauge,
}

impl EngineMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let telemetry_accepted = IntCounterVec::new(
            Opts::new(
                "sar_telemetry_accepted_total",
                "Inbound messages applied to engine state, by message kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(telemetry_accepted.clone()))?;

        let telemetry_rejected = IntCounterVec::new(
            Opts::new(
                "sar_telemetry_rejected_total",
                "Inbound messages dropped without a state change, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(telemetry_rejected.clone()))?;

        let commands = IntCounterVec::new(
            Opts::new(
                "sar_commands_total",
                "Operator commands processed, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(commands.clone()))?;

        let broadcasts = IntCounter::with_opts(Opts::new(
            "sar_broadcasts_total",
            "Broadcast ticks emitted to observers",
        ))?;
        registry.register(Box::new(broadcasts.clone()))?;

        let observers = IntGauge::with_opts(Opts::new(
            "sar_observers_connected",
            "Observer connections currently open",
        ))?;
        registry.register(Box::new(observers.clone()))?;

        let drones = IntGauge::with_opts(Opts::new(
            "sar_drones_tracked",
            "Drones present in the fleet state store",
        ))?;
        registry.register(Box::new(drones.clone()))?;

        let coverage = Gauge::with_opts(Opts::new(
            "sar_coverage_ratio",
            "Fraction of visibility cells scanned this session",
        ))?;
        registry.register(Box::new(coverage.clone()))?;

        Ok(Self {
            registry,
            telemetry_accepted,
            telemetry_rejected,
            commands,
            broadcasts,
            observers,
            drones,
            coverage,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_accepted(&self, kind: &str) {
        self.telemetry_accepted.with_label_values(&[kind]).inc();
    }

    pub fn record_rejected(&self, reason: &str) {
        self.telemetry_rejected.with_label_values(&[reason]).inc();
    }

    pub fn record_command(&self, outcome: &str) {
        self.commands.with_label_values(&[outcome]).inc();
    }

    pub fn record_broadcast(&self) {
        self.broadcasts.inc();
    }

    pub fn observer_connected(&self) {
        self.observers.inc();
    }

    pub fn observer_disconnected(&self) {
        self.observers.dec();
    }

    pub fn set_fleet_gauges(&self, drones: usize, coverage: f64) {
        self.drones.set(drones as i64);
        self.coverage.set(coverage);
    }
}
