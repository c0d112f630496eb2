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
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{info, trace};

use crate::engine::SituationEngine;

/// Fixed-period wake-up for background loops.
///
/// The first tick lands one full period after creation. Ticks missed while the
/// loop body overran are dropped, so a stalled sweeper or simulator resumes at
/// its normal pace instead of replaying a burst.
#[derive(Debug)]
pub struct Cadence {
    interval: Interval,
    period: Duration,
    ticks: u64,
}

impl Cadence {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            period,
            ticks: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks delivered so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub async fn tick(&mut self) -> Instant {
        let at = self.interval.tick().await;
        self.ticks += 1;
        at
    }
}

/// Periodically flags drones whose telemetry stopped arriving.
#[derive(Debug, Clone)]
pub struct StaleSweeper {
    engine: Arc<SituationEngine>,
    period: Duration,
}

impl StaleSweeper {
    pub fn new(engine: Arc<SituationEngine>) -> Self {
        let period = engine.settings().sweep_interval;
        Self { engine, period }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut cadence = Cadence::new(self.period);
        info!(period_ms = cadence.period().as_millis() as u64, "staleness sweeper started");
        loop {
            tokio::select! {
                now = cadence.tick() => {
                    self.engine.sweep_stale(now.into_std());
                    trace!(sweep = cadence.ticks(), "stale sweep done");
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(sweeps = cadence.ticks(), "staleness sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::TelemetryIngress;

    #[tokio::test(start_paused = true)]
    async fn cadence_waits_a_period_and_skips_missed_ticks() {
        let start = Instant::now();
        let mut cadence = Cadence::new(Duration::from_millis(100));
        assert_eq!(cadence.tick().await - start, Duration::from_millis(100));

        // Overrun by several periods: one late tick, then back on the grid.
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(cadence.tick().await - start, Duration::from_millis(200));
        let next = cadence.tick().await;
        assert!(next - start >= Duration::from_millis(500));
        assert_eq!(cadence.ticks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_drone_goes_stale_and_recovers() {
        let engine = Arc::new(SituationEngine::default());
        let ingress = TelemetryIngress::new(engine.clone());
        let report = r#"{"type":"drone_report","id":"D-1","x":0,"y":0,"battery":0.9,"status":"idle"}"#;
        ingress.ingest_json(report).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(StaleSweeper::new(engine.clone()).run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!engine.fleet().get("D-1").unwrap().stale);
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(engine.fleet().get("D-1").unwrap().stale);

        ingress.ingest_json(report).unwrap();
        assert!(!engine.fleet().get("D-1").unwrap().stale);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
