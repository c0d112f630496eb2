//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet engine stores, ingress, and broadcast scheduling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Coalescing broadcast of engine state to observers.
//!
//! The scheduler is the only place internal state is turned into wire frames.
//! Bursts of mutations inside one interval produce a single frame that reflects
//! the last of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sar_msg::{FleetUpdate, OutboundMessage, ScanUpdate};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::engine::SituationEngine;

/// One composed tick, shared by every observer connection.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastFrame {
    pub sequence: u64,
    pub epoch: u64,
    pub fleet: FleetUpdate,
    pub scan: ScanUpdate,
}

impl BroadcastFrame {
    /// Compose a self-contained frame straight from the stores: every drone,
    /// every scanned cell and the retained alert history. Does not drain the
    /// visibility delta.
    pub fn full_sync(engine: &SituationEngine, sequence: u64) -> Self {
        let epoch = engine.epoch();
        let capacity = engine.alerts().capacity();
        Self::build(engine, sequence, epoch, true, engine.visibility().scanned_cells(), capacity)
    }

    fn build(
        engine: &SituationEngine,
        sequence: u64,
        epoch: u64,
        full: bool,
        cells: Vec<sar_msg::CellCoord>,
        alert_window: usize,
    ) -> Self {
        let fleet = FleetUpdate {
            sequence,
            epoch,
            drones: engine.fleet().snapshot(),
            survivors: engine.survivors().list(),
            heat_signatures: engine.visible_heat(),
            alerts_delta: engine.alerts().recent(alert_window),
            coverage: engine.visibility().coverage(),
        };
        Self {
            sequence,
            epoch,
            fleet,
            scan: ScanUpdate {
                sequence,
                epoch,
                full,
                cells,
            },
        }
    }

    /// Sequence of the newest alert carried by the frame, if any.
    pub fn latest_alert_sequence(&self) -> Option<u64> {
        self.fleet.alerts_delta.last().map(|alert| alert.sequence)
    }

    /// Fleet update as seen by a connection that already delivered alerts up to
    /// `delivered_alert`.
    pub fn fleet_update_after(&self, delivered_alert: u64) -> FleetUpdate {
        let mut fleet = self.fleet.clone();
        fleet
            .alerts_delta
            .retain(|alert| alert.sequence > delivered_alert);
        fleet
    }

    /// Wire messages for one connection: the fleet update then the scan update.
    /// An empty scan delta is not sent.
    pub fn messages_after(&self, delivered_alert: u64) -> Vec<OutboundMessage> {
        let mut messages = vec![OutboundMessage::FleetUpdate(
            self.fleet_update_after(delivered_alert),
        )];
        if self.scan.full || !self.scan.cells.is_empty() {
            messages.push(OutboundMessage::ScanUpdate(self.scan.clone()));
        }
        messages
    }
}

/// Fan-out point for composed frames. Sending never blocks; slow receivers lag.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Arc<BroadcastFrame>>,
    last_sequence: Arc<AtomicU64>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            last_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish a frame. Returns the number of observers reached.
    pub fn send(&self, frame: Arc<BroadcastFrame>) -> usize {
        self.last_sequence.store(frame.sequence, Ordering::Release);
        self.tx.send(frame).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastFrame>> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Sequence of the most recently published frame.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// Full-sync frame for a newly joined or lagging observer.
    pub fn full_sync(&self, engine: &SituationEngine) -> BroadcastFrame {
        BroadcastFrame::full_sync(engine, self.last_sequence())
    }
}

/// Leading-edge throttle that turns engine revisions into broadcast frames.
#[derive(Debug)]
pub struct BroadcastScheduler {
    engine: Arc<SituationEngine>,
    hub: BroadcastHub,
    interval: Duration,
    sequence: u64,
    last_epoch: Option<u64>,
    last_revision: Option<u64>,
    last_emission: Option<Instant>,
}

impl BroadcastScheduler {
    pub fn new(engine: Arc<SituationEngine>, hub: BroadcastHub) -> Self {
        let interval = engine.settings().broadcast_interval;
        Self {
            engine,
            hub,
            interval,
            sequence: 0,
            last_epoch: None,
            last_revision: None,
            last_emission: None,
        }
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Build the next frame. The visibility delta is drained; after an epoch
    /// change the full bitmap is sent instead.
    pub fn compose(&mut self) -> BroadcastFrame {
        self.sequence += 1;
        let epoch = self.engine.epoch();
        let delta = self.engine.visibility().take_delta();
        let full = self.last_epoch != Some(epoch);
        let cells = if full {
            self.engine.visibility().scanned_cells()
        } else {
            delta
        };
        self.last_epoch = Some(epoch);
        let window = self.engine.alerts().capacity();
        BroadcastFrame::build(&self.engine, self.sequence, epoch, full, cells, window)
    }

    /// Emit a frame if anything changed since the previous emission.
    pub fn tick(&mut self) -> Option<Arc<BroadcastFrame>> {
        let revision = self.engine.revision();
        if self.last_revision == Some(revision) {
            trace!(revision, "no change since last broadcast");
            return None;
        }
        let frame = Arc::new(self.compose());
        self.last_revision = Some(revision);
        self.last_emission = Some(Instant::now());

        let reached = self.hub.send(frame.clone());
        if let Some(metrics) = self.engine.metrics() {
            metrics.record_broadcast();
            metrics.set_fleet_gauges(frame.fleet.drones.len(), frame.fleet.coverage);
        }
        trace!(
            sequence = frame.sequence,
            full = frame.scan.full,
            cells = frame.scan.cells.len(),
            observers = reached,
            "broadcast emitted"
        );
        Some(frame)
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "broadcast scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.engine.changed() => {}
                _ = shutdown.changed() => break,
            }
            if let Some(last) = self.last_emission {
                let deadline = last + self.interval;
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shutdown.changed() => break,
                }
            }
            if self.tick().is_none() {
                debug!("woken without a state change");
            }
        }
        info!(frames = self.sequence, "broadcast scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::world::WorldGrid;
    use sar_msg::{AlertKind, AlertPayload, CellCoord};

    fn engine() -> Arc<SituationEngine> {
        Arc::new(SituationEngine::new(EngineSettings {
            world: WorldGrid::new(10, 500.0),
            prescanned_corner: 2,
            ..EngineSettings::default()
        }))
    }

    #[test]
    fn first_frame_is_full_then_deltas() {
        let engine = engine();
        let mut scheduler = BroadcastScheduler::new(engine.clone(), BroadcastHub::new(8));

        let first = scheduler.tick().unwrap();
        assert!(first.scan.full);
        assert_eq!(first.scan.cells.len(), 4);

        assert!(scheduler.tick().is_none(), "unchanged revision is skipped");

        engine.visibility().mark_scanned([CellCoord::new(7, 7)]);
        engine.mark_changed();
        let second = scheduler.tick().unwrap();
        assert!(!second.scan.full);
        assert_eq!(second.scan.cells, vec![CellCoord::new(7, 7)]);
        assert_eq!(second.sequence, first.sequence + 1);
    }

    #[test]
    fn epoch_change_forces_full_bitmap() {
        let engine = engine();
        let mut scheduler = BroadcastScheduler::new(engine.clone(), BroadcastHub::new(8));
        scheduler.tick();
        engine.visibility().mark_scanned([CellCoord::new(5, 5)]);
        engine.reset_session();
        let frame = scheduler.tick().unwrap();
        assert!(frame.scan.full);
        assert_eq!(frame.epoch, 2);
        assert_eq!(frame.scan.cells.len(), 4);
    }

    #[test]
    fn alerts_are_filtered_per_connection() {
        let engine = engine();
        engine.publish_alert(AlertKind::System, "two", AlertPayload::default());
        engine.publish_alert(AlertKind::System, "three", AlertPayload::default());
        let frame = BroadcastFrame::full_sync(&engine, 0);
        assert_eq!(frame.latest_alert_sequence(), Some(3));
        let fresh = frame.fleet_update_after(0);
        assert_eq!(fresh.alerts_delta.len(), 3);
        let caught_up = frame.fleet_update_after(2);
        assert_eq!(caught_up.alerts_delta.len(), 1);
        assert_eq!(caught_up.alerts_delta[0].message, "three");
        assert_eq!(frame.messages_after(3).len(), 2);
    }

    #[test]
    fn hub_send_without_observers_is_not_an_error() {
        let engine = engine();
        let hub = BroadcastHub::new(4);
        let frame = Arc::new(BroadcastFrame::full_sync(&engine, 9));
        assert_eq!(hub.send(frame), 0);
        assert_eq!(hub.last_sequence(), 9);
        let mut rx = hub.subscribe();
        hub.send(Arc::new(BroadcastFrame::full_sync(&engine, 10)));
        assert_eq!(rx.try_recv().unwrap().sequence, 10);
    }
}
