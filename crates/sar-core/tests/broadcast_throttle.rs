//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Broadcast throttling and coalescing under paused time."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use sar_core::{BroadcastHub, BroadcastScheduler, SituationEngine, TelemetryIngress};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::time::{timeout, Instant};

fn report(x: f64) -> String {
    json!({
        "type": "drone_report",
        "id": "D-1",
        "x": x,
        "y": 100.0,
        "battery": 0.9,
        "status": "scanning",
    })
    .to_string()
}

struct Harness {
    ingress: TelemetryIngress,
    frames: broadcast::Receiver<Arc<sar_core::BroadcastFrame>>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

fn start() -> Harness {
    let engine = Arc::new(SituationEngine::default());
    let hub = BroadcastHub::new(64);
    let frames = hub.subscribe();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(BroadcastScheduler::new(engine.clone(), hub).run(shutdown_rx));
    Harness {
        ingress: TelemetryIngress::new(engine),
        frames,
        shutdown,
        task,
    }
}

#[tokio::test(start_paused = true)]
async fn burst_coalesces_into_one_trailing_frame() {
    let mut harness = start();

    // Session start is itself a change; it goes out on the leading edge.
    let first = harness.frames.recv().await.unwrap();
    let first_at = Instant::now();
    assert!(first.scan.full);

    for step in 0..50 {
        harness.ingress.ingest_json(&report(step as f64 * 10.0)).unwrap();
    }

    let second = harness.frames.recv().await.unwrap();
    assert!(Instant::now() - first_at >= Duration::from_millis(100));
    assert_eq!(second.sequence, first.sequence + 1);
    assert_eq!(second.fleet.drones.len(), 1);
    assert_eq!(second.fleet.drones[0].x, 490.0, "last event in the window wins");

    assert!(
        timeout(Duration::from_millis(500), harness.frames.recv())
            .await
            .is_err(),
        "no phantom frame after the burst"
    );

    harness.shutdown.send(true).unwrap();
    harness.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn change_after_quiet_period_is_sent_immediately() {
    let mut harness = start();
    harness.frames.recv().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let sent_at = Instant::now();
    harness.ingress.ingest_json(&report(250.0)).unwrap();
    let frame = harness.frames.recv().await.unwrap();
    assert_eq!(Instant::now(), sent_at);
    assert_eq!(frame.fleet.drones[0].x, 250.0);

    harness.shutdown.send(true).unwrap();
    harness.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn slow_observer_does_not_hold_back_others() {
    let engine = Arc::new(SituationEngine::default());
    let ingress = TelemetryIngress::new(engine.clone());
    let hub = BroadcastHub::new(2);
    let mut slow = hub.subscribe();
    let mut fast = hub.subscribe();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(BroadcastScheduler::new(engine.clone(), hub.clone()).run(shutdown_rx));

    let mut last = 0;
    for step in 0..6 {
        ingress.ingest_json(&report(step as f64)).unwrap();
        let frame = fast.recv().await.unwrap();
        assert!(frame.sequence > last);
        last = frame.sequence;
    }

    match slow.recv().await {
        Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
        other => panic!("expected lag, got {other:?}"),
    }
    let resync = hub.full_sync(&engine);
    assert!(resync.scan.full);
    assert_eq!(resync.fleet.drones[0].x, 5.0);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}
