//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Drone link, observer stream, and REST surface tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use sar_core::{BroadcastHub, BroadcastScheduler, SituationEngine, TelemetryIngress};
use sar_metrics::{new_registry, EngineMetrics};
use sar_net::{FleetServerBuilder, FleetServerHandle, StatusSnapshot};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    engine: Arc<SituationEngine>,
    hub: BroadcastHub,
    server: FleetServerHandle,
    scheduler_shutdown: watch::Sender<bool>,
}

impl Harness {
    async fn start(max_observers: usize) -> Self {
        Self::start_with(max_observers, 8, 64).await
    }

    async fn start_with(max_observers: usize, max_drone_links: usize, channel_capacity: usize) -> Self {
        let registry = new_registry();
        let metrics = EngineMetrics::new(registry.clone()).unwrap();
        let engine = Arc::new(SituationEngine::default().with_metrics(metrics));
        let hub = BroadcastHub::new(channel_capacity);
        let (scheduler_shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(BroadcastScheduler::new(engine.clone(), hub.clone()).run(shutdown_rx));

        let server = FleetServerBuilder::new(
            "127.0.0.1:0".parse().unwrap(),
            TelemetryIngress::new(engine.clone()),
            hub.clone(),
        )
        .with_limits(max_observers, max_drone_links)
        .with_metrics_registry(registry)
        .spawn()
        .await
        .unwrap();

        Self {
            engine,
            hub,
            server,
            scheduler_shutdown,
        }
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.server.local_addr())
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.server.local_addr())
    }

    async fn stop(self) {
        let _ = self.scheduler_shutdown.send(true);
        self.server.shutdown().await.unwrap();
    }
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("message within timeout")
            .expect("stream open")
            .expect("valid frame");
        if let WsMessage::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn next_of_type(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let value = next_json(socket).await;
        if value["type"] == kind {
            return value;
        }
    }
}

#[tokio::test]
async fn observer_sees_drone_link_updates() {
    let harness = Harness::start(4).await;

    let (mut observer, _) = connect_async(harness.ws_url("/ws/observer")).await.unwrap();
    let sync = next_json(&mut observer).await;
    assert_eq!(sync["type"], "fleet_update");
    assert_eq!(sync["alerts_delta"][0]["type"], "SYSTEM");
    let scan = next_json(&mut observer).await;
    assert_eq!(scan["type"], "scan_update");
    assert_eq!(scan["full"], true);
    assert_eq!(scan["cells"].as_array().unwrap().len(), 25);

    let (mut drone, _) = connect_async(harness.ws_url("/ws/telemetry")).await.unwrap();
    drone
        .send(WsMessage::Text(
            json!({
                "type": "drone_report",
                "id": "D-1",
                "x": 100.0,
                "y": 100.0,
                "battery": 0.9,
                "status": "scanning"
            })
            .to_string(),
        ))
        .await
        .unwrap();

    let update = loop {
        let update = next_of_type(&mut observer, "fleet_update").await;
        if !update["drones"].as_array().unwrap().is_empty() {
            break update;
        }
    };
    assert_eq!(update["drones"][0]["id"], "D-1");
    assert_eq!(update["drones"][0]["x"], 100.0);
    assert!(
        update["alerts_delta"].as_array().unwrap().is_empty(),
        "session start alert was already delivered"
    );

    drone.send(WsMessage::Text("{oops".into())).await.unwrap();
    let error = next_json(&mut drone).await;
    assert_eq!(error["reason"], "decode");

    drone
        .send(WsMessage::Text(json!({"type": "reset_session"}).to_string()))
        .await
        .unwrap();
    let error = next_json(&mut drone).await;
    assert_eq!(error["reason"], "unsupported");
    assert_eq!(harness.engine.epoch(), 1);

    drop(drone);
    drop(observer);
    harness.stop().await;
}

#[tokio::test]
async fn observer_commands_and_resync() {
    let harness = Harness::start(4).await;
    let (mut observer, _) = connect_async(harness.ws_url("/ws/observer")).await.unwrap();
    next_of_type(&mut observer, "scan_update").await;

    observer
        .send(WsMessage::Text(
            json!({
                "type": "manual_command",
                "drone_id": "ghost",
                "command": "set_mode",
                "mode": "manual"
            })
            .to_string(),
        ))
        .await
        .unwrap();
    let error = loop {
        let value = next_json(&mut observer).await;
        if value.get("error").is_some() {
            break value;
        }
    };
    assert_eq!(error["reason"], "not_found");

    observer
        .send(WsMessage::Text(json!({"type": "resync"}).to_string()))
        .await
        .unwrap();
    let scan = loop {
        let scan = next_of_type(&mut observer, "scan_update").await;
        if scan["full"] == true {
            break scan;
        }
    };
    assert_eq!(scan["cells"].as_array().unwrap().len(), 25);

    drop(observer);
    harness.stop().await;
}

#[tokio::test]
async fn rest_commands_map_errors_to_status_codes() {
    let harness = Harness::start(4).await;
    TelemetryIngress::new(harness.engine.clone())
        .ingest_json(
            &json!({
                "type": "drone_report", "id": "D-1", "x": 100.0, "y": 100.0,
                "battery": 0.9, "status": "scanning"
            })
            .to_string(),
        )
        .unwrap();
    let client = Client::new();

    let accepted = client
        .post(harness.http_url("/commands"))
        .json(&json!({
            "drone_id": "D-1",
            "command": "set_waypoints",
            "waypoints": [[500, 500]]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    let outcome: Value = accepted.json().await.unwrap();
    assert_eq!(outcome["mode"], "manual");
    assert_eq!(outcome["waypoints"], json!([[500.0, 500.0]]));

    let missing = client
        .post(harness.http_url("/commands"))
        .json(&json!({"drone_id": "D-404", "command": "set_mode", "mode": "auto"}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let invalid = client
        .post(harness.http_url("/commands"))
        .json(&json!({"drone_id": "D-1", "command": "set_mode"}))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let garbage = client
        .post(harness.http_url("/commands"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);

    let status: StatusSnapshot = client
        .get(harness.http_url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.drones, 1);
    assert_eq!(status.epoch, 1);

    let snapshot: Value = client
        .get(harness.http_url("/snapshot"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["drones"][0]["control_mode"], "manual");

    let health: Value = client
        .get(harness.http_url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    let metrics = client
        .get(harness.http_url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("sar_commands_total"));

    let reset = client
        .post(harness.http_url("/session/reset"))
        .send()
        .await
        .unwrap();
    assert_eq!(reset.status(), StatusCode::ACCEPTED);
    assert_eq!(harness.engine.epoch(), 2);
    assert!(harness.engine.fleet().is_empty());

    drop(client);
    harness.stop().await;
}

#[tokio::test]
async fn observer_limit_rejects_extra_upgrades() {
    let harness = Harness::start(1).await;
    let (mut first, _) = connect_async(harness.ws_url("/ws/observer")).await.unwrap();
    next_of_type(&mut first, "scan_update").await;

    match connect_async(harness.ws_url("/ws/observer")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 503);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("second observer should be rejected"),
    }

    // The existing observer keeps receiving updates.
    harness.engine.visibility().mark_scanned([sar_msg::CellCoord::new(20, 20)]);
    harness.engine.mark_changed();
    let scan = loop {
        let scan = next_of_type(&mut first, "scan_update").await;
        if scan["full"] == false {
            break scan;
        }
    };
    assert_eq!(scan["cells"], json!([[20, 20]]));

    drop(first);
    harness.stop().await;
}

#[tokio::test]
async fn drone_link_limit_rejects_extra_upgrades() {
    let harness = Harness::start_with(4, 1, 64).await;
    let (mut first, _) = connect_async(harness.ws_url("/ws/telemetry")).await.unwrap();

    match connect_async(harness.ws_url("/ws/telemetry")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 503);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("second drone link should be rejected"),
    }

    // Binary frames are refused without closing the link.
    first
        .send(WsMessage::Binary(vec![0x01, 0x02]))
        .await
        .unwrap();
    let error = next_json(&mut first).await;
    assert_eq!(error["reason"], "decode");
    first
        .send(WsMessage::Text(
            json!({
                "type": "drone_report", "id": "D-1", "x": 50.0, "y": 50.0,
                "battery": 0.7, "status": "idle"
            })
            .to_string(),
        ))
        .await
        .unwrap();
    timeout(Duration::from_secs(3), async {
        while harness.engine.fleet().get("D-1").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("report from the admitted link is applied");

    first.close(None).await.unwrap();
    drop(first);
    let reopened = timeout(Duration::from_secs(3), async {
        loop {
            match connect_async(harness.ws_url("/ws/telemetry")).await {
                Ok((socket, _)) => break socket,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .expect("slot is released once the first link closes");

    drop(reopened);
    harness.stop().await;
}

#[tokio::test]
async fn lagging_observer_gets_full_resync() {
    let harness = Harness::start_with(4, 8, 1).await;
    let (mut observer, _) = connect_async(harness.ws_url("/ws/observer")).await.unwrap();
    let sync = next_of_type(&mut observer, "scan_update").await;
    assert_eq!(sync["full"], true);

    let status: StatusSnapshot = Client::new()
        .get(harness.http_url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.observers, 1);
    assert_eq!(status.subscribers, 1);

    harness.engine.visibility().mark_scanned([sar_msg::CellCoord::new(12, 12)]);

    // Overrun the single-slot channel before the connection task can drain it.
    let mut delta = harness.hub.full_sync(&harness.engine);
    delta.scan.full = false;
    delta.scan.cells.clear();
    for sequence in 100..104 {
        let mut frame = delta.clone();
        frame.sequence = sequence;
        frame.fleet.sequence = sequence;
        frame.scan.sequence = sequence;
        harness.hub.send(Arc::new(frame));
    }

    let resync = next_of_type(&mut observer, "scan_update").await;
    assert_eq!(resync["full"], true);
    assert_eq!(resync["sequence"], 103);
    assert!(resync["cells"]
        .as_array()
        .unwrap()
        .contains(&json!([12, 12])));

    drop(observer);
    harness.stop().await;
}

#[tokio::test]
async fn operator_events_reach_observers_as_alerts() {
    let harness = Harness::start(4).await;
    let (mut observer, _) = connect_async(harness.ws_url("/ws/observer")).await.unwrap();
    next_of_type(&mut observer, "scan_update").await;

    observer
        .send(WsMessage::Text(
            json!({"type": "scan_request", "x": 3000.0, "y": 4500.0}).to_string(),
        ))
        .await
        .unwrap();
    observer
        .send(WsMessage::Text(
            json!({"type": "manual_detection", "id": "s-op", "x": 3050.0, "y": 4480.0})
                .to_string(),
        ))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    let mut survivors = Value::Null;
    while kinds.len() < 2 {
        let update = next_of_type(&mut observer, "fleet_update").await;
        for alert in update["alerts_delta"].as_array().unwrap() {
            kinds.push(alert["type"].as_str().unwrap().to_owned());
        }
        survivors = update["survivors"].clone();
    }
    assert_eq!(kinds, ["SCAN_REQUESTED", "SURVIVOR_DETECTED"]);
    assert_eq!(survivors[0]["id"], "s-op");
    assert_eq!(survivors[0]["detected_by"], "operator");

    drop(observer);
    harness.stop().await;
}
