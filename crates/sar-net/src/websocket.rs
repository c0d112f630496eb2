//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Drone, observer, and operator network surfaces."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sar_core::{BroadcastFrame, EngineError, LinkRole};
use sar_msg::ErrorNotice;
use serde::Deserialize;
use tokio::sync::{broadcast, OwnedSemaphorePermit};
use tracing::{debug, info, warn};

use crate::server::AppState;

/// Observer-only control messages that never reach the engine.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ObserverControl {
    Resync,
}

pub(crate) async fn telemetry_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Ok(permit) = state.drone_links.clone().try_acquire_owned() else {
        warn!("drone link limit reached; rejecting upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "drone link limit reached").into_response();
    };
    ws.on_upgrade(move |socket| drone_link_loop(socket, state, permit))
}

pub(crate) async fn observer_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Ok(permit) = state.observers.clone().try_acquire_owned() else {
        warn!("observer limit reached; rejecting upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "observer limit reached").into_response();
    };
    ws.on_upgrade(move |socket| observer_loop(socket, state, permit))
}

async fn send_error(socket: &mut WebSocket, err: &EngineError) -> Result<(), axum::Error> {
    let notice = ErrorNotice::new(err.reason(), err.to_string());
    let text = serde_json::to_string(&notice).unwrap_or_else(|_| "{\"error\":\"internal\"}".into());
    socket.send(Message::Text(text)).await
}

async fn send_binary_rejection(socket: &mut WebSocket) -> Result<(), axum::Error> {
    let notice = ErrorNotice::new("decode", "binary frames are not supported");
    let text = serde_json::to_string(&notice).unwrap_or_else(|_| "{\"error\":\"internal\"}".into());
    socket.send(Message::Text(text)).await
}

async fn drone_link_loop(mut socket: WebSocket, state: Arc<AppState>, _permit: OwnedSemaphorePermit) {
    let mut shutdown = state.shutdown.clone();
    info!("drone link opened");

    loop {
        tokio::select! {
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };
                match message {
                    Message::Text(text) => {
                        if let Err(err) = state.ingress.ingest_json_as(LinkRole::Drone, &text) {
                            if send_error(&mut socket, &err).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Binary(_) => {
                        if send_binary_rejection(&mut socket).await.is_err() {
                            break;
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("drone link closed");
}

/// Send the frame's messages, filtering alerts already delivered on this connection.
async fn send_frame(
    socket: &mut WebSocket,
    frame: &BroadcastFrame,
    delivered_alert: &mut u64,
) -> Result<(), axum::Error> {
    for message in frame.messages_after(*delivered_alert) {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "failed to serialise broadcast frame");
                continue;
            }
        };
        socket.send(Message::Text(text)).await?;
    }
    if let Some(sequence) = frame.latest_alert_sequence() {
        *delivered_alert = (*delivered_alert).max(sequence);
    }
    Ok(())
}

async fn observer_loop(mut socket: WebSocket, state: Arc<AppState>, _permit: OwnedSemaphorePermit) {
    let engine = state.ingress.engine().clone();
    if let Some(metrics) = engine.metrics() {
        metrics.observer_connected();
    }
    let mut shutdown = state.shutdown.clone();
    // Subscribe before composing the full sync so nothing falls between the two.
    let mut frames = state.hub.subscribe();
    let mut delivered_alert = 0;
    let sync = state.hub.full_sync(&engine);
    let mut synced_through = sync.sequence;
    info!(observers = state.observer_count(), "observer connected");

    if send_frame(&mut socket, &sync, &mut delivered_alert).await.is_ok() {
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let frame = match frame {
                        Ok(frame) if frame.sequence <= synced_through => continue,
                        Ok(frame) => frame,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "observer lagged behind; sending full resync");
                            frames = frames.resubscribe();
                            let sync = state.hub.full_sync(&engine);
                            synced_through = sync.sequence;
                            Arc::new(sync)
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    if send_frame(&mut socket, &frame, &mut delivered_alert).await.is_err() {
                        break;
                    }
                }
                message = socket.recv() => {
                    let Some(Ok(message)) = message else {
                        break;
                    };
                    match message {
                        Message::Text(text) => {
                            if let Ok(ObserverControl::Resync) = serde_json::from_str(&text) {
                                debug!("observer requested resync");
                                frames = frames.resubscribe();
                                delivered_alert = 0;
                                let sync = state.hub.full_sync(&engine);
                                synced_through = sync.sequence;
                                if send_frame(&mut socket, &sync, &mut delivered_alert).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                            if let Err(err) = state.ingress.ingest_json_as(LinkRole::Operator, &text) {
                                if send_error(&mut socket, &err).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Message::Binary(_) => {
                            if send_binary_rejection(&mut socket).await.is_err() {
                                break;
                            }
                        }
                        Message::Ping(payload) => {
                            if socket.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Message::Pong(_) => {}
                        Message::Close(_) => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    if let Some(metrics) = engine.metrics() {
        metrics.observer_disconnected();
    }
    info!("observer disconnected");
}
