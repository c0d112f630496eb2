//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Drone, observer, and operator network surfaces."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sar_core::{BroadcastHub, TelemetryIngress};
use sar_metrics::SharedRegistry;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{rest, websocket};

/// Default number of concurrent observer connections.
pub const DEFAULT_MAX_OBSERVERS: usize = 256;
/// Default number of concurrent drone telemetry links.
pub const DEFAULT_MAX_DRONE_LINKS: usize = 512;

/// Shared state injected into every handler.
pub(crate) struct AppState {
    pub(crate) ingress: TelemetryIngress,
    pub(crate) hub: BroadcastHub,
    pub(crate) observers: Arc<Semaphore>,
    pub(crate) drone_links: Arc<Semaphore>,
    pub(crate) max_observers: usize,
    pub(crate) registry: Option<SharedRegistry>,
    /// Flips to true when the server is shutting down; connection loops exit on it.
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub(crate) fn observer_count(&self) -> usize {
        self.max_observers
            .saturating_sub(self.observers.available_permits())
    }
}

/// Builder for the combined HTTP and WebSocket server.
#[derive(Clone)]
pub struct FleetServerBuilder {
    listen: SocketAddr,
    ingress: TelemetryIngress,
    hub: BroadcastHub,
    max_observers: usize,
    max_drone_links: usize,
    registry: Option<SharedRegistry>,
}

impl FleetServerBuilder {
    /// Create a builder bound to `listen`.
    pub fn new(listen: SocketAddr, ingress: TelemetryIngress, hub: BroadcastHub) -> Self {
        Self {
            listen,
            ingress,
            hub,
            max_observers: DEFAULT_MAX_OBSERVERS,
            max_drone_links: DEFAULT_MAX_DRONE_LINKS,
            registry: None,
        }
    }

    /// Bound concurrent connections. Upgrades beyond the limit get 503.
    pub fn with_limits(mut self, max_observers: usize, max_drone_links: usize) -> Self {
        self.max_observers = max_observers;
        self.max_drone_links = max_drone_links;
        self
    }

    /// Attach a Prometheus registry exposed at `/metrics`.
    pub fn with_metrics_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Bind and spawn the server, returning a shutdown handle.
    pub async fn spawn(self) -> anyhow::Result<FleetServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(
            address = %local_addr,
            max_observers = self.max_observers,
            max_drone_links = self.max_drone_links,
            "fleet server listening"
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let state = Arc::new(AppState {
            ingress: self.ingress,
            hub: self.hub,
            observers: Arc::new(Semaphore::new(self.max_observers)),
            drone_links: Arc::new(Semaphore::new(self.max_drone_links)),
            max_observers: self.max_observers,
            registry: self.registry,
            shutdown: shutdown_rx.clone(),
        });

        let app = Router::new()
            .route("/ws/telemetry", get(websocket::telemetry_upgrade))
            .route("/ws/observer", get(websocket::observer_upgrade))
            .route("/commands", post(rest::post_command))
            .route("/session/reset", post(rest::post_reset))
            .route("/status", get(rest::get_status))
            .route("/snapshot", get(rest::get_snapshot))
            .route("/health", get(rest::get_health))
            .route("/metrics", get(rest::get_metrics))
            .with_state(state);

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "fleet server exited with error");
            }
        });

        Ok(FleetServerHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle for the running server.
pub struct FleetServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FleetServerHandle {
    /// Return the bound listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Trigger graceful shutdown and await completion.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}
