pub(crate) mod session;

use crate::config::WsConfig;
use crate::services::gateway::session::Session;
use crate::services::presence::{ConnectionHandle, PresenceRegistry};
use axum::extract::ws::WebSocket;
use opentelemetry::{
    global,
    metrics::{Counter, UpDownCounter},
};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) active_connections: UpDownCounter<i64>,
    pub(crate) frames_sent_total: Counter<u64>,
    pub(crate) encode_failures_total: Counter<u64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            active_connections: meter
                .i64_up_down_counter("parley_websocket_active_connections")
                .with_description("Number of active WebSocket connections")
                .build(),
            frames_sent_total: meter
                .u64_counter("parley_websocket_frames_sent_total")
                .with_description("Event frames written to WebSocket connections")
                .build(),
            encode_failures_total: meter
                .u64_counter("parley_websocket_encode_failures_total")
                .with_description("Events that could not be serialized for the wire")
                .build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the lifecycle of live push connections.
#[derive(Clone, Debug)]
pub struct GatewayService {
    presence: PresenceRegistry,
    config: WsConfig,
    metrics: Metrics,
}

impl GatewayService {
    #[must_use]
    pub fn new(presence: PresenceRegistry, config: WsConfig) -> Self {
        Self { presence, config, metrics: Metrics::new() }
    }

    /// Registers the socket as `user_id`'s live connection and pumps events to it until
    /// the client leaves, a newer connection replaces it, or the server shuts down.
    pub async fn handle_socket(
        &self,
        socket: WebSocket,
        user_id: Uuid,
        request_id: String,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer_size);
        let handle = ConnectionHandle::new(tx);
        let connection_id = handle.connection_id();

        // Dropping the replaced handle closes the older session's channel.
        drop(self.presence.register(user_id, handle));

        let session = Session {
            user_id,
            connection_id,
            request_id,
            socket,
            outbound_rx: rx,
            metrics: self.metrics.clone(),
            shutdown_rx,
        };

        session.run().await;

        self.presence.unregister(user_id, connection_id);
    }
}
