use crate::domain::event::{CLOSE_SUPERSEDED, ServerEvent};
use crate::services::gateway::Metrics;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct Session {
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub request_id: String,
    pub socket: WebSocket,
    pub outbound_rx: mpsc::Receiver<ServerEvent>,
    pub metrics: Metrics,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl Session {
    #[tracing::instrument(
        name = "websocket_session",
        skip(self),
        fields(
            user_id = %self.user_id,
            request_id = %self.request_id,
            otel.kind = "server",
            ws.session_id = %self.connection_id
        )
    )]
    pub(crate) async fn run(self) {
        let Self { socket, mut outbound_rx, metrics, mut shutdown_rx, .. } = self;

        metrics.active_connections.add(1, &[]);
        tracing::info!("WebSocket connected");

        let (mut ws_sink, mut ws_stream) = socket.split();

        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("Shutdown signal received, closing WebSocket");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {}

                msg = ws_stream.next() => {
                    // The channel is push-only; inbound frames other than close are ignored.
                    let continue_loop = match msg {
                        Some(Ok(WsMessage::Close(_)) | Err(_)) | None => false,
                        Some(Ok(WsMessage::Text(t))) => {
                            tracing::debug!(len = t.as_str().len(), "Ignoring inbound text frame");
                            true
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            tracing::debug!("Ignoring inbound binary frame");
                            true
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => true,
                    };

                    if !continue_loop { break; }
                }

                event = outbound_rx.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Connection superseded, closing WebSocket");
                        let _ = ws_sink
                            .send(WsMessage::Close(Some(CloseFrame {
                                code: CLOSE_SUPERSEDED,
                                reason: "Replaced by a newer connection".into(),
                            })))
                            .await;
                        break;
                    };

                    let name = event.name();
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if ws_sink.send(WsMessage::Text(json.into())).await.is_err() { break; }
                            metrics.frames_sent_total.add(1, &[KeyValue::new("event", name)]);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, event = name, "Failed to encode event");
                            metrics.encode_failures_total.add(1, &[]);
                        }
                    }
                }
            }
        }

        let _ = ws_sink.close().await;

        metrics.active_connections.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
}
