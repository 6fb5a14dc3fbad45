use crate::domain::event::{CLOSE_SUPERSEDED, ServerEvent};
use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use reqwest::Url;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSignal {
    Event(ServerEvent),
    /// The channel came back after a drop. Anything pushed in between was missed.
    Reconnected,
    /// A newer connection for the same user took over; the channel will not reconnect.
    Superseded,
}

enum SessionEnd {
    Dropped,
    Superseded,
    ReceiverGone,
}

/// Server push subscription over the gateway WebSocket, reconnecting with exponential backoff.
#[derive(Debug, Clone)]
pub struct PushChannel {
    url: Url,
    retry: ExponentialBuilder,
}

impl PushChannel {
    #[must_use]
    pub fn new(url: Url) -> Self {
        let retry = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(30))
            .with_max_times(10);
        Self { url, retry }
    }

    #[must_use]
    pub fn with_backoff(mut self, min_delay: Duration, max_delay: Duration, max_times: usize) -> Self {
        self.retry = ExponentialBuilder::default()
            .with_min_delay(min_delay)
            .with_max_delay(max_delay)
            .with_max_times(max_times);
        self
    }

    /// Connects in the background and forwards signals to `tx` until the receiver is
    /// dropped, the connection is superseded, or reconnect attempts run out.
    pub fn spawn(self, tx: mpsc::Sender<PushSignal>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(tx).await })
    }

    async fn run(self, tx: mpsc::Sender<PushSignal>) {
        let mut connected_before = false;

        loop {
            let connect = (|| async { tokio_tungstenite::connect_async(self.url.as_str()).await })
                .retry(&self.retry)
                .notify(|e, duration| {
                    tracing::debug!(error = %e, ?duration, "Push channel connect failed, retrying");
                })
                .await;

            let stream = match connect {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::error!(error = %e, "Push channel gave up reconnecting");
                    return;
                }
            };

            tracing::info!("Push channel connected");
            if connected_before && tx.send(PushSignal::Reconnected).await.is_err() {
                return;
            }
            connected_before = true;

            match Self::pump(stream, &tx).await {
                SessionEnd::Dropped => tracing::warn!("Push channel dropped, reconnecting"),
                SessionEnd::Superseded => {
                    tracing::info!("Push channel superseded by a newer connection");
                    let _ = tx.send(PushSignal::Superseded).await;
                    return;
                }
                SessionEnd::ReceiverGone => return,
            }
        }
    }

    async fn pump<S>(mut stream: S, tx: &mpsc::Sender<PushSignal>) -> SessionEnd
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                    Ok(event) => {
                        if tx.send(PushSignal::Event(event)).await.is_err() {
                            return SessionEnd::ReceiverGone;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring undecodable push frame"),
                },
                Ok(WsMessage::Close(Some(frame))) if u16::from(frame.code) == CLOSE_SUPERSEDED => {
                    return SessionEnd::Superseded;
                }
                Ok(WsMessage::Close(_)) => return SessionEnd::Dropped,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Push channel read failed");
                    return SessionEnd::Dropped;
                }
            }
        }
        SessionEnd::Dropped
    }
}

/// Handle to background push processing. Cancelled explicitly or on drop.
#[derive(Debug)]
pub struct Subscription {
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    #[must_use]
    pub const fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }

    pub fn cancel(self) {
        drop(self);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
