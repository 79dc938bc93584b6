//! Control link: persistent WebSocket connection carrying actuation
//! snapshots to the bottom side.
//!
//! The link task is write-only. Each snapshot received from the aggregator
//! becomes one JSON text frame. A failed transmit triggers reconnection
//! with exponential backoff; only an exhausted reconnect budget is reported
//! as fatal on the failure channel.

use crate::uplink::ActuationState;
use futures_util::SinkExt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Control-link failures.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Initial dial failure. There is no control path without the link, so
    /// startup aborts on this.
    #[error("failed to reach control endpoint {url}: {reason}")]
    Dial { url: String, reason: String },

    /// A snapshot did not serialize. Indicates a bug, not a network fault.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    /// Reconnect budget exhausted after a transmit failure.
    #[error("control link lost after {attempts} reconnect attempts")]
    Exhausted { attempts: u32 },
}

/// Reconnect policy for an established link.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff.
    pub max_backoff: Duration,
    /// Attempts per outage before the link gives up.
    pub max_attempts: u32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
            max_attempts: 6,
        }
    }
}

/// Doubling backoff schedule, saturating at the configured ceiling.
fn next_backoff(current: Duration, settings: &LinkSettings) -> Duration {
    (current * 2).min(settings.max_backoff)
}

/// The established connection to the control endpoint.
pub struct ControlLink {
    ws: WsStream,
    url: String,
    settings: LinkSettings,
}

impl ControlLink {
    /// Dials the control endpoint once. The caller treats failure as fatal.
    pub async fn connect(url: &str, settings: Option<LinkSettings>) -> Result<Self, LinkError> {
        let (ws, response) = connect_async(url).await.map_err(|e| LinkError::Dial {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        info!(url, status = %response.status(), "control link established");
        Ok(Self {
            ws,
            url: url.to_string(),
            settings: settings.unwrap_or_default(),
        })
    }

    /// Transmits snapshots until the aggregator stops producing them or the
    /// reconnect budget runs out. Fatal outcomes go to `failures`; the task
    /// returns afterwards, which closes the snapshot channel and stops the
    /// aggregator in turn.
    pub async fn run(mut self, mut snapshots: mpsc::Receiver<ActuationState>, failures: mpsc::Sender<LinkError>) {
        while let Some(snapshot) = snapshots.recv().await {
            let frame = match serde_json::to_string(&snapshot) {
                Ok(frame) => frame,
                Err(e) => {
                    let _ = failures.send(LinkError::Encode(e)).await;
                    return;
                }
            };

            if let Err(e) = self.ws.send(Message::Text(frame.into())).await {
                warn!(seq = snapshot.update_count, "snapshot transmit failed: {e}");
                if let Err(fatal) = self.reconnect().await {
                    let _ = failures.send(fatal).await;
                    return;
                }
                // The failed frame is stale by now; the next publish tick
                // carries current state.
            }
        }
        debug!("snapshot channel closed, control link task ending");
    }

    async fn reconnect(&mut self) -> Result<(), LinkError> {
        let mut backoff = self.settings.initial_backoff;
        for attempt in 1..=self.settings.max_attempts {
            tokio::time::sleep(backoff).await;
            match connect_async(self.url.as_str()).await {
                Ok((ws, _)) => {
                    info!(attempt, "control link re-established");
                    self.ws = ws;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, "reconnect failed: {e}");
                    backoff = next_backoff(backoff, &self.settings);
                }
            }
        }
        Err(LinkError::Exhausted {
            attempts: self.settings.max_attempts,
        })
    }
}
