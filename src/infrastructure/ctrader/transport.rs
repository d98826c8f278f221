use super::messages::BrokerMessage;
use crate::domain::errors::MarketDataError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 256;

/// One open broker connection.
///
/// The connection is gone once `inbound` yields `None`; dropping `outbound`
/// closes it from our side.
pub struct BrokerChannel {
    pub outbound: mpsc::Sender<BrokerMessage>,
    pub inbound: mpsc::Receiver<BrokerMessage>,
}

impl BrokerChannel {
    /// A connected pair of channel ends: the first for the client, the
    /// second for whatever plays the broker.
    pub fn pair() -> (BrokerChannel, BrokerChannel) {
        let (to_broker_tx, to_broker_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (to_client_tx, to_client_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            BrokerChannel {
                outbound: to_broker_tx,
                inbound: to_client_rx,
            },
            BrokerChannel {
                outbound: to_client_tx,
                inbound: to_broker_rx,
            },
        )
    }
}

/// Opens connections to the broker.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn open(&self) -> Result<BrokerChannel, MarketDataError>;
}

/// Shortest heartbeat period; `tokio::time::interval` rejects zero.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// JSON envelopes over a WebSocket with a periodic heartbeat.
pub struct WebSocketTransport {
    url: String,
    heartbeat_interval: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, heartbeat_interval: Duration) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
}

#[async_trait]
impl BrokerTransport for WebSocketTransport {
    async fn open(&self) -> Result<BrokerChannel, MarketDataError> {
        info!("WebSocketTransport: Connecting to {}", self.url);

        let (ws_stream, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| MarketDataError::ConnectionLost {
                    reason: format!("connect to {} failed: {}", self.url, e),
                })?;

        info!("WebSocketTransport: Connected");

        let (mut write, mut read) = ws_stream.split();
        let (client, server_side) = BrokerChannel::pair();
        let BrokerChannel {
            outbound: inbound_tx,
            inbound: mut outgoing_rx,
        } = server_side;
        let heartbeat_interval = self.heartbeat_interval;

        // Writer: outgoing envelopes plus heartbeats
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_interval);
            heartbeat.tick().await;

            loop {
                let msg = tokio::select! {
                    outgoing = outgoing_rx.recv() => match outgoing {
                        Some(msg) => msg,
                        None => break,
                    },
                    _ = heartbeat.tick() => BrokerMessage::heartbeat(),
                };

                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("WebSocketTransport: Dropping unencodable message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    warn!("WebSocketTransport: Write failed: {}", e);
                    break;
                }
            }

            let _ = write.send(Message::Close(None)).await;
            debug!("WebSocketTransport: Writer stopped");
        });

        // Reader: decoded envelopes until the socket ends
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match BrokerMessage::from_json(&text) {
                        Ok(msg) => {
                            if inbound_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("WebSocketTransport: Undecodable frame: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        match frame {
                            Some(cf) => info!(
                                "WebSocketTransport: Closed by server: Code {} Reason '{}'",
                                cf.code, cf.reason
                            ),
                            None => info!("WebSocketTransport: Closed by server"),
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocketTransport: Read error: {}", e);
                        break;
                    }
                }
            }
            debug!("WebSocketTransport: Reader stopped");
        });

        Ok(client)
    }
}
