use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::error::MeshError;
use crate::signaling::SignalMessage;

/// WebSocket connection to the relay, exposed as a pair of message channels.
///
/// Dropping the outbound sender closes the socket.
pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<SignalMessage>,
    inbound: mpsc::UnboundedReceiver<SignalMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self, MeshError> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("Connected to relay at {}", url);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outbound, mut out_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let (in_tx, inbound) = mpsc::unbounded_channel::<SignalMessage>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode {}: {}", msg.kind(), e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            debug!("Signaling writer finished");
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SignalMessage>(&text) {
                        Ok(msg) => {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Invalid message from relay: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Relay closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            debug!("Signaling reader finished");
        });

        Ok(Self {
            outbound,
            inbound,
            reader,
            writer,
        })
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<SignalMessage> {
        self.outbound.clone()
    }

    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.inbound.recv().await
    }

    /// Hand the channels to a coordinator. The socket tasks keep running
    /// until the relay hangs up or every sender is dropped; the returned
    /// writer handle finishes once the close frame is out.
    pub fn into_channels(
        self,
    ) -> (
        mpsc::UnboundedSender<SignalMessage>,
        mpsc::UnboundedReceiver<SignalMessage>,
        JoinHandle<()>,
    ) {
        (self.outbound, self.inbound, self.writer)
    }

    /// Close the socket now.
    pub fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}
