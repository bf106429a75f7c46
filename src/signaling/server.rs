use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, header::ORIGIN};
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::{RelayCommand, RelayHandle, relay_actor};
use super::messages::SignalMessage;
use super::types::{OutboundMessage, PeerId, SignalingError};
use crate::config::RelayConfig;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct SignalingServer {
    handle: RelayHandle,
    listener: TcpListener,
    config: Arc<RelayConfig>,
}

impl SignalingServer {
    /// Start the relay actor and bind the listening socket.
    pub async fn bind(config: RelayConfig) -> Result<Self, SignalingError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;

        let (tx, rx) = mpsc::channel::<RelayCommand>(1024);
        tokio::spawn(relay_actor(rx));

        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            handle: RelayHandle { tx },
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Serve until the task is dropped. Accept failures are logged and
    /// retried, never returned.
    pub async fn run(self) -> Result<(), SignalingError> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    let backoff = accept_backoff(&e);
                    warn!("Accept failed ({}), retrying in {:?}", e, backoff);
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };
            let handle = self.handle.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle, config).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

/// Delay before the next accept. Per-connection failures retry at once;
/// anything else (fd or memory exhaustion) waits.
fn accept_backoff(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RelayHandle,
    config: Arc<RelayConfig>,
) -> Result<(), SignalingError> {
    let origin_check = {
        let config = config.clone();
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            match check_origin(&config, req) {
                Ok(()) => Ok(resp),
                Err(e) => {
                    warn!("Rejecting {}: {}", addr, e);
                    let mut rejection = ErrorResponse::new(Some(e.to_string()));
                    *rejection.status_mut() = StatusCode::FORBIDDEN;
                    Err(rejection)
                }
            }
        }
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, origin_check).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let peer_id = handle.connect(tx.clone()).await?;
    info!("WebSocket connection from {} as {}", addr, peer_id);

    let mut ping_interval = tokio::time::interval(config.ping_interval);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", peer_id);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + config.pong_timeout);
                debug!("Ping sent to {}", peer_id);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", peer_id);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", peer_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        if let Err(e) = handle_text_message(&text, &tx, &handle, &peer_id).await {
                            warn!("Message handling error from {}: {}", peer_id, e);
                            if matches!(e, SignalingError::Internal(_)) {
                                break;
                            }
                        }
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", peer_id);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", peer_id);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handle.disconnect(&peer_id).await;

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", peer_id, addr);

    Ok(())
}

fn check_origin(config: &RelayConfig, req: &Request) -> Result<(), SignalingError> {
    let Some(value) = req.headers().get(ORIGIN) else {
        return Ok(());
    };
    // A header that is not visible ASCII can never equal a configured
    // origin, but it is still a present Origin.
    let allowed = match value.to_str() {
        Ok(origin) => config.origin_allowed(Some(origin)),
        Err(_) => config.allowed_origin.is_none(),
    };
    if allowed {
        Ok(())
    } else {
        Err(SignalingError::OriginRejected(
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        ))
    }
}

/// A frame that does not parse is answered with an error to its sender
/// only; the connection stays up.
async fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    handle: &RelayHandle,
    peer_id: &PeerId,
) -> Result<(), SignalingError> {
    let msg: SignalMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let err = SignalMessage::Error {
                message: format!("Invalid message: {}", e),
            };
            let _ = tx.send(OutboundMessage::encode(&err)?);
            return Err(e.into());
        }
    };

    debug!("{} from {}", msg.kind(), peer_id);
    handle.dispatch(peer_id, msg).await
}
