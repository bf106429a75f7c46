use thiserror::Error;
use tokio_tungstenite::tungstenite;

use super::link::LinkState;

/// Client-side mesh errors. Everything except `MediaUnavailable` and the
/// transport errors stays local to one link.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("local media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("session description failed: {0}")]
    Session(String),

    #[error("candidate rejected: {0}")]
    Candidate(String),

    #[error("{event} not allowed in state {state}")]
    InvalidTransition {
        state: LinkState,
        event: &'static str,
    },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("signaling channel closed")]
    Closed,
}
