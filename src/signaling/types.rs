use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Utf8Bytes};

use super::messages::SignalMessage;

/// Signaling relay errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("origin rejected: {0}")]
    OriginRejected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

const PEER_ID_PREFIX: &str = "peer_";
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Opaque participant identifier, assigned by the relay on accept.
///
/// Backed by a shared string so that fan-out to a room clones a pointer,
/// not the text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<str>);

impl PeerId {
    /// "peer_" followed by 8 random hex digits
    pub fn generate() -> Self {
        let value: u32 = rand::rng().random();

        let mut id = String::with_capacity(PEER_ID_PREFIX.len() + 8);
        id.push_str(PEER_ID_PREFIX);
        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            id.push(HEX_CHARS[nibble] as char);
        }
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PeerId::from(s))
    }
}

/// Caller-supplied room name. Compared by string equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(Arc<str>);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(RoomId::from(s))
    }
}

/// One encoded frame queued for a client's socket.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Serialize a signal message once so it can be fanned out by cheap clones.
    pub fn encode(msg: &SignalMessage) -> Result<Self, SignalingError> {
        Ok(Self::from(serde_json::to_string(msg)?))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Outbound half of one connected client, as held by the relay.
#[derive(Debug)]
pub(crate) struct PeerState {
    /// Unbounded so that routing never waits on a slow or departed peer.
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
}
