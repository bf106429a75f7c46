//! WebSocket signaling relay for mesh formation

mod actor;
mod messages;
mod registry;
mod relay;
mod server;
mod types;

pub use actor::RelayHandle;
pub use messages::{Candidate, SessionDescription, SignalMessage};
pub use registry::RoomRegistry;
pub use relay::SignalingRelay;
pub use server::SignalingServer;
pub use types::{OutboundMessage, PeerId, RoomId, SignalingError};
