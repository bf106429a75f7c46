//! Client side of mesh formation: one negotiated link per room-mate

mod client;
mod collab;
mod coordinator;
mod error;
mod link;
pub mod loopback;

pub use client::SignalingClient;
pub use collab::{
    LocalMedia, MediaHandle, Renderer, SessionEvents, SessionFactory, TransportSession,
};
pub use coordinator::{Collaborators, MeshCoordinator, MeshEvent, OpOutcome};
pub use error::MeshError;
pub use link::{LinkOp, LinkState, PeerLink, Role};
