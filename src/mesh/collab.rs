//! Seams to the pieces the mesh does not implement itself: media capture,
//! the real-time transport, and rendering.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::coordinator::MeshEvent;
use super::error::MeshError;
use crate::signaling::{Candidate, PeerId, SessionDescription};

/// Opaque handle to a media stream owned by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle(Arc<str>);

impl MediaHandle {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local capture device.
#[async_trait]
pub trait LocalMedia: Send + Sync {
    async fn acquire(&self) -> Result<MediaHandle, MeshError>;
    fn release(&self, handle: &MediaHandle);
}

/// One negotiated transport session toward one remote participant.
///
/// `create_offer` and `create_answer` also apply the description they
/// return as the local description.
#[async_trait]
pub trait TransportSession: Send + Sync {
    fn attach(&self, media: &MediaHandle) -> Result<(), MeshError>;
    async fn create_offer(&self) -> Result<SessionDescription, MeshError>;
    async fn create_answer(&self) -> Result<SessionDescription, MeshError>;
    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), MeshError>;
    async fn add_candidate(&self, candidate: Candidate) -> Result<(), MeshError>;
    async fn close(&self);
}

/// Opens transport sessions. Each session reports its locally discovered
/// candidates and inbound media through the `SessionEvents` it was opened with.
pub trait SessionFactory: Send + Sync {
    fn open(
        &self,
        remote: &PeerId,
        events: SessionEvents,
    ) -> Result<Arc<dyn TransportSession>, MeshError>;
}

/// Displays remote participants.
pub trait Renderer: Send + Sync {
    fn present(&self, participant: &PeerId, media: MediaHandle);
    fn remove(&self, participant: &PeerId);
}

/// Event sink handed to a transport session, bound to one link instance.
///
/// Events from a session whose link has since been closed are dropped by
/// the coordinator, so a session may keep emitting after `close`.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    peer: PeerId,
    epoch: u64,
    tx: mpsc::UnboundedSender<MeshEvent>,
}

impl SessionEvents {
    pub(crate) fn new(peer: PeerId, epoch: u64, tx: mpsc::UnboundedSender<MeshEvent>) -> Self {
        Self { peer, epoch, tx }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Report a locally discovered network candidate. Returns false once
    /// the coordinator is gone.
    pub fn candidate(&self, candidate: Candidate) -> bool {
        self.tx
            .send(MeshEvent::LocalCandidate {
                peer: self.peer.clone(),
                epoch: self.epoch,
                candidate,
            })
            .is_ok()
    }

    /// Report that remote media started arriving.
    pub fn remote_media(&self, media: MediaHandle) -> bool {
        self.tx
            .send(MeshEvent::RemoteMedia {
                peer: self.peer.clone(),
                epoch: self.epoch,
                media,
            })
            .is_ok()
    }
}
