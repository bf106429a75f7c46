//! In-process stand-ins for the media and transport collaborators.
//!
//! They produce placeholder descriptions and candidates and record what the
//! mesh asked of them. `mesh_probe` uses them to exercise a relay without a
//! real media stack; tests use them to observe the handshake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::info;

use super::collab::{
    LocalMedia, MediaHandle, Renderer, SessionEvents, SessionFactory, TransportSession,
};
use super::error::MeshError;
use crate::signaling::{Candidate, PeerId, SessionDescription};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct LoopbackMedia {
    unavailable: bool,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl LoopbackMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Media whose acquisition is always denied.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalMedia for LoopbackMedia {
    async fn acquire(&self) -> Result<MediaHandle, MeshError> {
        if self.unavailable {
            return Err(MeshError::MediaUnavailable("permission denied".to_string()));
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MediaHandle::new(format!("loopback-local-{}", n)))
    }

    fn release(&self, _handle: &MediaHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Knobs for sessions opened by a `LoopbackSessions` factory.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBehavior {
    /// Local candidates emitted after each offer or answer.
    pub candidates: usize,
    pub fail_offer: bool,
    pub fail_answer: bool,
    pub fail_remote: bool,
    /// When set, `create_offer` waits for a permit.
    pub offer_gate: Option<Arc<Semaphore>>,
}

pub struct LoopbackSession {
    events: SessionEvents,
    behavior: LoopbackBehavior,
    attached: Mutex<Vec<MediaHandle>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    applied: Mutex<Vec<Candidate>>,
    offers: AtomicUsize,
    closed: AtomicBool,
}

impl LoopbackSession {
    fn new(events: SessionEvents, behavior: LoopbackBehavior) -> Self {
        Self {
            events,
            behavior,
            attached: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            offers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn attached(&self) -> Vec<MediaHandle> {
        lock(&self.attached).clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.remote).clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local).clone()
    }

    /// Remote candidates accepted so far, in order.
    pub fn applied_candidates(&self) -> Vec<Candidate> {
        lock(&self.applied).clone()
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn describe(&self, kind: &str) -> SessionDescription {
        json!({
            "type": kind,
            "sdp": format!("v=0 loopback {} toward {}", kind, self.events.peer()),
        })
    }

    fn emit_candidates(&self) {
        for i in 0..self.behavior.candidates {
            let line = format!(
                "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                i,
                50000 + i
            );
            self.events.candidate(json!({ "candidate": line, "sdpMid": "0" }));
        }
    }
}

#[async_trait]
impl TransportSession for LoopbackSession {
    fn attach(&self, media: &MediaHandle) -> Result<(), MeshError> {
        lock(&self.attached).push(media.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, MeshError> {
        if let Some(gate) = &self.behavior.offer_gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| MeshError::Session("offer gate closed".to_string()))?;
        }
        if self.behavior.fail_offer {
            return Err(MeshError::Session("offer rejected".to_string()));
        }
        self.offers.fetch_add(1, Ordering::SeqCst);
        let sdp = self.describe("offer");
        *lock(&self.local) = Some(sdp.clone());
        self.emit_candidates();
        Ok(sdp)
    }

    async fn create_answer(&self) -> Result<SessionDescription, MeshError> {
        if self.behavior.fail_answer {
            return Err(MeshError::Session("answer rejected".to_string()));
        }
        if lock(&self.remote).is_none() {
            return Err(MeshError::Session("no remote offer".to_string()));
        }
        let sdp = self.describe("answer");
        *lock(&self.local) = Some(sdp.clone());
        self.emit_candidates();
        Ok(sdp)
    }

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), MeshError> {
        if self.behavior.fail_remote {
            return Err(MeshError::Session("remote description rejected".to_string()));
        }
        *lock(&self.remote) = Some(sdp);
        self.events
            .remote_media(MediaHandle::new(format!("loopback-remote-{}", self.events.peer())));
        Ok(())
    }

    async fn add_candidate(&self, candidate: Candidate) -> Result<(), MeshError> {
        if lock(&self.remote).is_none() {
            return Err(MeshError::Candidate("remote description not set".to_string()));
        }
        if candidate.get("stale").is_some() {
            return Err(MeshError::Candidate("stale candidate".to_string()));
        }
        lock(&self.applied).push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Opens `LoopbackSession`s and keeps every one of them for inspection.
#[derive(Default)]
pub struct LoopbackSessions {
    behavior: LoopbackBehavior,
    opened: Mutex<HashMap<PeerId, Vec<Arc<LoopbackSession>>>>,
}

impl LoopbackSessions {
    pub fn new(behavior: LoopbackBehavior) -> Self {
        Self {
            behavior,
            opened: Mutex::new(HashMap::new()),
        }
    }

    /// Most recent session opened toward `peer`.
    pub fn session(&self, peer: &PeerId) -> Option<Arc<LoopbackSession>> {
        lock(&self.opened).get(peer).and_then(|s| s.last().cloned())
    }

    pub fn opened_toward(&self, peer: &PeerId) -> usize {
        lock(&self.opened).get(peer).map_or(0, Vec::len)
    }
}

impl SessionFactory for LoopbackSessions {
    fn open(
        &self,
        remote: &PeerId,
        events: SessionEvents,
    ) -> Result<Arc<dyn TransportSession>, MeshError> {
        let session = Arc::new(LoopbackSession::new(events, self.behavior.clone()));
        lock(&self.opened)
            .entry(remote.clone())
            .or_default()
            .push(session.clone());
        Ok(session)
    }
}

/// Logs and records what it is asked to show.
#[derive(Debug, Default)]
pub struct LoopbackRenderer {
    presented: Mutex<Vec<(PeerId, MediaHandle)>>,
    removed: Mutex<Vec<PeerId>>,
}

impl LoopbackRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> Vec<(PeerId, MediaHandle)> {
        lock(&self.presented).clone()
    }

    pub fn removed(&self) -> Vec<PeerId> {
        lock(&self.removed).clone()
    }
}

impl Renderer for LoopbackRenderer {
    fn present(&self, participant: &PeerId, media: MediaHandle) {
        info!("Showing {} for {}", media, participant);
        lock(&self.presented).push((participant.clone(), media));
    }

    fn remove(&self, participant: &PeerId) {
        info!("Removing {}", participant);
        lock(&self.removed).push(participant.clone());
    }
}
