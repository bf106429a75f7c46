use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::collab::{
    LocalMedia, MediaHandle, Renderer, SessionEvents, SessionFactory, TransportSession,
};
use super::error::MeshError;
use super::link::{LinkOp, LinkState, PeerLink, Role};
use crate::signaling::{Candidate, PeerId, RoomId, SessionDescription, SignalMessage};

/// Everything that re-enters the coordinator's event loop from outside the
/// signaling channel.
#[derive(Debug)]
pub enum MeshEvent {
    /// An async operation started for a link finished.
    Completed {
        peer: PeerId,
        epoch: u64,
        outcome: OpOutcome,
    },
    /// The link's transport session discovered a local candidate.
    LocalCandidate {
        peer: PeerId,
        epoch: u64,
        candidate: Candidate,
    },
    /// The link's transport session started receiving media.
    RemoteMedia {
        peer: PeerId,
        epoch: u64,
        media: MediaHandle,
    },
}

#[derive(Debug)]
pub enum OpOutcome {
    OfferCreated(Result<SessionDescription, MeshError>),
    RemoteApplied(Result<(), MeshError>),
    AnswerCreated(Result<SessionDescription, MeshError>),
    /// Per-candidate failures; the batch itself always completes.
    CandidatesApplied(Vec<MeshError>),
}

/// The external pieces a coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub media: Arc<dyn LocalMedia>,
    pub sessions: Arc<dyn SessionFactory>,
    pub renderer: Arc<dyn Renderer>,
}

/// Owns the local participant's links for one room.
///
/// Role rule: links created from the `ExistingMembers` snapshot initiate;
/// links created by an inbound offer respond. A `MemberJoined` notice never
/// creates a link.
pub struct MeshCoordinator {
    room: RoomId,
    collab: Collaborators,
    local_media: Option<MediaHandle>,
    links: HashMap<PeerId, PeerLink>,
    signals: mpsc::UnboundedSender<SignalMessage>,
    events_tx: mpsc::UnboundedSender<MeshEvent>,
    events_rx: mpsc::UnboundedReceiver<MeshEvent>,
    in_flight: usize,
    next_epoch: u64,
}

impl MeshCoordinator {
    pub fn new(
        room: RoomId,
        collab: Collaborators,
        signals: mpsc::UnboundedSender<SignalMessage>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            room,
            collab,
            local_media: None,
            links: HashMap::new(),
            signals,
            events_tx,
            events_rx,
            in_flight: 0,
            next_epoch: 0,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Acquire local media, then ask the relay to join the room. Without
    /// media there is no point joining, so a failure here is returned and
    /// nothing is sent.
    pub async fn join(&mut self) -> Result<(), MeshError> {
        let media = self.collab.media.acquire().await?;
        info!("Local media {} acquired, joining room {}", media, self.room);
        self.local_media = Some(media);

        self.signal(SignalMessage::JoinRoom {
            room: self.room.clone(),
        })
    }

    /// Close every link, release local media and tell the relay we left.
    pub fn leave(&mut self) {
        let peers: Vec<PeerId> = self.links.keys().cloned().collect();
        for peer in peers {
            self.close_link(&peer);
        }
        if let Some(media) = self.local_media.take() {
            self.collab.media.release(&media);
        }
        let _ = self.signal(SignalMessage::LeaveRoom);
        info!("Left room {}", self.room);
    }

    /// Drive the mesh until the relay goes away or `shutdown` resolves, then
    /// tear everything down. Dropping the coordinator afterwards closes the
    /// signaling channel.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<SignalMessage>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), MeshError> {
        self.join().await?;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle_signal(msg),
                    None => {
                        warn!("Signaling channel closed by relay");
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.leave();
        Ok(())
    }

    pub fn handle_signal(&mut self, msg: SignalMessage) {
        match msg {
            SignalMessage::ExistingMembers { members } => {
                info!("{} existing members in room {}", members.len(), self.room);
                for member in members {
                    self.connect_to(member);
                }
            }

            SignalMessage::MemberJoined { id } => {
                // The joiner offers to us; nothing to do until it does.
                info!("Member {} joined room {}", id, self.room);
            }

            SignalMessage::Offer { from: Some(from), sdp, .. } => self.accept_offer(from, sdp),

            SignalMessage::Answer { from: Some(from), sdp, .. } => {
                let Some(link) = self.links.get_mut(&from) else {
                    debug!("Answer from {} without a link", from);
                    return;
                };
                match link.answer_received(sdp) {
                    Ok(op) => self.spawn_op(&from, op),
                    Err(e) => warn!("Ignoring answer from {}: {}", from, e),
                }
            }

            SignalMessage::NetworkCandidate {
                from: Some(from),
                candidate,
                ..
            } => {
                let Some(link) = self.links.get_mut(&from) else {
                    debug!("Candidate from {} without a link", from);
                    return;
                };
                if let Some(op) = link.remote_candidate(candidate) {
                    self.spawn_op(&from, op);
                }
            }

            SignalMessage::MemberLeft { id } => {
                info!("Member {} left room {}", id, self.room);
                self.close_link(&id);
            }

            SignalMessage::Error { message } => warn!("Relay error: {}", message),

            msg @ (SignalMessage::Offer { from: None, .. }
            | SignalMessage::Answer { from: None, .. }
            | SignalMessage::NetworkCandidate { from: None, .. }
            | SignalMessage::JoinRoom { .. }
            | SignalMessage::LeaveRoom) => {
                warn!("Unexpected {} from relay", msg.kind());
            }
        }
    }

    pub fn handle_event(&mut self, event: MeshEvent) {
        match event {
            MeshEvent::Completed {
                peer,
                epoch,
                outcome,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if !self.is_live(&peer, epoch) {
                    debug!("Discarding stale completion for {} (epoch {})", peer, epoch);
                    return;
                }
                if let Err(e) = self.complete(&peer, outcome) {
                    self.fail_link(&peer, e);
                }
            }

            MeshEvent::LocalCandidate {
                peer,
                epoch,
                candidate,
            } => {
                if !self.is_live(&peer, epoch) {
                    debug!("Dropping local candidate for closed link {}", peer);
                    return;
                }
                let held = self
                    .links
                    .get_mut(&peer)
                    .and_then(|link| link.local_candidate(candidate));
                if let Some(candidate) = held {
                    let _ = self.signal(SignalMessage::NetworkCandidate {
                        to: peer,
                        from: None,
                        candidate,
                    });
                }
            }

            MeshEvent::RemoteMedia { peer, epoch, media } => {
                if !self.is_live(&peer, epoch) {
                    return;
                }
                if let Some(link) = self.links.get_mut(&peer)
                    && link.mark_presented()
                {
                    info!("Presenting media {} from {}", media, peer);
                    self.collab.renderer.present(&peer, media);
                }
            }
        }
    }

    /// Wait for the next link event.
    pub async fn next_event(&mut self) -> Option<MeshEvent> {
        self.events_rx.recv().await
    }

    /// Process link events until no async operation is in flight.
    pub async fn settle(&mut self) {
        loop {
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event);
            }
            if self.in_flight == 0 {
                break;
            }
            match self.events_rx.recv().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
    }

    /// Start an initiator link to `remote`. A second request while a link
    /// exists does nothing. Returns whether a link was created.
    pub fn connect_to(&mut self, remote: PeerId) -> bool {
        if self.links.contains_key(&remote) {
            debug!("Link to {} already exists", remote);
            return false;
        }

        let Some(mut link) = self.open_link(&remote, Role::Initiator) else {
            return false;
        };
        let op = link.start_offer(self.local_media.as_ref());
        self.links.insert(remote.clone(), link);

        match op {
            Ok(op) => self.spawn_op(&remote, op),
            Err(e) => self.fail_link(&remote, e),
        }
        true
    }

    pub fn link(&self, peer: &PeerId) -> Option<&PeerLink> {
        self.links.get(peer)
    }

    pub fn link_state(&self, peer: &PeerId) -> Option<LinkState> {
        self.links.get(peer).map(PeerLink::state)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.links.keys().cloned().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn accept_offer(&mut self, from: PeerId, sdp: SessionDescription) {
        if self.links.contains_key(&from) {
            warn!("Ignoring offer from {}: link already exists", from);
            return;
        }
        let Some(mut link) = self.open_link(&from, Role::Responder) else {
            return;
        };
        let op = link.offer_received(sdp);
        self.links.insert(from.clone(), link);

        match op {
            Ok(op) => self.spawn_op(&from, op),
            Err(e) => self.fail_link(&from, e),
        }
    }

    fn open_link(&mut self, remote: &PeerId, role: Role) -> Option<PeerLink> {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let events = SessionEvents::new(remote.clone(), epoch, self.events_tx.clone());

        match self.collab.sessions.open(remote, events) {
            Ok(session) => {
                debug!("Opened {:?} link to {} (epoch {})", role, remote, epoch);
                Some(PeerLink::new(remote.clone(), role, epoch, session))
            }
            Err(e) => {
                warn!("Could not open session to {}: {}", remote, e);
                None
            }
        }
    }

    fn complete(&mut self, peer: &PeerId, outcome: OpOutcome) -> Result<(), MeshError> {
        let local_media = self.local_media.clone();
        let Some(link) = self.links.get_mut(peer) else {
            return Ok(());
        };

        match outcome {
            OpOutcome::OfferCreated(sdp) => {
                let sdp = sdp?;
                let held = link.offer_created()?;
                self.signal(SignalMessage::Offer {
                    to: peer.clone(),
                    from: None,
                    sdp,
                })?;
                for candidate in held {
                    self.signal(SignalMessage::NetworkCandidate {
                        to: peer.clone(),
                        from: None,
                        candidate,
                    })?;
                }
            }

            OpOutcome::RemoteApplied(result) => {
                result?;
                let ops = link.remote_applied(local_media.as_ref())?;
                if link.state() == LinkState::Connected {
                    info!("Link to {} connected", peer);
                }
                for op in ops {
                    self.spawn_op(peer, op);
                }
            }

            OpOutcome::AnswerCreated(sdp) => {
                let sdp = sdp?;
                link.answer_created()?;
                self.signal(SignalMessage::Answer {
                    to: peer.clone(),
                    from: None,
                    sdp,
                })?;
                if let Some(link) = self.links.get_mut(peer) {
                    link.answer_sent()?;
                    info!("Link to {} connected", peer);
                }
            }

            OpOutcome::CandidatesApplied(failures) => {
                for e in failures {
                    warn!("Dropping candidate from {}: {}", peer, e);
                }
                if let Some(op) = link.candidates_applied() {
                    self.spawn_op(peer, op);
                }
            }
        }
        Ok(())
    }

    fn spawn_op(&mut self, peer: &PeerId, op: LinkOp) {
        let Some(link) = self.links.get(peer) else {
            return;
        };
        let session = link.session();
        let epoch = link.epoch();
        let peer = peer.clone();
        let tx = self.events_tx.clone();

        self.in_flight += 1;
        tokio::spawn(async move {
            let outcome = run_op(session, op).await;
            let _ = tx.send(MeshEvent::Completed {
                peer,
                epoch,
                outcome,
            });
        });
    }

    /// Close and forget the link to `peer`, if any.
    fn close_link(&mut self, peer: &PeerId) -> bool {
        let Some(mut link) = self.links.remove(peer) else {
            return false;
        };
        if link.close() {
            let session = link.session();
            tokio::spawn(async move { session.close().await });
        }
        self.collab.renderer.remove(peer);
        info!("Link to {} closed", peer);
        true
    }

    fn fail_link(&mut self, peer: &PeerId, err: MeshError) {
        warn!("Link to {} failed: {}", peer, err);
        self.close_link(peer);
    }

    fn is_live(&self, peer: &PeerId, epoch: u64) -> bool {
        self.links.get(peer).is_some_and(|link| link.accepts(epoch))
    }

    fn signal(&self, msg: SignalMessage) -> Result<(), MeshError> {
        self.signals.send(msg).map_err(|_| MeshError::Closed)
    }
}

async fn run_op(session: Arc<dyn TransportSession>, op: LinkOp) -> OpOutcome {
    match op {
        LinkOp::CreateOffer => OpOutcome::OfferCreated(session.create_offer().await),
        LinkOp::ApplyRemote(sdp) => {
            OpOutcome::RemoteApplied(session.set_remote_description(sdp).await)
        }
        LinkOp::CreateAnswer => OpOutcome::AnswerCreated(session.create_answer().await),
        LinkOp::ApplyCandidates(batch) => {
            let mut failures = Vec::new();
            for candidate in batch {
                if let Err(e) = session.add_candidate(candidate).await {
                    failures.push(e);
                }
            }
            OpOutcome::CandidatesApplied(failures)
        }
    }
}
