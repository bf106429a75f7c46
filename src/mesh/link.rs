use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::collab::{MediaHandle, TransportSession};
use super::error::MeshError;
use crate::signaling::{Candidate, PeerId, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Handshake progress of one link.
///
/// Initiator: Idle -> Offering -> AwaitingAnswer -> Connected.
/// Responder: Idle -> OfferReceived -> Answering -> Connected.
/// Any state may go to Closed, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Offering,
    AwaitingAnswer,
    OfferReceived,
    Answering,
    Connected,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "idle"),
            LinkState::Offering => write!(f, "offering"),
            LinkState::AwaitingAnswer => write!(f, "awaiting-answer"),
            LinkState::OfferReceived => write!(f, "offer-received"),
            LinkState::Answering => write!(f, "answering"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Closed => write!(f, "closed"),
        }
    }
}

/// Asynchronous work a transition asks the coordinator to run against the
/// link's transport session.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOp {
    CreateOffer,
    ApplyRemote(SessionDescription),
    CreateAnswer,
    ApplyCandidates(Vec<Candidate>),
}

/// Local negotiation state toward one remote participant.
///
/// Transitions are synchronous and return the async work to perform; the
/// coordinator runs that work and feeds the outcome back. The epoch tells
/// completions of this link apart from those of an earlier, closed link to
/// the same participant.
pub struct PeerLink {
    remote: PeerId,
    role: Role,
    state: LinkState,
    epoch: u64,
    session: Arc<dyn TransportSession>,
    remote_pending: bool,
    remote_applied: bool,
    pending_candidates: VecDeque<Candidate>,
    applying_candidates: bool,
    held_candidates: Vec<Candidate>,
    media_attached: bool,
    presented: bool,
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("remote", &self.remote)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("queued_candidates", &self.pending_candidates.len())
            .finish()
    }
}

impl PeerLink {
    pub fn new(remote: PeerId, role: Role, epoch: u64, session: Arc<dyn TransportSession>) -> Self {
        Self {
            remote,
            role,
            state: LinkState::Idle,
            epoch,
            session,
            remote_pending: false,
            remote_applied: false,
            pending_candidates: VecDeque::new(),
            applying_candidates: false,
            held_candidates: Vec::new(),
            media_attached: false,
            presented: false,
        }
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn session(&self) -> Arc<dyn TransportSession> {
        self.session.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state == LinkState::Closed
    }

    pub fn media_attached(&self) -> bool {
        self.media_attached
    }

    pub fn queued_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Liveness check for a completing async operation.
    pub fn accepts(&self, epoch: u64) -> bool {
        self.epoch == epoch && !self.is_closed()
    }

    /// Idle -> Offering. Local media goes onto the session before the offer
    /// is generated.
    pub fn start_offer(&mut self, media: Option<&MediaHandle>) -> Result<LinkOp, MeshError> {
        self.guard(self.role == Role::Initiator && self.state == LinkState::Idle, "start-offer")?;
        self.attach(media)?;
        self.state = LinkState::Offering;
        Ok(LinkOp::CreateOffer)
    }

    /// Offering -> AwaitingAnswer, once the offer exists and is about to be
    /// sent. Returns the local candidates held back until now, to be sent
    /// right after the offer.
    pub fn offer_created(&mut self) -> Result<Vec<Candidate>, MeshError> {
        self.guard(self.state == LinkState::Offering, "offer-created")?;
        self.state = LinkState::AwaitingAnswer;
        Ok(std::mem::take(&mut self.held_candidates))
    }

    pub fn answer_received(&mut self, sdp: SessionDescription) -> Result<LinkOp, MeshError> {
        self.guard(
            self.state == LinkState::AwaitingAnswer && !self.remote_pending && !self.remote_applied,
            "answer",
        )?;
        self.remote_pending = true;
        Ok(LinkOp::ApplyRemote(sdp))
    }

    pub fn offer_received(&mut self, sdp: SessionDescription) -> Result<LinkOp, MeshError> {
        self.guard(
            self.role == Role::Responder && self.state == LinkState::Idle && !self.remote_pending,
            "offer",
        )?;
        self.remote_pending = true;
        Ok(LinkOp::ApplyRemote(sdp))
    }

    /// The remote description is now set on the session.
    ///
    /// The initiator is connected; the responder attaches media and moves on
    /// to its answer. Either way every candidate queued so far is released.
    pub fn remote_applied(
        &mut self,
        media: Option<&MediaHandle>,
    ) -> Result<Vec<LinkOp>, MeshError> {
        self.guard(self.remote_pending, "remote-applied")?;

        let mut ops = Vec::new();
        match (self.role, self.state) {
            (Role::Initiator, LinkState::AwaitingAnswer) => {
                self.state = LinkState::Connected;
            }
            (Role::Responder, LinkState::Idle) => {
                self.state = LinkState::OfferReceived;
                self.attach(media)?;
                ops.push(LinkOp::CreateAnswer);
            }
            _ => return Err(self.invalid("remote-applied")),
        }
        self.remote_pending = false;
        self.remote_applied = true;

        ops.extend(self.next_candidate_batch());
        Ok(ops)
    }

    /// OfferReceived -> Answering, once the answer exists and is about to be sent.
    pub fn answer_created(&mut self) -> Result<(), MeshError> {
        self.guard(self.state == LinkState::OfferReceived, "answer-created")?;
        self.state = LinkState::Answering;
        Ok(())
    }

    /// Answering -> Connected, after the answer went out.
    pub fn answer_sent(&mut self) -> Result<(), MeshError> {
        self.guard(self.state == LinkState::Answering, "answer-sent")?;
        self.state = LinkState::Connected;
        Ok(())
    }

    /// A candidate from our own session. Returned if it should go out now.
    ///
    /// Before the offer is out the remote has no link to apply it to, so an
    /// initiator holds it until `offer_created`.
    pub fn local_candidate(&mut self, candidate: Candidate) -> Option<Candidate> {
        match (self.role, self.state) {
            (_, LinkState::Closed) => None,
            (Role::Initiator, LinkState::Idle | LinkState::Offering) => {
                self.held_candidates.push(candidate);
                None
            }
            _ => Some(candidate),
        }
    }

    /// Queue a remote candidate. It is released for application right away
    /// if the remote description is set and no batch is in flight.
    pub fn remote_candidate(&mut self, candidate: Candidate) -> Option<LinkOp> {
        if self.is_closed() {
            return None;
        }
        self.pending_candidates.push_back(candidate);
        self.next_candidate_batch()
    }

    /// The in-flight batch finished; release whatever queued up meanwhile.
    pub fn candidates_applied(&mut self) -> Option<LinkOp> {
        self.applying_candidates = false;
        if self.is_closed() {
            return None;
        }
        self.next_candidate_batch()
    }

    /// First inbound media report for this link. Returns false for repeats.
    pub fn mark_presented(&mut self) -> bool {
        !std::mem::replace(&mut self.presented, true)
    }

    /// Move to Closed and drop queued candidates. Returns false if the link
    /// was already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = LinkState::Closed;
        self.pending_candidates.clear();
        self.held_candidates.clear();
        self.remote_pending = false;
        true
    }

    fn next_candidate_batch(&mut self) -> Option<LinkOp> {
        if !self.remote_applied || self.applying_candidates || self.pending_candidates.is_empty() {
            return None;
        }
        self.applying_candidates = true;
        Some(LinkOp::ApplyCandidates(self.pending_candidates.drain(..).collect()))
    }

    fn attach(&mut self, media: Option<&MediaHandle>) -> Result<(), MeshError> {
        if self.media_attached {
            return Ok(());
        }
        if let Some(media) = media {
            self.session.attach(media)?;
            self.media_attached = true;
        }
        Ok(())
    }

    fn guard(&self, allowed: bool, event: &'static str) -> Result<(), MeshError> {
        if allowed {
            Ok(())
        } else {
            Err(self.invalid(event))
        }
    }

    fn invalid(&self, event: &'static str) -> MeshError {
        MeshError::InvalidTransition {
            state: self.state,
            event,
        }
    }
}
