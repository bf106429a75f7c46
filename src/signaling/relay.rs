use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::messages::SignalMessage;
use super::registry::RoomRegistry;
use super::types::{OutboundMessage, PeerId, PeerState, RoomId};

/// Routing core of the relay.
///
/// Owns the room registry and the outbound channel of every connected
/// client. Each call handles one client event to completion; the actor
/// in front of it guarantees calls never interleave.
#[derive(Debug, Default)]
pub struct SignalingRelay {
    registry: RoomRegistry,
    peers: HashMap<PeerId, PeerState>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, peer_id: PeerId, tx: mpsc::UnboundedSender<OutboundMessage>) {
        debug!("Peer {} connected", peer_id);
        self.peers.insert(peer_id, PeerState { tx });
    }

    /// Handle one inbound message from `sender`.
    pub fn handle(&mut self, sender: &PeerId, msg: SignalMessage) {
        match msg {
            SignalMessage::JoinRoom { room } => self.join(sender, room),

            SignalMessage::LeaveRoom => self.leave_rooms(sender),

            SignalMessage::Offer { to, sdp, .. } => {
                let msg = SignalMessage::Offer {
                    to: to.clone(),
                    from: Some(sender.clone()),
                    sdp,
                };
                self.route(&to, &msg);
            }

            SignalMessage::Answer { to, sdp, .. } => {
                let msg = SignalMessage::Answer {
                    to: to.clone(),
                    from: Some(sender.clone()),
                    sdp,
                };
                self.route(&to, &msg);
            }

            SignalMessage::NetworkCandidate { to, candidate, .. } => {
                let msg = SignalMessage::NetworkCandidate {
                    to: to.clone(),
                    from: Some(sender.clone()),
                    candidate,
                };
                self.route(&to, &msg);
            }

            SignalMessage::ExistingMembers { .. }
            | SignalMessage::MemberJoined { .. }
            | SignalMessage::MemberLeft { .. }
            | SignalMessage::Error { .. } => {
                warn!("Peer {} sent relay-only message {}", sender, msg.kind());
                let err = SignalMessage::Error {
                    message: format!("unexpected message from client: {}", msg.kind()),
                };
                self.send(sender, &err);
            }
        }
    }

    /// Announce departure to every room the peer was in and forget it.
    pub fn disconnect(&mut self, peer_id: &PeerId) {
        self.leave_rooms(peer_id);
        self.peers.remove(peer_id);
        debug!("Peer {} disconnected", peer_id);
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }

    fn join(&mut self, joiner: &PeerId, room: RoomId) {
        if self.registry.room_of(joiner) == Some(&room) {
            let members = self.registry.join(&room, joiner);
            debug!("Peer {} re-joined room {}", joiner, room);
            self.send(joiner, &SignalMessage::ExistingMembers { members });
            return;
        }

        self.leave_rooms(joiner);

        let members = self.registry.join(&room, joiner);
        info!(
            "Peer {} joined room {} ({} already present)",
            joiner,
            room,
            members.len()
        );

        // The snapshot goes out before the broadcast, and only the joiner
        // gets it: the joiner initiates toward every existing member.
        self.send(
            joiner,
            &SignalMessage::ExistingMembers {
                members: members.clone(),
            },
        );
        self.broadcast(&members, &SignalMessage::MemberJoined { id: joiner.clone() });
    }

    fn leave_rooms(&mut self, peer_id: &PeerId) {
        for room in self.registry.rooms_of(peer_id) {
            let remaining: Vec<PeerId> = self
                .registry
                .members(&room)
                .iter()
                .filter(|member| *member != peer_id)
                .cloned()
                .collect();

            self.broadcast(
                &remaining,
                &SignalMessage::MemberLeft {
                    id: peer_id.clone(),
                },
            );
            self.registry.leave(peer_id);

            info!("Peer {} left room {}", peer_id, room);
            if !self.registry.contains(&room) {
                info!("Room {} removed (empty)", room);
            }
        }
    }

    /// Deliver to `to` if connected. A miss is a lost race, not an error.
    fn route(&self, to: &PeerId, msg: &SignalMessage) {
        if !self.is_connected(to) {
            debug!("Dropping {} for unknown peer {}", msg.kind(), to);
            return;
        }
        self.send(to, msg);
    }

    fn send(&self, to: &PeerId, msg: &SignalMessage) {
        let Some(peer) = self.peers.get(to) else {
            debug!("Dropping {} for unknown peer {}", msg.kind(), to);
            return;
        };
        match OutboundMessage::encode(msg) {
            Ok(out) => {
                if peer.tx.send(out).is_err() {
                    debug!("Peer {} outbound channel closed", to);
                }
            }
            Err(e) => error!("Failed to encode {}: {}", msg.kind(), e),
        }
    }

    fn broadcast(&self, recipients: &[PeerId], msg: &SignalMessage) {
        if recipients.is_empty() {
            return;
        }
        let out = match OutboundMessage::encode(msg) {
            Ok(out) => out,
            Err(e) => {
                error!("Failed to encode {}: {}", msg.kind(), e);
                return;
            }
        };
        for id in recipients {
            if let Some(peer) = self.peers.get(id) {
                let _ = peer.tx.send(out.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Client {
        id: PeerId,
        rx: mpsc::UnboundedReceiver<OutboundMessage>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<SignalMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(serde_json::from_str(msg.as_str()).unwrap());
            }
            out
        }
    }

    fn connect(relay: &mut SignalingRelay, id: &str) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = PeerId::from(id);
        relay.connect(id.clone(), tx);
        Client { id, rx }
    }

    fn join(relay: &mut SignalingRelay, client: &Client, room: &str) {
        relay.handle(
            &client.id,
            SignalMessage::JoinRoom {
                room: RoomId::from(room),
            },
        );
    }

    #[test]
    fn joiner_gets_snapshot_and_others_get_notice() {
        let mut relay = SignalingRelay::new();
        let mut a = connect(&mut relay, "peer_a");
        let mut b = connect(&mut relay, "peer_b");

        join(&mut relay, &a, "r1");
        assert_eq!(a.drain(), vec![SignalMessage::ExistingMembers { members: vec![] }]);

        join(&mut relay, &b, "r1");
        assert_eq!(
            b.drain(),
            vec![SignalMessage::ExistingMembers {
                members: vec![a.id.clone()],
            }]
        );
        assert_eq!(a.drain(), vec![SignalMessage::MemberJoined { id: b.id.clone() }]);
    }

    #[test]
    fn joiner_never_hears_its_own_join() {
        let mut relay = SignalingRelay::new();
        let a = connect(&mut relay, "peer_a");
        let mut b = connect(&mut relay, "peer_b");

        join(&mut relay, &a, "r1");
        join(&mut relay, &b, "r1");

        let got = b.drain();
        assert!(
            !got.iter()
                .any(|m| matches!(m, SignalMessage::MemberJoined { .. }))
        );
    }

    #[test]
    fn offer_is_forwarded_with_sender_id() {
        let mut relay = SignalingRelay::new();
        let mut a = connect(&mut relay, "peer_a");
        let b = connect(&mut relay, "peer_b");

        relay.handle(
            &b.id,
            SignalMessage::Offer {
                to: a.id.clone(),
                from: None,
                sdp: json!({"type": "offer", "sdp": "v=0"}),
            },
        );

        assert_eq!(
            a.drain(),
            vec![SignalMessage::Offer {
                to: a.id.clone(),
                from: Some(b.id.clone()),
                sdp: json!({"type": "offer", "sdp": "v=0"}),
            }]
        );
    }

    #[test]
    fn claimed_sender_is_overwritten() {
        let mut relay = SignalingRelay::new();
        let mut a = connect(&mut relay, "peer_a");
        let b = connect(&mut relay, "peer_b");

        relay.handle(
            &b.id,
            SignalMessage::NetworkCandidate {
                to: a.id.clone(),
                from: Some(PeerId::from("peer_somebody_else")),
                candidate: json!({"candidate": "c1"}),
            },
        );

        match a.drain().as_slice() {
            [SignalMessage::NetworkCandidate { from, .. }] => {
                assert_eq!(from.as_ref(), Some(&b.id));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn message_to_unknown_peer_is_dropped_silently() {
        let mut relay = SignalingRelay::new();
        let mut a = connect(&mut relay, "peer_a");

        relay.handle(
            &a.id,
            SignalMessage::Answer {
                to: PeerId::from("peer_gone"),
                from: None,
                sdp: json!({}),
            },
        );

        assert!(a.drain().is_empty());
    }

    #[test]
    fn disconnect_notifies_remaining_members() {
        let mut relay = SignalingRelay::new();
        let a = connect(&mut relay, "peer_a");
        let mut b = connect(&mut relay, "peer_b");
        let mut c = connect(&mut relay, "peer_c");
        join(&mut relay, &a, "r1");
        join(&mut relay, &b, "r1");
        join(&mut relay, &c, "r1");
        b.drain();
        c.drain();

        relay.disconnect(&a.id);

        assert_eq!(b.drain(), vec![SignalMessage::MemberLeft { id: a.id.clone() }]);
        assert_eq!(c.drain(), vec![SignalMessage::MemberLeft { id: a.id.clone() }]);
        assert_eq!(relay.registry().members(&RoomId::from("r1")).len(), 2);
        assert_eq!(relay.connected_count(), 2);
    }

    #[test]
    fn routing_after_disconnect_is_a_no_op() {
        let mut relay = SignalingRelay::new();
        let a = connect(&mut relay, "peer_a");
        let mut b = connect(&mut relay, "peer_b");

        relay.disconnect(&a.id);
        relay.handle(
            &b.id,
            SignalMessage::Offer {
                to: a.id.clone(),
                from: None,
                sdp: json!({}),
            },
        );

        assert!(b.drain().is_empty());
    }

    #[test]
    fn explicit_leave_broadcasts_member_left() {
        let mut relay = SignalingRelay::new();
        let mut a = connect(&mut relay, "peer_a");
        let b = connect(&mut relay, "peer_b");
        join(&mut relay, &a, "r1");
        join(&mut relay, &b, "r1");
        a.drain();

        relay.handle(&b.id, SignalMessage::LeaveRoom);

        assert_eq!(a.drain(), vec![SignalMessage::MemberLeft { id: b.id.clone() }]);
        assert_eq!(relay.connected_count(), 2);
    }

    #[test]
    fn switching_rooms_leaves_the_old_one() {
        let mut relay = SignalingRelay::new();
        let mut a = connect(&mut relay, "peer_a");
        let mut b = connect(&mut relay, "peer_b");
        join(&mut relay, &a, "r1");
        join(&mut relay, &b, "r1");
        a.drain();
        b.drain();

        join(&mut relay, &b, "r2");

        assert_eq!(a.drain(), vec![SignalMessage::MemberLeft { id: b.id.clone() }]);
        assert_eq!(b.drain(), vec![SignalMessage::ExistingMembers { members: vec![] }]);
    }

    #[test]
    fn rejoining_same_room_does_not_rebroadcast() {
        let mut relay = SignalingRelay::new();
        let mut a = connect(&mut relay, "peer_a");
        let mut b = connect(&mut relay, "peer_b");
        join(&mut relay, &a, "r1");
        join(&mut relay, &b, "r1");
        a.drain();
        b.drain();

        join(&mut relay, &b, "r1");

        assert!(a.drain().is_empty());
        assert_eq!(
            b.drain(),
            vec![SignalMessage::ExistingMembers {
                members: vec![a.id.clone()],
            }]
        );
    }

    #[test]
    fn relay_only_message_from_client_gets_error() {
        let mut relay = SignalingRelay::new();
        let mut a = connect(&mut relay, "peer_a");

        relay.handle(
            &a.id,
            SignalMessage::MemberLeft {
                id: PeerId::from("peer_x"),
            },
        );

        assert!(matches!(
            a.drain().as_slice(),
            [SignalMessage::Error { .. }]
        ));
    }

    #[test]
    fn each_pair_has_exactly_one_initiator() {
        let mut relay = SignalingRelay::new();
        let mut clients: Vec<Client> = (0..5)
            .map(|i| connect(&mut relay, &format!("peer_{}", i)))
            .collect();

        let mut initiators = Vec::new();
        let mut notices = Vec::new();
        for i in 0..clients.len() {
            join(&mut relay, &clients[i], "mesh");
            for client in clients.iter_mut() {
                for msg in client.drain() {
                    match msg {
                        SignalMessage::ExistingMembers { members } => {
                            for m in members {
                                initiators.push((client.id.clone(), m));
                            }
                        }
                        SignalMessage::MemberJoined { id } => {
                            notices.push((client.id.clone(), id));
                        }
                        other => panic!("unexpected: {:?}", other),
                    }
                }
            }
        }

        assert_eq!(initiators.len(), 5 * 4 / 2);
        assert_eq!(notices.len(), initiators.len());
        for (joiner, existing) in &initiators {
            assert!(notices.contains(&(existing.clone(), joiner.clone())));
            assert!(!initiators.contains(&(existing.clone(), joiner.clone())));
        }
    }
}
