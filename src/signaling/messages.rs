use serde::{Deserialize, Serialize};

use super::types::{PeerId, RoomId};

/// Opaque session description produced by the transport collaborator.
pub type SessionDescription = serde_json::Value;

/// Opaque network-path candidate produced by the transport collaborator.
pub type Candidate = serde_json::Value;

/// Messages exchanged between clients and the relay.
///
/// One vocabulary serves both directions. `from` on the directed messages
/// is optional on the way in and always overwritten by the relay with the
/// sender's own id on the way out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Enter a room (leaving any room the sender is already in)
    JoinRoom { room: RoomId },

    /// Leave the current room without disconnecting
    LeaveRoom,

    /// Members present before the joiner, in join order (relay -> joiner)
    ExistingMembers { members: Vec<PeerId> },

    /// Someone joined after you (relay -> existing members)
    MemberJoined { id: PeerId },

    Offer {
        to: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<PeerId>,
        sdp: SessionDescription,
    },

    Answer {
        to: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<PeerId>,
        sdp: SessionDescription,
    },

    NetworkCandidate {
        to: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<PeerId>,
        candidate: Candidate,
    },

    /// A room-mate disconnected or left (relay -> room)
    MemberLeft { id: PeerId },

    /// The relay could not handle the sender's last frame (relay -> sender)
    Error { message: String },
}

impl SignalMessage {
    /// Short wire name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::JoinRoom { .. } => "join-room",
            SignalMessage::LeaveRoom => "leave-room",
            SignalMessage::ExistingMembers { .. } => "existing-members",
            SignalMessage::MemberJoined { .. } => "member-joined",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::NetworkCandidate { .. } => "network-candidate",
            SignalMessage::MemberLeft { .. } => "member-left",
            SignalMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_join_room() {
        let json = r#"{"type": "join-room", "room": "r1"}"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            SignalMessage::JoinRoom {
                room: RoomId::from("r1")
            }
        );
    }

    #[test]
    fn parse_leave_room() {
        let json = r#"{"type": "leave-room"}"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, SignalMessage::LeaveRoom));
    }

    #[test]
    fn parse_offer_without_from() {
        let json = r#"{"type": "offer", "to": "peer_aaaa0000", "sdp": {"type": "offer", "sdp": "v=0"}}"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        if let SignalMessage::Offer { to, from, sdp } = msg {
            assert_eq!(to.as_str(), "peer_aaaa0000");
            assert!(from.is_none());
            assert_eq!(sdp["sdp"], "v=0");
        } else {
            panic!("Expected Offer");
        }
    }

    #[test]
    fn parse_candidate_keeps_payload_opaque() {
        let json = r#"{"type": "network-candidate", "to": "peer_b", "from": "peer_a",
                       "candidate": {"candidate": "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host", "sdpMid": "0"}}"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        if let SignalMessage::NetworkCandidate {
            from, candidate, ..
        } = msg
        {
            assert_eq!(from, Some(PeerId::from("peer_a")));
            assert_eq!(candidate["sdpMid"], "0");
        } else {
            panic!("Expected NetworkCandidate");
        }
    }

    #[test]
    fn reject_unknown_type() {
        let json = r#"{"type": "renegotiate", "to": "peer_b"}"#;
        assert!(serde_json::from_str::<SignalMessage>(json).is_err());
    }

    #[test]
    fn reject_offer_without_target() {
        let json = r#"{"type": "offer", "sdp": {}}"#;
        assert!(serde_json::from_str::<SignalMessage>(json).is_err());
    }

    #[test]
    fn serialize_existing_members_preserves_order() {
        let msg = SignalMessage::ExistingMembers {
            members: vec![PeerId::from("peer_first"), PeerId::from("peer_second")],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"existing-members","members":["peer_first","peer_second"]}"#
        );
    }

    #[test]
    fn serialize_answer_with_from() {
        let msg = SignalMessage::Answer {
            to: PeerId::from("peer_b"),
            from: Some(PeerId::from("peer_a")),
            sdp: json!({"type": "answer"}),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "answer");
        assert_eq!(value["to"], "peer_b");
        assert_eq!(value["from"], "peer_a");
    }

    #[test]
    fn serialize_offer_omits_missing_from() {
        let msg = SignalMessage::Offer {
            to: PeerId::from("peer_b"),
            from: None,
            sdp: json!({}),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("from"));
    }

    #[test]
    fn serialize_error() {
        let msg = SignalMessage::Error {
            message: "Invalid message".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("Invalid message"));
    }
}
