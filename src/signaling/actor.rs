use tokio::sync::{mpsc, oneshot};
use tracing::info;

use super::messages::SignalMessage;
use super::relay::SignalingRelay;
use super::types::{OutboundMessage, PeerId, RoomId, SignalingError};

/// Commands sent to the relay actor
pub(crate) enum RelayCommand {
    Connect {
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
        reply: oneshot::Sender<PeerId>,
    },
    Message {
        peer_id: PeerId,
        msg: SignalMessage,
    },
    Disconnect {
        peer_id: PeerId,
    },
    Members {
        room: RoomId,
        reply: oneshot::Sender<Vec<PeerId>>,
    },
}

/// Owns the relay state. Commands are applied one at a time, so a join's
/// snapshot-then-insert can never interleave with another join or leave.
pub(crate) async fn relay_actor(mut rx: mpsc::Receiver<RelayCommand>) {
    let mut relay = SignalingRelay::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RelayCommand::Connect { peer_tx, reply } => {
                let mut peer_id = PeerId::generate();
                while relay.is_connected(&peer_id) {
                    peer_id = PeerId::generate();
                }
                relay.connect(peer_id.clone(), peer_tx);
                let _ = reply.send(peer_id);
            }

            RelayCommand::Message { peer_id, msg } => {
                relay.handle(&peer_id, msg);
            }

            RelayCommand::Disconnect { peer_id } => {
                relay.disconnect(&peer_id);
            }

            RelayCommand::Members { room, reply } => {
                let _ = reply.send(relay.registry().members(&room).to_vec());
            }
        }
    }

    info!(
        "Relay actor stopped ({} peers still connected)",
        relay.connected_count()
    );
}

/// Handle to communicate with the relay actor
#[derive(Clone)]
pub struct RelayHandle {
    pub(crate) tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    /// Register a new client and get the id assigned to it
    pub async fn connect(
        &self,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<PeerId, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayCommand::Connect {
            peer_tx,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    /// Hand one parsed client message to the relay
    pub async fn dispatch(
        &self,
        peer_id: &PeerId,
        msg: SignalMessage,
    ) -> Result<(), SignalingError> {
        self.send(RelayCommand::Message {
            peer_id: peer_id.clone(),
            msg,
        })
        .await
    }

    /// The client's connection is gone
    pub async fn disconnect(&self, peer_id: &PeerId) {
        let _ = self
            .send(RelayCommand::Disconnect {
                peer_id: peer_id.clone(),
            })
            .await;
    }

    /// Current members of a room, in join order
    pub async fn members(&self, room: &RoomId) -> Result<Vec<PeerId>, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayCommand::Members {
            room: room.clone(),
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    async fn send(&self, cmd: RelayCommand) -> Result<(), SignalingError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_actor() -> RelayHandle {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(relay_actor(rx));
        RelayHandle { tx }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> SignalMessage {
        let out = rx.recv().await.unwrap();
        serde_json::from_str(out.as_str()).unwrap()
    }

    #[tokio::test]
    async fn connect_assigns_distinct_ids() {
        let handle = spawn_actor();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let a = handle.connect(tx1).await.unwrap();
        let b = handle.connect(tx2).await.unwrap();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("peer_"));
    }

    #[tokio::test]
    async fn concurrent_joins_each_see_a_consistent_snapshot() {
        let handle = spawn_actor();
        let room = RoomId::from("busy");

        let mut clients = Vec::new();
        for _ in 0..8 {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = handle.connect(tx).await.unwrap();
            clients.push((id, rx));
        }

        let mut joins = Vec::new();
        for (id, _) in &clients {
            let handle = handle.clone();
            let id = id.clone();
            let room = room.clone();
            joins.push(tokio::spawn(async move {
                handle
                    .dispatch(&id, SignalMessage::JoinRoom { room })
                    .await
                    .unwrap();
            }));
        }
        for join in joins {
            join.await.unwrap();
        }

        let members = handle.members(&room).await.unwrap();
        assert_eq!(members.len(), 8);

        // Position in the final member list equals snapshot size.
        for (id, rx) in clients.iter_mut() {
            let position = members.iter().position(|m| *m == *id).unwrap();
            match next(rx).await {
                SignalMessage::ExistingMembers { members: snapshot } => {
                    assert_eq!(snapshot, members[..position].to_vec());
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn disconnect_through_handle_notifies_room() {
        let handle = spawn_actor();
        let room = RoomId::from("r1");
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = handle.connect(tx_a).await.unwrap();
        let b = handle.connect(tx_b).await.unwrap();

        handle
            .dispatch(&b, SignalMessage::JoinRoom { room: room.clone() })
            .await
            .unwrap();
        handle
            .dispatch(&a, SignalMessage::JoinRoom { room: room.clone() })
            .await
            .unwrap();
        assert!(matches!(next(&mut rx_b).await, SignalMessage::ExistingMembers { .. }));
        assert_eq!(next(&mut rx_b).await, SignalMessage::MemberJoined { id: a.clone() });

        handle.disconnect(&a).await;

        assert_eq!(next(&mut rx_b).await, SignalMessage::MemberLeft { id: a });
        assert_eq!(handle.members(&room).await.unwrap(), vec![b]);
    }
}
