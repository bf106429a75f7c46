use std::collections::HashMap;

use super::types::{PeerId, RoomId};

/// Room membership bookkeeping. No I/O.
///
/// A room exists exactly while its member list is non-empty. Members are
/// kept in join order so snapshots come out oldest first.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Vec<PeerId>>,
    memberships: HashMap<PeerId, RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `peer` to `room` and return the members that were present
    /// before it, in join order.
    ///
    /// Joining the room the peer is already in returns the other members
    /// and changes nothing. Joining a different room moves the peer; the
    /// caller is expected to have announced the departure already.
    pub fn join(&mut self, room: &RoomId, peer: &PeerId) -> Vec<PeerId> {
        match self.memberships.get(peer) {
            Some(current) if current == room => {
                return self.others(room, peer);
            }
            Some(_) => {
                self.leave(peer);
            }
            None => {}
        }

        let members = self.rooms.entry(room.clone()).or_default();
        let snapshot = members.clone();
        members.push(peer.clone());
        self.memberships.insert(peer.clone(), room.clone());

        snapshot
    }

    /// Remove `peer` from its room, returning that room.
    pub fn leave(&mut self, peer: &PeerId) -> Option<RoomId> {
        let room = self.memberships.remove(peer)?;

        if let Some(members) = self.rooms.get_mut(&room) {
            members.retain(|member| member != peer);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }

        Some(room)
    }

    /// Every room `peer` belongs to. At most one today.
    pub fn rooms_of(&self, peer: &PeerId) -> Vec<RoomId> {
        self.memberships.get(peer).cloned().into_iter().collect()
    }

    pub fn room_of(&self, peer: &PeerId) -> Option<&RoomId> {
        self.memberships.get(peer)
    }

    /// Current members of `room` in join order; empty if the room does not exist.
    pub fn members(&self, room: &RoomId) -> &[PeerId] {
        self.rooms.get(room).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn others(&self, room: &RoomId, peer: &PeerId) -> Vec<PeerId> {
        self.members(room)
            .iter()
            .filter(|member| *member != peer)
            .cloned()
            .collect()
    }
}
