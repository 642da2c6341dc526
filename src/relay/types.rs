use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::protocol::PeerId;

/// Relay coordinator errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// A frame that breaks the connection protocol (second join, signaling
    /// before join). Always dropped; never tears anything down.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes,
/// so broadcasting to a room clones cheaply.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// One room member as the registry sees it: identity plus the channel used
/// to reach its connection task.
#[derive(Debug)]
pub(crate) struct Member {
    pub id: PeerId,
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
}

/// Members are kept in join order; `existingPeers` and iteration order on
/// broadcast both depend on it. Rooms are small, linear lookup is fine.
#[derive(Debug, Default)]
pub(crate) struct Room {
    pub members: Vec<Member>,
}

impl Room {
    pub fn find(&self, id: &PeerId) -> Option<&Member> {
        self.members.iter().find(|m| &m.id == id)
    }

    pub fn remove(&mut self, id: &PeerId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| &m.id != id);
        self.members.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> Member {
        let (tx, _rx) = mpsc::unbounded_channel();
        Member {
            id: PeerId::from(id),
            tx,
        }
    }

    #[test]
    fn room_preserves_join_order() {
        let mut room = Room::default();
        room.members.push(member("peer_aaaa0000"));
        room.members.push(member("peer_bbbb1111"));
        room.members.push(member("peer_cccc2222"));

        let order: Vec<&str> = room.members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, ["peer_aaaa0000", "peer_bbbb1111", "peer_cccc2222"]);
    }

    #[test]
    fn room_remove_reports_presence() {
        let mut room = Room::default();
        room.members.push(member("peer_aaaa0000"));

        assert!(room.remove(&PeerId::from("peer_aaaa0000")));
        assert!(!room.remove(&PeerId::from("peer_aaaa0000")));
        assert!(room.members.is_empty());
    }

    #[test]
    fn room_find_matches_on_identity() {
        let mut room = Room::default();
        room.members.push(member("peer_aaaa0000"));

        assert!(room.find(&PeerId::from("peer_aaaa0000")).is_some());
        assert!(room.find(&PeerId::from("peer_bbbb1111")).is_none());
    }
}
