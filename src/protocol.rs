//! Shared wire contract between the relay coordinator and mesh negotiators.
//!
//! One WebSocket connection carries one participant. Every frame is a JSON
//! object tagged by `type`; anything that does not parse into these shapes
//! is dropped silently on both sides (no error frame exists on the wire).

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const ROOM_ID_LEN: usize = 16;
const PEER_ID_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Room identifier: opaque, case-insensitive, caller-supplied.
///
/// Normalized to ASCII uppercase on construction so that lookups never
/// depend on the caller's casing. Stored inline, truncated to 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId {
    bytes: [u8; ROOM_ID_LEN],
    len: u8,
}

impl RoomId {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        let mut bytes = [0u8; ROOM_ID_LEN];
        let src = s.as_bytes();
        let len = src.len().min(ROOM_ID_LEN);
        bytes[..len].copy_from_slice(&src[..len]);
        bytes[..len].make_ascii_uppercase();
        Self {
            bytes,
            len: len as u8,
        }
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <&str>::deserialize(deserializer)?;
        Ok(RoomId::from(s))
    }
}

/// Peer ID: server-assigned, 13-byte fixed array ("peer_" + 8 hex)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId {
    bytes: [u8; PEER_ID_LEN],
    len: u8,
}

impl PeerId {
    /// Draw a fresh identifier. Uniqueness within the live registry is the
    /// room registry's job; it re-draws on the rare collision.
    pub fn generate() -> Self {
        let mut bytes = [0u8; PEER_ID_LEN];
        bytes[..5].copy_from_slice(b"peer_");

        let mut rng = rand::rng();
        let value: u32 = rng.random();

        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self {
            bytes,
            len: PEER_ID_LEN as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        let mut bytes = [0u8; PEER_ID_LEN];
        let src = s.as_bytes();
        let len = src.len().min(PEER_ID_LEN);
        bytes[..len].copy_from_slice(&src[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <&str>::deserialize(deserializer)?;
        Ok(PeerId::from(s))
    }
}

/// Session description half of a negotiation exchange. The relay never
/// inspects the SDP body; only the negotiator and its transport do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A proposed network path for the direct media connection, in the shape
/// the transport emits and consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u32>,
}

/// Frames a participant sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Must be the first frame on a connection; at most one per connection.
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },

    #[serde(rename = "offer")]
    Offer { to: PeerId, sdp: SessionDescription },

    #[serde(rename = "answer")]
    Answer { to: PeerId, sdp: SessionDescription },

    #[serde(rename = "ice-candidate")]
    IceCandidate { to: PeerId, candidate: CandidateInit },
}

/// Frames the relay sends to a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Reply to `join`: the assigned identity plus the members already
    /// present, in join order, excluding the joiner itself.
    #[serde(rename = "room-joined")]
    RoomJoined {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "existingPeers")]
        existing_peers: Vec<PeerId>,
    },

    /// Broadcast to prior members when someone joins.
    #[serde(rename = "peer-joined")]
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    /// Broadcast to remaining members when someone leaves.
    #[serde(rename = "peer-left")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "offer")]
    Offer { from: PeerId, sdp: SessionDescription },

    #[serde(rename = "answer")]
    Answer { from: PeerId, sdp: SessionDescription },

    #[serde(rename = "ice-candidate")]
    IceCandidate {
        from: PeerId,
        candidate: CandidateInit,
    },
}
