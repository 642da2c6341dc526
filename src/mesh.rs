//! Mesh negotiator: per-peer connection state machines, candidate
//! buffering, and the per-session event loop

mod channel;
mod error;
mod link;
mod media;
#[cfg(test)]
mod mock;
mod session;
mod transport;

pub use channel::{RelayLink, connect};
pub use error::MeshError;
pub use link::Role;
pub use media::{MediaSource, MediaTrack, RemoteStream, TrackKind};
pub use session::{MeshSession, RoomView, SessionEvent, SessionHandle, SessionStatus};
pub use transport::{ConnectivityState, PeerConnection, PeerTransport};
