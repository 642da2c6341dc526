use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::MeshError;
use super::media::MediaTrack;
use super::session::SessionEvent;
use crate::protocol::{CandidateInit, PeerId, SessionDescription};

/// Connectivity as reported by the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Checking,
    Connected,
    Failed,
    Disconnected,
    Closed,
}

/// Factory for per-peer transport connections. One connection is opened per
/// remote peer; its callbacks (gathered candidates, remote streams,
/// connectivity changes) are delivered as [`SessionEvent`]s on the sender
/// handed in here, which serializes them onto the session loop.
pub trait PeerTransport {
    type Connection: PeerConnection;

    fn open(
        &mut self,
        peer: PeerId,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self::Connection, MeshError>;
}

/// The peer-to-peer media transport primitive, as the negotiator needs it.
/// Encryption, codecs and NAT traversal all live behind this seam.
#[async_trait]
pub trait PeerConnection: Send {
    async fn create_offer(&mut self) -> Result<SessionDescription, MeshError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, MeshError>;

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), MeshError>;

    /// Apply the remote description. Candidates must never be added before
    /// this has succeeded once.
    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), MeshError>;

    async fn add_candidate(&mut self, candidate: CandidateInit) -> Result<(), MeshError>;

    /// Attach local capture tracks. Called once, before the offer/answer
    /// for this connection is created.
    fn attach_tracks(&mut self, tracks: &[MediaTrack]) -> Result<(), MeshError>;

    /// Renegotiate connectivity only (ICE restart), keeping the session.
    async fn restart_ice(&mut self) -> Result<(), MeshError>;

    fn close(&mut self);
}
