//! Mock transport and media source for exercising the negotiator without a
//! real peer-to-peer stack.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::MeshError;
use super::media::{MediaSource, MediaTrack, TrackKind};
use super::session::SessionEvent;
use super::transport::{PeerConnection, PeerTransport};
use crate::protocol::{CandidateInit, PeerId, SdpKind, SessionDescription};

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Open(PeerId),
    AttachTracks(usize),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    RestartIce,
    Close,
}

/// Shared, ordered record of every transport call across all connections.
#[derive(Debug, Clone, Default)]
pub(crate) struct OpLog(Arc<Mutex<Vec<(PeerId, Op)>>>);

impl OpLog {
    pub fn push(&self, peer: PeerId, op: Op) {
        if let Ok(mut ops) = self.0.lock() {
            ops.push((peer, op));
        }
    }

    /// All ops, in call order, peer attribution stripped.
    pub fn ops(&self) -> Vec<Op> {
        self.0
            .lock()
            .map(|ops| ops.iter().map(|(_, op)| op.clone()).collect())
            .unwrap_or_default()
    }

    /// Ops for one peer, in call order.
    pub fn ops_for(&self, peer: PeerId) -> Vec<Op> {
        self.0
            .lock()
            .map(|ops| {
                ops.iter()
                    .filter(|(p, _)| *p == peer)
                    .map(|(_, op)| op.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub(crate) struct MockConnection {
    peer: PeerId,
    log: OpLog,
}

impl MockConnection {
    pub fn new(peer: PeerId, log: OpLog) -> Self {
        Self { peer, log }
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn create_offer(&mut self) -> Result<SessionDescription, MeshError> {
        self.log.push(self.peer, Op::CreateOffer);
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("offer-for-{}", self.peer),
        })
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, MeshError> {
        self.log.push(self.peer, Op::CreateAnswer);
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: format!("answer-for-{}", self.peer),
        })
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), MeshError> {
        self.log.push(self.peer, Op::SetLocal(desc.kind));
        Ok(())
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), MeshError> {
        self.log.push(self.peer, Op::SetRemote(desc.kind));
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: CandidateInit) -> Result<(), MeshError> {
        self.log.push(self.peer, Op::AddCandidate(candidate.candidate));
        Ok(())
    }

    fn attach_tracks(&mut self, tracks: &[MediaTrack]) -> Result<(), MeshError> {
        self.log.push(self.peer, Op::AttachTracks(tracks.len()));
        Ok(())
    }

    async fn restart_ice(&mut self) -> Result<(), MeshError> {
        self.log.push(self.peer, Op::RestartIce);
        Ok(())
    }

    fn close(&mut self) {
        self.log.push(self.peer, Op::Close);
    }
}

#[derive(Default)]
pub(crate) struct MockTransport {
    pub log: OpLog,
    pub fail_open: bool,
}

impl PeerTransport for MockTransport {
    type Connection = MockConnection;

    fn open(
        &mut self,
        peer: PeerId,
        _events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self::Connection, MeshError> {
        if self.fail_open {
            return Err(MeshError::Transport {
                peer,
                reason: "open refused".into(),
            });
        }
        self.log.push(peer, Op::Open(peer));
        Ok(MockConnection::new(peer, self.log.clone()))
    }
}

pub(crate) struct MockMedia {
    pub deny: bool,
    pub stopped: Arc<AtomicBool>,
}

impl MockMedia {
    pub fn granted() -> Self {
        Self {
            deny: false,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn denied() -> Self {
        Self {
            deny: true,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl MediaSource for MockMedia {
    async fn acquire(&mut self) -> Result<Vec<MediaTrack>, MeshError> {
        if self.deny {
            return Err(MeshError::MediaAccessDenied("permission denied".into()));
        }
        Ok(vec![
            MediaTrack {
                id: "mic".into(),
                kind: TrackKind::Audio,
            },
            MediaTrack {
                id: "cam".into(),
                kind: TrackKind::Video,
            },
        ])
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
