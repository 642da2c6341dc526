use std::collections::VecDeque;

use tracing::debug;

use super::error::MeshError;
use super::media::RemoteStream;
use super::transport::{ConnectivityState, PeerConnection};
use crate::protocol::{CandidateInit, PeerId, SessionDescription};

/// Who originates the offer toward a peer. Fixed by join order, never
/// negotiated: the newcomer initiates toward everyone already present, so
/// no pair can ever produce simultaneous offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Negotiation phase. Strictly forward: pending → active → connected →
/// closed; `Closed` is terminal.
///
/// Candidate buffering is a sub-state, not a side table: while the remote
/// description has not been accepted, inbound candidates queue in
/// `Pending`; acceptance promotes to `Active` and flushes the queue in
/// arrival order, exactly once.
#[derive(Debug)]
enum Phase {
    Pending { queued: VecDeque<CandidateInit> },
    Active,
    Connected,
    Closed,
}

/// What the session should do with the link after a connectivity report.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LinkDisposition {
    Keep,
    Teardown,
}

/// Per-remote-peer connection state machine. At most one exists per peer
/// id at any time; the session enforces reuse over duplicate creation.
pub(crate) struct PeerLink<C> {
    peer: PeerId,
    role: Role,
    conn: C,
    phase: Phase,
    restart_attempted: bool,
    stream: Option<RemoteStream>,
}

impl<C: PeerConnection> PeerLink<C> {
    pub fn new(peer: PeerId, role: Role, conn: C) -> Self {
        Self {
            peer,
            role,
            conn,
            phase: Phase::Pending {
                queued: VecDeque::new(),
            },
            restart_attempted: false,
            stream: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.stream.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    /// Pre-load candidates that arrived before this link existed. Only
    /// valid right after creation, while still pending.
    pub fn seed_candidates(&mut self, candidates: impl IntoIterator<Item = CandidateInit>) {
        if let Phase::Pending { queued } = &mut self.phase {
            queued.extend(candidates);
        }
    }

    /// Initiator side: originate the offer and set it locally. The caller
    /// relays the returned description.
    pub async fn start_offer(&mut self) -> Result<SessionDescription, MeshError> {
        let offer = self.conn.create_offer().await?;
        self.conn.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Responder side: accept the remote offer (which unblocks candidate
    /// flow), produce the answer and set it locally. The caller relays the
    /// returned description.
    pub async fn accept_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, MeshError> {
        self.apply_remote(offer).await?;
        let answer = self.conn.create_answer().await?;
        self.conn.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    /// Initiator side: accept the answer to our offer, unblocking
    /// candidate flow.
    pub async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), MeshError> {
        if self.is_closed() {
            return Ok(());
        }
        self.apply_remote(answer).await
    }

    /// Candidates queue until the remote description is accepted; applying
    /// one before that is invalid and is never attempted.
    pub async fn add_remote_candidate(&mut self, candidate: CandidateInit) -> Result<(), MeshError> {
        match &mut self.phase {
            Phase::Pending { queued } => {
                queued.push_back(candidate);
                Ok(())
            }
            Phase::Active | Phase::Connected => self.conn.add_candidate(candidate).await,
            Phase::Closed => {
                debug!("Candidate for closed link {} dropped", self.peer);
                Ok(())
            }
        }
    }

    /// The transport delivered the remote media. Idempotent.
    pub fn remote_stream_arrived(&mut self, stream: RemoteStream) {
        if self.is_closed() {
            return;
        }
        self.stream = Some(stream);
        self.phase = Phase::Connected;
    }

    /// Connectivity policy: one automatic ICE restart on failure, then any
    /// terminal report tears this link down. Peer-local either way.
    pub async fn on_connectivity(&mut self, state: ConnectivityState) -> LinkDisposition {
        match state {
            ConnectivityState::Failed => {
                if self.restart_attempted {
                    return LinkDisposition::Teardown;
                }
                self.restart_attempted = true;
                match self.conn.restart_ice().await {
                    Ok(()) => LinkDisposition::Keep,
                    Err(e) => {
                        debug!("ICE restart for {} failed: {}", self.peer, e);
                        LinkDisposition::Teardown
                    }
                }
            }
            ConnectivityState::Disconnected | ConnectivityState::Closed => LinkDisposition::Teardown,
            ConnectivityState::Checking | ConnectivityState::Connected => LinkDisposition::Keep,
        }
    }

    /// Terminal. Closes the transport, drops buffered candidates and the
    /// cached stream.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.conn.close();
        self.phase = Phase::Closed;
        self.stream = None;
    }

    /// Accept the remote description, then flush anything queued, in
    /// arrival order. Runs to completion inside one session-loop event, so
    /// no candidate can be both queued and applied for the same arrival.
    async fn apply_remote(&mut self, desc: SessionDescription) -> Result<(), MeshError> {
        self.conn.set_remote_description(desc).await?;

        let queued = match &mut self.phase {
            Phase::Pending { queued } => {
                let queued = std::mem::take(queued);
                self.phase = Phase::Active;
                queued
            }
            _ => VecDeque::new(),
        };
        for candidate in queued {
            self.conn.add_candidate(candidate).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::mock::{MockConnection, Op, OpLog};
    use crate::protocol::SdpKind;

    fn candidate(tag: &str) -> CandidateInit {
        CandidateInit {
            candidate: tag.to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    fn offer(sdp: &str) -> SessionDescription {
        SessionDescription {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    fn answer(sdp: &str) -> SessionDescription {
        SessionDescription {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    fn link(role: Role) -> (PeerLink<MockConnection>, OpLog) {
        let log = OpLog::default();
        let peer = PeerId::from("peer_aaaa0000");
        let conn = MockConnection::new(peer, log.clone());
        (PeerLink::new(peer, role, conn), log)
    }

    #[tokio::test]
    async fn candidates_buffer_until_remote_description_accepted() {
        let (mut link, log) = link(Role::Initiator);

        link.add_remote_candidate(candidate("c1")).await.unwrap();
        link.add_remote_candidate(candidate("c2")).await.unwrap();
        assert!(
            !log.ops()
                .iter()
                .any(|op| matches!(op, Op::AddCandidate(_))),
            "no candidate may reach the transport before the remote description"
        );

        link.accept_answer(answer("a")).await.unwrap();

        let applied: Vec<String> = log
            .ops()
            .iter()
            .filter_map(|op| match op {
                Op::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(applied, ["c1", "c2"], "flush preserves arrival order");
    }

    #[tokio::test]
    async fn buffered_candidates_apply_exactly_once() {
        let (mut link, log) = link(Role::Initiator);

        link.add_remote_candidate(candidate("c1")).await.unwrap();
        link.accept_answer(answer("a")).await.unwrap();
        // A late duplicate acceptance must not replay the queue.
        link.accept_answer(answer("a2")).await.unwrap();

        let applied = log
            .ops()
            .iter()
            .filter(|op| matches!(op, Op::AddCandidate(_)))
            .count();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn candidates_after_acceptance_apply_immediately() {
        let (mut link, log) = link(Role::Initiator);

        link.accept_answer(answer("a")).await.unwrap();
        link.add_remote_candidate(candidate("late")).await.unwrap();

        assert!(
            log.ops()
                .iter()
                .any(|op| matches!(op, Op::AddCandidate(c) if c == "late"))
        );
    }

    #[tokio::test]
    async fn responder_answers_after_accepting_offer() {
        let (mut link, log) = link(Role::Responder);

        link.add_remote_candidate(candidate("early")).await.unwrap();
        let reply = link.accept_offer(offer("their-offer")).await.unwrap();
        assert_eq!(reply.kind, SdpKind::Answer);

        // Remote must be set (and queue flushed) before the answer is made.
        let ops = log.ops();
        let remote_at = ops
            .iter()
            .position(|op| matches!(op, Op::SetRemote(SdpKind::Offer)))
            .unwrap();
        let flush_at = ops
            .iter()
            .position(|op| matches!(op, Op::AddCandidate(_)))
            .unwrap();
        let answer_at = ops
            .iter()
            .position(|op| matches!(op, Op::CreateAnswer))
            .unwrap();
        assert!(remote_at < flush_at);
        assert!(flush_at < answer_at);
        assert!(
            ops.iter()
                .any(|op| matches!(op, Op::SetLocal(SdpKind::Answer)))
        );
    }

    #[tokio::test]
    async fn initiator_sets_offer_locally_before_returning_it() {
        let (mut link, log) = link(Role::Initiator);

        let offer = link.start_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(
            log.ops()
                .iter()
                .any(|op| matches!(op, Op::SetLocal(SdpKind::Offer)))
        );
    }

    #[tokio::test]
    async fn remote_stream_marks_connected_and_is_idempotent() {
        let (mut link, _log) = link(Role::Initiator);

        link.remote_stream_arrived(RemoteStream { id: "s1".into() });
        link.remote_stream_arrived(RemoteStream { id: "s1".into() });
        assert_eq!(link.remote_stream().map(|s| s.id.as_str()), Some("s1"));
        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn failure_restarts_ice_exactly_once() {
        let (mut link, log) = link(Role::Initiator);

        let first = link.on_connectivity(ConnectivityState::Failed).await;
        assert_eq!(first, LinkDisposition::Keep);
        let second = link.on_connectivity(ConnectivityState::Failed).await;
        assert_eq!(second, LinkDisposition::Teardown);

        let restarts = log
            .ops()
            .iter()
            .filter(|op| matches!(op, Op::RestartIce))
            .count();
        assert_eq!(restarts, 1);
    }

    #[tokio::test]
    async fn terminal_connectivity_requests_teardown() {
        let (mut link, _log) = link(Role::Initiator);

        assert_eq!(
            link.on_connectivity(ConnectivityState::Disconnected).await,
            LinkDisposition::Teardown
        );
        assert_eq!(
            link.on_connectivity(ConnectivityState::Checking).await,
            LinkDisposition::Keep
        );
    }

    #[tokio::test]
    async fn close_is_terminal_and_drops_everything() {
        let (mut link, log) = link(Role::Responder);

        link.add_remote_candidate(candidate("c1")).await.unwrap();
        link.remote_stream_arrived(RemoteStream { id: "s1".into() });
        link.close();
        link.close();

        assert!(link.is_closed());
        assert!(link.remote_stream().is_none());
        let closes = log.ops().iter().filter(|op| matches!(op, Op::Close)).count();
        assert_eq!(closes, 1);

        // Nothing reaches a closed transport afterwards.
        link.add_remote_candidate(candidate("c2")).await.unwrap();
        link.remote_stream_arrived(RemoteStream { id: "s2".into() });
        assert!(link.remote_stream().is_none());
        assert!(
            !log.ops()
                .iter()
                .any(|op| matches!(op, Op::AddCandidate(_)))
        );
    }
}
