use std::collections::{HashMap, VecDeque, hash_map::Entry};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::channel::RelayLink;
use super::error::MeshError;
use super::link::{LinkDisposition, PeerLink, Role};
use super::media::{MediaSource, MediaTrack, RemoteStream};
use super::transport::{ConnectivityState, PeerConnection, PeerTransport};
use crate::protocol::{CandidateInit, ClientFrame, PeerId, RoomId, ServerFrame, SessionDescription};

/// Candidates for a peer we have not built a link for yet are held back,
/// but never without bound.
const EARLY_CANDIDATE_CAP: usize = 32;

/// Everything the session loop reacts to: inbound relay frames, channel
/// loss, transport callbacks, and the local leave command. One queue, one
/// consumer; each handler runs to completion before the next event.
#[derive(Debug)]
pub enum SessionEvent {
    /// A frame from the relay coordinator.
    Frame(ServerFrame),
    /// The relay channel closed or errored.
    ChannelClosed,
    /// The transport reported a connectivity change for one peer.
    Connectivity {
        peer: PeerId,
        state: ConnectivityState,
    },
    /// The transport delivered the remote media for one peer.
    RemoteStream { peer: PeerId, stream: RemoteStream },
    /// The transport gathered a local candidate to relay to one peer.
    LocalCandidate {
        peer: PeerId,
        candidate: CandidateInit,
    },
    /// Local participant is leaving the room. The single cancellation point.
    Leave,
}

/// Coarse caller-facing state of the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Joining,
    FirstHere,
    Connecting(usize),
    InCall,
    Disconnected,
    Left,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Joining => write!(f, "Joining room..."),
            Self::FirstHere => write!(f, "You are the first one here"),
            Self::Connecting(n) => write!(f, "Connecting to {} participant(s)...", n),
            Self::InCall => write!(f, "Call connected"),
            Self::Disconnected => write!(f, "Disconnected from server"),
            Self::Left => write!(f, "Left the room"),
        }
    }
}

/// Snapshot published to the UI after every change: session status plus
/// the ordered, duplicate-free list of remote participants. Never contains
/// the local identifier.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub status: SessionStatus,
    pub local_id: Option<PeerId>,
    pub participants: Vec<PeerId>,
}

/// Cheap handle for requesting leave from outside the running loop.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn leave(&self) {
        let _ = self.events.send(SessionEvent::Leave);
    }
}

/// Per-participant mesh negotiator: owns one [`PeerLink`] per remote peer,
/// the local media tracks, and the membership projection, and decides when
/// to originate versus answer negotiation.
///
/// Single-threaded by construction: everything flows through the
/// [`SessionEvent`] queue, so state transitions for one peer never race.
pub struct MeshSession<T: PeerTransport, M: MediaSource> {
    room: RoomId,
    transport: T,
    media: M,
    tracks: Vec<MediaTrack>,
    local_id: Option<PeerId>,
    links: HashMap<PeerId, PeerLink<T::Connection>>,
    roster: Vec<PeerId>,
    early: HashMap<PeerId, VecDeque<CandidateInit>>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    status: SessionStatus,
    view_tx: watch::Sender<RoomView>,
}

impl<T: PeerTransport, M: MediaSource> MeshSession<T, M> {
    /// Acquire local media and ask the relay to join `room`. Media failure
    /// is fatal: the error is surfaced and nothing is retried.
    pub async fn join(
        room: RoomId,
        transport: T,
        mut media: M,
        relay: RelayLink,
    ) -> Result<(Self, SessionHandle, watch::Receiver<RoomView>), MeshError> {
        let RelayLink {
            frames,
            events_tx,
            events_rx,
        } = relay;

        let tracks = media.acquire().await?;
        info!("Local media acquired ({} tracks)", tracks.len());

        frames
            .send(ClientFrame::Join { room_id: room })
            .map_err(|_| MeshError::ChannelUnavailable("relay channel closed".into()))?;

        let (view_tx, view_rx) = watch::channel(RoomView {
            status: SessionStatus::Joining,
            local_id: None,
            participants: Vec::new(),
        });
        let handle = SessionHandle {
            events: events_tx.clone(),
        };

        Ok((
            Self {
                room,
                transport,
                media,
                tracks,
                local_id: None,
                links: HashMap::new(),
                roster: Vec::new(),
                early: HashMap::new(),
                outbound: frames,
                events_tx,
                events_rx,
                status: SessionStatus::Joining,
                view_tx,
            },
            handle,
            view_rx,
        ))
    }

    /// Drive the session until leave. Peer-local faults never end the
    /// loop; only [`SessionEvent::Leave`] does.
    pub async fn run(&mut self) -> Result<(), MeshError> {
        while let Some(event) = self.events_rx.recv().await {
            if self.dispatch(event).await {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Handle one event to completion. Returns true once the session has
    /// left the room.
    async fn dispatch(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Frame(frame) => self.handle_frame(frame).await,
            SessionEvent::ChannelClosed => {
                warn!("Relay channel lost; rejoin required");
                self.set_status(SessionStatus::Disconnected);
            }
            SessionEvent::Connectivity { peer, state } => {
                self.handle_connectivity(peer, state).await;
            }
            SessionEvent::RemoteStream { peer, stream } => {
                self.handle_remote_stream(peer, stream);
            }
            SessionEvent::LocalCandidate { peer, candidate } => {
                self.send_frame(ClientFrame::IceCandidate {
                    to: peer,
                    candidate,
                });
            }
            SessionEvent::Leave => {
                self.leave();
                return true;
            }
        }
        false
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id
    }

    pub fn participants(&self) -> &[PeerId] {
        &self.roster
    }

    pub fn remote_streams(&self) -> Vec<(PeerId, RemoteStream)> {
        self.roster
            .iter()
            .filter_map(|peer| {
                self.links
                    .get(peer)
                    .and_then(|link| link.remote_stream())
                    .map(|stream| (*peer, stream.clone()))
            })
            .collect()
    }

    async fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::RoomJoined {
                peer_id,
                room_id,
                existing_peers,
            } => {
                info!(
                    "Joined room {} as {} ({} already present)",
                    room_id,
                    peer_id,
                    existing_peers.len()
                );
                self.local_id = Some(peer_id);
                // Members present before us come first, in join order;
                // anyone learned while the reply was in flight (their
                // offer outran it) is kept, after them.
                let learned = std::mem::take(&mut self.roster);
                for peer in &existing_peers {
                    self.add_participant(*peer);
                }
                for peer in learned {
                    self.add_participant(peer);
                }

                self.set_status(if self.roster.is_empty() {
                    SessionStatus::FirstHere
                } else {
                    SessionStatus::Connecting(self.roster.len())
                });

                // We are the newcomer: initiator toward everyone already
                // here. They will answer; nobody else ever offers to us
                // first, so glare cannot occur. A peer already mid-
                // negotiation keeps its link untouched.
                for peer in existing_peers {
                    if self.links.contains_key(&peer) {
                        continue;
                    }
                    if let Err(e) = self.initiate(peer).await {
                        warn!("Failed to start negotiation with {}: {}", peer, e);
                        self.teardown_link(peer);
                    }
                }
                self.publish();
            }

            ServerFrame::PeerJoined { peer_id } => {
                if self.local_id == Some(peer_id) {
                    return;
                }
                debug!("Peer {} joined; waiting for their offer", peer_id);
                // The newcomer initiates; we only note the membership.
                self.add_participant(peer_id);
                self.publish();
            }

            ServerFrame::PeerLeft { peer_id } => {
                info!("Peer {} left the room", peer_id);
                self.teardown_link(peer_id);
                self.publish();
            }

            ServerFrame::Offer { from, sdp } => {
                if let Err(e) = self.respond(from, sdp).await {
                    warn!("Failed to answer offer from {}: {}", from, e);
                    self.teardown_link(from);
                } else {
                    self.add_participant(from);
                    self.set_status(SessionStatus::InCall);
                }
                self.publish();
            }

            ServerFrame::Answer { from, sdp } => {
                let Some(link) = self.links.get_mut(&from) else {
                    debug!("Answer from unknown peer {} dropped", from);
                    return;
                };
                if let Err(e) = link.accept_answer(sdp).await {
                    warn!("Failed to apply answer from {}: {}", from, e);
                    self.teardown_link(from);
                } else {
                    self.set_status(SessionStatus::InCall);
                }
                self.publish();
            }

            ServerFrame::IceCandidate { from, candidate } => {
                if let Some(link) = self.links.get_mut(&from) {
                    if let Err(e) = link.add_remote_candidate(candidate).await {
                        // Candidate faults are peer-local and non-fatal.
                        warn!("Candidate from {} rejected: {}", from, e);
                    }
                } else {
                    self.stash_early(from, candidate);
                }
            }
        }
    }

    async fn handle_connectivity(&mut self, peer: PeerId, state: ConnectivityState) {
        let Some(link) = self.links.get_mut(&peer) else {
            return;
        };
        debug!("Connectivity for {}: {:?}", peer, state);
        match link.on_connectivity(state).await {
            LinkDisposition::Keep => {}
            LinkDisposition::Teardown => {
                info!("Connection to {} is terminal; dropping it", peer);
                self.teardown_link(peer);
                self.publish();
            }
        }
    }

    fn handle_remote_stream(&mut self, peer: PeerId, stream: RemoteStream) {
        let Some(link) = self.links.get_mut(&peer) else {
            debug!("Stream for unknown peer {} dropped", peer);
            return;
        };
        info!("Remote stream arrived from {}", peer);
        link.remote_stream_arrived(stream);
        self.set_status(SessionStatus::InCall);
        self.publish();
    }

    /// Originate an offer toward a peer that was present before us.
    async fn initiate(&mut self, peer: PeerId) -> Result<(), MeshError> {
        let (link, _) = self.ensure_link(peer, Role::Initiator)?;
        let offer = link.start_offer().await?;
        self.send_frame(ClientFrame::Offer {
            to: peer,
            sdp: offer,
        });
        Ok(())
    }

    /// Answer an inbound offer.
    async fn respond(&mut self, from: PeerId, sdp: SessionDescription) -> Result<(), MeshError> {
        let (link, created) = self.ensure_link(from, Role::Responder)?;
        if !created {
            debug!("Offer from {} with existing link; reusing it", from);
        }
        let answer = link.accept_offer(sdp).await?;
        self.send_frame(ClientFrame::Answer {
            to: from,
            sdp: answer,
        });
        Ok(())
    }

    /// Get or create the link for a peer. Never constructs a second
    /// connection for a peer that already has one: the existing state is
    /// reused and the requested role ignored.
    fn ensure_link(
        &mut self,
        peer: PeerId,
        role: Role,
    ) -> Result<(&mut PeerLink<T::Connection>, bool), MeshError> {
        let Self {
            links,
            transport,
            tracks,
            early,
            events_tx,
            ..
        } = self;

        match links.entry(peer) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), false)),
            Entry::Vacant(entry) => {
                let mut conn = transport.open(peer, events_tx.clone())?;
                // Tracks go on before any description is created so the
                // offer/answer advertises them.
                conn.attach_tracks(tracks)?;
                let mut link = PeerLink::new(peer, role, conn);
                if let Some(stash) = early.remove(&peer) {
                    debug!("Draining {} early candidate(s) for {}", stash.len(), peer);
                    link.seed_candidates(stash);
                }
                let link = entry.insert(link);
                debug!("Opened {:?} link to {}", link.role(), peer);
                Ok((link, true))
            }
        }
    }

    /// Hold a candidate that outran its peer's offer. Drained into the
    /// link when it is created.
    fn stash_early(&mut self, peer: PeerId, candidate: CandidateInit) {
        let stash = self.early.entry(peer).or_default();
        if stash.len() >= EARLY_CANDIDATE_CAP {
            debug!("Early-candidate stash for {} full, dropping", peer);
            return;
        }
        stash.push_back(candidate);
    }

    fn add_participant(&mut self, peer: PeerId) {
        if Some(peer) != self.local_id && !self.roster.contains(&peer) {
            self.roster.push(peer);
        }
    }

    /// Remove every trace of a peer: link, buffered candidates, roster
    /// entry, cached stream. Peer-local; nothing else is touched.
    fn teardown_link(&mut self, peer: PeerId) {
        if let Some(mut link) = self.links.remove(&peer) {
            link.close();
        }
        self.early.remove(&peer);
        self.roster.retain(|p| p != &peer);
    }

    /// The single cancellation point: close every peer transport, stop the
    /// local tracks, close the relay channel. Events queued behind the
    /// leave are never acted on.
    fn leave(&mut self) {
        info!("Leaving room {}", self.room);
        for link in self.links.values_mut() {
            link.close();
        }
        self.links.clear();
        self.early.clear();
        self.roster.clear();
        self.media.stop();

        // Dropping the outbound sender ends the writer task, which closes
        // the socket to the coordinator.
        let (dead, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.outbound, dead));

        self.set_status(SessionStatus::Left);
    }

    fn send_frame(&self, frame: ClientFrame) {
        // Relay gone is a status, not an error; frames just stop flowing.
        let _ = self.outbound.send(frame);
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.publish();
    }

    fn publish(&self) {
        self.view_tx.send_replace(RoomView {
            status: self.status,
            local_id: self.local_id,
            participants: self.roster.clone(),
        });
    }
}
