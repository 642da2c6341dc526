use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::types::{Member, OutboundMessage, RelayError, Room};
use crate::protocol::{ClientFrame, PeerId, RoomId, ServerFrame};

/// Commands sent to the room registry actor
pub(crate) enum RegistryCommand {
    Join {
        room_id: RoomId,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
        reply: oneshot::Sender<PeerId>,
    },
    Forward {
        from: PeerId,
        frame: ClientFrame,
    },
    Leave {
        peer_id: PeerId,
    },
}

/// Single owner of the room/peer registry. Every mutation and every relay
/// lookup is serialized through this task, so concurrent joins and leaves
/// can never race on a room's member set.
pub(crate) async fn registry_actor(mut rx: mpsc::Receiver<RegistryCommand>) {
    let mut rooms: HashMap<RoomId, Room> = HashMap::new();
    let mut peer_rooms: HashMap<PeerId, RoomId> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Join {
                room_id,
                peer_tx,
                reply,
            } => {
                let room = rooms.entry(room_id).or_insert_with(|| {
                    info!("Room created: {}", room_id);
                    Room::default()
                });

                let peer_id = assign_peer_id(&peer_rooms);
                let existing_peers: Vec<PeerId> = room.members.iter().map(|m| m.id).collect();

                // The room-joined frame goes onto the joiner's channel
                // right here, before this command completes, so nothing
                // the actor routes later can precede it.
                if let Some(msg) = encode(&ServerFrame::RoomJoined {
                    peer_id,
                    room_id,
                    existing_peers,
                }) {
                    let _ = peer_tx.send(msg);
                }

                if let Some(msg) = encode(&ServerFrame::PeerJoined { peer_id }) {
                    for member in &room.members {
                        let _ = member.tx.send(msg.clone());
                    }
                }

                room.members.push(Member {
                    id: peer_id,
                    tx: peer_tx,
                });
                peer_rooms.insert(peer_id, room_id);
                let _ = reply.send(peer_id);

                info!(
                    "Peer {} joined room {} ({} members)",
                    peer_id,
                    room_id,
                    rooms.get(&room_id).map_or(0, |r| r.members.len())
                );
            }

            RegistryCommand::Forward { from, frame } => {
                forward(&rooms, &peer_rooms, from, frame);
            }

            RegistryCommand::Leave { peer_id } => {
                let Some(room_id) = peer_rooms.remove(&peer_id) else {
                    continue;
                };
                let Some(room) = rooms.get_mut(&room_id) else {
                    continue;
                };

                if room.remove(&peer_id) {
                    if let Some(msg) = encode(&ServerFrame::PeerLeft { peer_id }) {
                        for member in &room.members {
                            let _ = member.tx.send(msg.clone());
                        }
                    }
                    info!(
                        "Peer {} left room {} ({} left)",
                        peer_id,
                        room_id,
                        room.members.len()
                    );
                }

                if room.members.is_empty() {
                    rooms.remove(&room_id);
                    info!("Room {} removed (empty)", room_id);
                }
            }
        }
    }
}

/// Store-and-forward of an addressed negotiation frame, with the sender's
/// identity attached. Any lookup miss is a normal departure race and drops
/// the frame silently.
fn forward(
    rooms: &HashMap<RoomId, Room>,
    peer_rooms: &HashMap<PeerId, RoomId>,
    from: PeerId,
    frame: ClientFrame,
) {
    let (to, out) = match frame {
        ClientFrame::Offer { to, sdp } => (to, ServerFrame::Offer { from, sdp }),
        ClientFrame::Answer { to, sdp } => (to, ServerFrame::Answer { from, sdp }),
        ClientFrame::IceCandidate { to, candidate } => {
            (to, ServerFrame::IceCandidate { from, candidate })
        }
        ClientFrame::Join { .. } => return,
    };

    let Some(room_id) = peer_rooms.get(&from) else {
        debug!("Dropping frame from {}: not in a room", from);
        return;
    };
    let Some(target) = rooms.get(room_id).and_then(|room| room.find(&to)) else {
        debug!("Dropping frame from {} to {}: target gone", from, to);
        return;
    };

    if let Some(msg) = encode(&out) {
        let _ = target.tx.send(msg);
    }
}

/// Re-draws until the identifier is unused anywhere in the live registry,
/// so an id is never reused (or shared) while its room exists.
fn assign_peer_id(peer_rooms: &HashMap<PeerId, RoomId>) -> PeerId {
    loop {
        let id = PeerId::generate();
        if !peer_rooms.contains_key(&id) {
            return id;
        }
    }
}

fn encode(frame: &ServerFrame) -> Option<OutboundMessage> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(OutboundMessage::from(json)),
        Err(e) => {
            debug!("Failed to encode server frame: {}", e);
            None
        }
    }
}

/// Handle to communicate with the room registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    pub(crate) tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Join a room, creating it if absent. The actor queues the room-joined
    /// reply frame on `peer_tx` itself, as the first frame on that channel;
    /// the returned value is the assigned peer id.
    pub async fn join(
        &self,
        room_id: RoomId,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<PeerId, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RegistryCommand::Join {
                room_id,
                peer_tx,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| RelayError::Internal("registry actor closed".to_string()))
    }

    /// Forward an addressed negotiation frame. Fire-and-forget.
    pub async fn forward(&self, from: PeerId, frame: ClientFrame) {
        let _ = self.tx.send(RegistryCommand::Forward { from, frame }).await;
    }

    /// Remove a peer from its room (disconnect or shutdown path).
    pub async fn leave(&self, peer_id: PeerId) {
        let _ = self.tx.send(RegistryCommand::Leave { peer_id }).await;
    }
}
