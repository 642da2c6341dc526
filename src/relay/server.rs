use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::{RegistryCommand, RegistryHandle, registry_actor};
use super::types::{OutboundMessage, RelayError};
use crate::protocol::{ClientFrame, PeerId};

pub const DEFAULT_RELAY_PORT: u16 = 3001;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// The relay coordinator: accepts one WebSocket per participant, owns the
/// room registry through its actor, and store-and-forwards addressed
/// negotiation frames. It never carries media.
pub struct RelayServer {
    handle: RegistryHandle,
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayServer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<RegistryCommand>(1024);
        tokio::spawn(registry_actor(rx));

        Self {
            handle: RegistryHandle { tx },
        }
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Relay server listening on {}", addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            let handle = self.handle.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RegistryHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    info!("WebSocket connection from {}", addr);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let mut peer_id: Option<PeerId> = None;
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        if let Err(e) = handle_frame(&text, &tx, &handle, &mut peer_id).await {
                            warn!("Dropping frame from {}: {}", addr, e);
                        }
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(pid) = peer_id {
        handle.leave(pid).await;
    }

    send_task.abort();
    info!("WebSocket disconnected: {}", addr);

    Ok(())
}

/// Dispatch one inbound text frame. Violations never touch registry state
/// and never close the connection; the caller just logs them.
async fn handle_frame(
    text: &str,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    handle: &RegistryHandle,
    peer_id: &mut Option<PeerId>,
) -> Result<(), RelayError> {
    // No error frame exists on the wire: unparseable input is dropped.
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!("Unparseable frame: {}", e);
            return Ok(());
        }
    };

    match frame {
        ClientFrame::Join { room_id } => {
            if peer_id.is_some() {
                return Err(RelayError::ProtocolViolation(
                    "second join on one connection",
                ));
            }

            // The registry queues room-joined on this connection's channel
            // itself, guaranteeing it precedes any routed frame.
            let assigned = handle.join(room_id, tx.clone()).await?;
            *peer_id = Some(assigned);
        }

        relayed @ (ClientFrame::Offer { .. }
        | ClientFrame::Answer { .. }
        | ClientFrame::IceCandidate { .. }) => {
            let Some(from) = *peer_id else {
                return Err(RelayError::ProtocolViolation("signaling before join"));
            };
            handle.forward(from, relayed).await;
        }
    }

    Ok(())
}
