use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{debug, warn};

use super::error::MeshError;
use super::session::SessionEvent;
use crate::protocol::{ClientFrame, ServerFrame};

/// The session's end of the duplex channel to the relay coordinator:
/// outbound frames go into `frames`, everything inbound arrives as
/// [`SessionEvent`]s. Tests build one directly over plain channels; real
/// callers get one from [`connect`].
pub struct RelayLink {
    pub frames: mpsc::UnboundedSender<ClientFrame>,
    pub events_tx: mpsc::UnboundedSender<SessionEvent>,
    pub events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Open the WebSocket to the relay and pump it from two tasks: a writer
/// draining outbound frames, and a reader parsing inbound text into
/// session events. Both end quietly when their side closes; the reader
/// reports the loss as [`SessionEvent::ChannelClosed`].
pub async fn connect(url: &str) -> Result<RelayLink, MeshError> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| MeshError::ChannelUnavailable(e.to_string()))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    debug!("Relay channel connected: {}", url);

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<ClientFrame>();
    let (events_tx, events_rx) = mpsc::unbounded_channel::<SessionEvent>();

    tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    debug!("Failed to encode client frame: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(Utf8Bytes::from(json))).await.is_err() {
                break;
            }
        }
        // Sender dropped: the session left. Say goodbye if still possible.
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let reader_events = events_tx.clone();
    tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    // No error frame exists; unparseable input is dropped.
                    match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(frame) => {
                            if reader_events.send(SessionEvent::Frame(frame)).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("Unparseable server frame: {}", e),
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Relay channel error: {}", e);
                    break;
                }
            }
        }
        let _ = reader_events.send(SessionEvent::ChannelClosed);
    });

    Ok(RelayLink {
        frames: frames_tx,
        events_tx,
        events_rx,
    })
}
