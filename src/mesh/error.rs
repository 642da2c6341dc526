use thiserror::Error;

use crate::protocol::PeerId;

/// Mesh negotiator errors
///
/// Only the first two ever escape to the caller: media failure is fatal to
/// the join attempt, channel loss demands an explicit rejoin. Transport
/// faults stay peer-local inside the session loop.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("media access denied: {0}")]
    MediaAccessDenied(String),

    #[error("relay channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("transport failure with {peer}: {reason}")]
    Transport { peer: PeerId, reason: String },
}
