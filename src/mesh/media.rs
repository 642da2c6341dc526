use async_trait::async_trait;

use super::error::MeshError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to one local capture track. The negotiator only attaches these to
/// peer connections; capture itself lives behind [`MediaSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Opaque handle to a remote participant's media, delivered by the
/// transport once negotiation succeeds. The UI binds it to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
}

/// Local capture device seam. Acquisition failure is fatal to a join
/// attempt and is never retried.
#[async_trait]
pub trait MediaSource: Send {
    /// Acquire the local tracks (camera and microphone). Fails with
    /// [`MeshError::MediaAccessDenied`] when capture is unavailable.
    async fn acquire(&mut self) -> Result<Vec<MediaTrack>, MeshError>;

    /// Stop all local tracks. Called exactly once, on leave.
    fn stop(&mut self);
}
