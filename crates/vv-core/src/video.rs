//! Video source abstraction

use serde::{Deserialize, Serialize};

use crate::timestamp::TimeStamp;

/// A decoded (or addressable) video frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    pub timestamp: TimeStamp,
    /// Location of the frame image
    pub image: String,
}

/// Trait for sources of video frames
///
/// Sources are opened by stream id and answer nearest-frame lookups.
pub trait VideoSource: Send + Sync {
    /// Open the named stream, replacing whatever was open before
    fn open(&mut self, stream_id: &str) -> anyhow::Result<()>;

    /// Timestamp of the first frame; invalid when nothing is open
    fn min_time(&self) -> TimeStamp;

    /// Timestamp of the last frame; invalid when nothing is open
    fn max_time(&self) -> TimeStamp;

    /// The frame nearest to `timestamp`
    fn frame_at(&self, timestamp: &TimeStamp) -> anyhow::Result<VideoFrame>;

    fn frame_count(&self) -> usize;

    /// Get the source name/path
    fn source_name(&self) -> &str;
}
