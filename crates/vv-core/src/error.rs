//! Errors raised by the playback core

use thiserror::Error;

use crate::timestamp::TimeStamp;
use crate::tracks::TrackId;

/// Errors that can occur in track and playback operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Track {0} already exists")]
    DuplicateId(TrackId),

    #[error("Track {0} not found")]
    NotFound(TrackId),

    #[error("Sample at {timestamp} on track {track} does not follow the last sample at {last}")]
    OutOfOrder {
        track: TrackId,
        timestamp: TimeStamp,
        last: TimeStamp,
    },

    #[error("Invalid timestamp for a sample on track {0}")]
    InvalidTimeStamp(TrackId),

    #[error("Track {0} is not bound to a track store")]
    UnboundTrack(TrackId),

    #[error("Video source '{stream}' unavailable: {reason}")]
    SourceUnavailable { stream: String, reason: String },

    #[error("No frame available at {timestamp}: {reason}")]
    FrameUnavailable { timestamp: TimeStamp, reason: String },

    #[error("Playback controller has not been initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, CoreError>;
