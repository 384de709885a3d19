//! Core functionality for video and track playback
//!
//! This crate provides the timeline model, object tracks and the playback
//! controller that keeps a video source and its tracks in step.

pub mod archive;
pub mod error;
pub mod playback;
pub mod timestamp;
pub mod tracks;
pub mod video;

// Re-export commonly used types
pub use archive::{ArchiveRequest, ArchiveResolver};
pub use error::CoreError;
pub use playback::{
    Clock, ManualClock, PlaybackConfig, PlaybackController, PlaybackState, PresentationSink,
    SystemClock,
};
pub use timestamp::TimeStamp;
pub use tracks::{
    GeoCoordinate, Point2, Shell, StoreId, Track, TrackId, TrackSample, TrackStore, VisibleTrack,
};
pub use video::{VideoFrame, VideoSource};
