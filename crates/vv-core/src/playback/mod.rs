//! Timeline playback of video frames and tracks

mod clock;
mod controller;
mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::PlaybackController;
pub use sink::PresentationSink;

use serde::{Deserialize, Serialize};

use crate::timestamp::TimeStamp;

/// Playback lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// No stream has been opened yet
    Uninitialized,
    Stopped,
    Playing,
    /// Opening the stream failed; the controller must be recreated
    Failed,
}

impl PlaybackState {
    pub fn is_ready(&self) -> bool {
        matches!(self, PlaybackState::Stopped | PlaybackState::Playing)
    }
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// How long a track stays visible after its last sample
    pub expiration_offset: TimeStamp,
    /// Frame rate used to advance frame-only streams
    pub frames_per_second: f64,
    pub show_trails: bool,
    /// Drop expired tracks from the store on every step
    pub evict_expired_tracks: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            expiration_offset: TimeStamp::with_time_and_frame(1.5e6, 15),
            frames_per_second: 30.0,
            show_trails: true,
            evict_expired_tracks: false,
        }
    }
}
