//! Presentation sink trait

use crate::tracks::{TrackId, VisibleTrack};
use crate::video::VideoFrame;

/// Trait for components that display playback output
///
/// For every step the controller first reports which tracks became visible
/// or hidden, then hands over the frame with every visible track.
pub trait PresentationSink: Send + Sync {
    fn add_renderables(&self, _added: &[TrackId]) {}

    fn remove_renderables(&self, _removed: &[TrackId]) {}

    fn present(&self, frame: &VideoFrame, tracks: &[VisibleTrack]);
}
