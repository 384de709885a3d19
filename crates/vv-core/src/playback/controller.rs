//! Playback controller implementation

use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashSet;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{Clock, PlaybackConfig, PlaybackState, PresentationSink, SystemClock};
use crate::error::{CoreError, Result};
use crate::timestamp::TimeStamp;
use crate::tracks::{Track, TrackId, TrackSample, TrackStore, VisibleTrack};
use crate::video::{VideoFrame, VideoSource};

/// Wall-clock reading paired with the timeline position it corresponds to
#[derive(Debug, Clone, Copy)]
struct ClockAnchor {
    wall: Duration,
    position: TimeStamp,
}

/// Playback state stored internally
#[derive(Debug)]
struct PlaybackInner {
    state: PlaybackState,
    stream_id: Option<String>,
    begin: TimeStamp,
    end: TimeStamp,
    current: TimeStamp,
    anchor: Option<ClockAnchor>,
    last_frame: Option<VideoFrame>,
    displayed: AHashSet<TrackId>,
    status: String,
    config: PlaybackConfig,
}

/// Drives a video source and a track store along a shared timeline
///
/// Every position change pulls the nearest frame and the tracks alive at that
/// position and hands them to the registered presentation sinks.
pub struct PlaybackController {
    source: Mutex<Box<dyn VideoSource>>,
    tracks: RwLock<TrackStore>,
    inner: RwLock<PlaybackInner>,
    clock: Arc<dyn Clock>,
    subscribers: RwLock<Vec<Weak<dyn PresentationSink>>>,
}

impl PlaybackController {
    pub fn new(source: Box<dyn VideoSource>, config: PlaybackConfig) -> Self {
        Self::with_clock(source, config, Arc::new(SystemClock::default()))
    }

    /// Create a controller driven by a custom clock
    pub fn with_clock(
        source: Box<dyn VideoSource>,
        config: PlaybackConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = PlaybackInner {
            state: PlaybackState::Uninitialized,
            stream_id: None,
            begin: TimeStamp::new(),
            end: TimeStamp::new(),
            current: TimeStamp::new(),
            anchor: None,
            last_frame: None,
            displayed: AHashSet::new(),
            status: String::new(),
            config,
        };

        Self {
            source: Mutex::new(source),
            tracks: RwLock::new(TrackStore::new()),
            inner: RwLock::new(inner),
            clock,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Open a stream and present its first frame
    ///
    /// Tracks left over from a previous stream are removed. A failure leaves
    /// the controller in the terminal `Failed` state.
    pub fn init(&self, stream_id: &str) -> Result<()> {
        if self.state() == PlaybackState::Failed {
            return Err(self.not_ready());
        }
        info!(stream = stream_id, "Initializing playback");

        let bounds = {
            let mut source = self.source.lock();
            source
                .open(stream_id)
                .map(|_| (source.min_time(), source.max_time()))
        };
        let (begin, end) = match bounds {
            Ok((begin, end)) if begin.is_valid() && end.is_valid() => (begin, end),
            Ok(_) => return Err(self.fail(stream_id, "stream has no frames".to_string())),
            Err(e) => return Err(self.fail(stream_id, format!("{:#}", e))),
        };

        let removed = self.tracks.write().clear();
        if removed > 0 {
            debug!(count = removed, "Removed tracks of the previous stream");
        }

        {
            let mut inner = self.inner.write();
            inner.stream_id = Some(stream_id.to_string());
            inner.begin = begin;
            inner.end = end;
            inner.current = begin;
            inner.anchor = None;
            inner.state = PlaybackState::Stopped;
            inner.status.clear();
        }

        if let Err(e) = self.step(begin) {
            return Err(self.fail(stream_id, e.to_string()));
        }
        Ok(())
    }

    /// Present the frame and tracks at `timestamp`
    ///
    /// On a frame read failure the error is recorded as status and nothing
    /// else changes.
    pub fn step(&self, timestamp: TimeStamp) -> Result<()> {
        let config = {
            let inner = self.inner.read();
            if !inner.state.is_ready() {
                drop(inner);
                return Err(self.not_ready());
            }
            inner.config.clone()
        };

        let frame = match self.source.lock().frame_at(&timestamp) {
            Ok(frame) => frame,
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(time = %timestamp, %reason, "Unable to read frame");
                self.inner.write().status = format!("Unable to read frame at {}: {}", timestamp, reason);
                return Err(CoreError::FrameUnavailable { timestamp, reason });
            }
        };

        if config.evict_expired_tracks {
            self.tracks
                .write()
                .evict_older_than(&timestamp, &config.expiration_offset);
        }
        let visible =
            self.tracks
                .read()
                .visible_at(&timestamp, &config.expiration_offset, config.show_trails);
        let shown: AHashSet<TrackId> = visible.iter().map(|t| t.id).collect();

        let (added, removed) = {
            let mut inner = self.inner.write();
            let added: Vec<TrackId> = visible
                .iter()
                .map(|t| t.id)
                .filter(|id| !inner.displayed.contains(id))
                .collect();
            let mut removed: Vec<TrackId> = inner
                .displayed
                .iter()
                .copied()
                .filter(|id| !shown.contains(id))
                .collect();
            removed.sort_unstable();

            inner.displayed = shown;
            inner.current = timestamp;
            inner.last_frame = Some(frame.clone());
            inner.status.clear();
            (added, removed)
        };

        debug!(
            time = %timestamp,
            frame = %frame.timestamp,
            tracks = visible.len(),
            "Stepped playback"
        );
        self.notify_subscribers(&frame, &visible, &added, &removed);
        Ok(())
    }

    /// Start advancing with the wall clock
    pub fn play(&self) -> Result<TimeStamp> {
        {
            let mut inner = self.inner.write();
            if !inner.state.is_ready() {
                drop(inner);
                return Err(self.not_ready());
            }
            if inner.anchor.is_none() {
                let position = inner.current;
                inner.anchor = Some(ClockAnchor {
                    wall: self.clock.now(),
                    position,
                });
            }
            inner.state = PlaybackState::Playing;
        }
        info!("Playback started");
        self.tick()
    }

    /// Advance to the wall-clock position; a no-op unless playing
    ///
    /// Reaching the end of the stream stops playback.
    pub fn tick(&self) -> Result<TimeStamp> {
        let (anchor, begin, end, fps) = {
            let inner = self.inner.read();
            match (inner.state, inner.anchor) {
                (PlaybackState::Playing, Some(anchor)) => (
                    anchor,
                    inner.begin,
                    inner.end,
                    inner.config.frames_per_second,
                ),
                _ => return Ok(inner.current),
            }
        };

        let elapsed = self.clock.now().saturating_sub(anchor.wall);
        let target = advance(&anchor.position, elapsed, fps).max(begin).min(end);

        self.step(target)?;
        if target >= end {
            info!(time = %target, "Reached end of stream");
            self.stop();
        }
        Ok(target)
    }

    /// Jump to `timestamp`, keeping playback running if it was
    pub fn seek(&self, timestamp: TimeStamp) -> Result<()> {
        self.step(timestamp)?;

        let mut inner = self.inner.write();
        if inner.state == PlaybackState::Playing {
            inner.anchor = Some(ClockAnchor {
                wall: self.clock.now(),
                position: timestamp,
            });
        }
        Ok(())
    }

    pub fn stop(&self) {
        let mut inner = self.inner.write();
        if inner.state == PlaybackState::Playing {
            inner.state = PlaybackState::Stopped;
            info!("Playback stopped");
        }
        inner.anchor = None;
    }

    /// Re-present the current position
    pub fn update(&self) -> Result<()> {
        let current = self.current_time();
        self.step(current)
    }

    pub fn add_track(&self, track: Track) -> Result<()> {
        self.tracks.write().add_track(track)
    }

    /// Bind a detached track to this controller's store
    pub fn initialize_track(&self, track: &mut Track) {
        self.tracks.read().initialize_track(track);
    }

    pub fn append_sample(&self, id: TrackId, sample: TrackSample) -> Result<()> {
        self.tracks.write().append_sample(id, sample)
    }

    pub fn remove_track(&self, id: TrackId) -> Result<Track> {
        self.tracks.write().remove_track(id)
    }

    pub fn clear_tracks(&self) -> usize {
        self.tracks.write().clear()
    }

    /// Drop tracks that expired before the current position
    pub fn evict_expired(&self) -> Vec<TrackId> {
        let (current, offset) = {
            let inner = self.inner.read();
            (inner.current, inner.config.expiration_offset)
        };
        self.tracks.write().evict_older_than(&current, &offset)
    }

    /// Run `f` against the track store
    pub fn with_tracks<R>(&self, f: impl FnOnce(&TrackStore) -> R) -> R {
        f(&self.tracks.read())
    }

    pub fn set_trails_visible(&self, visible: bool) -> Result<()> {
        let ready = {
            let mut inner = self.inner.write();
            inner.config.show_trails = visible;
            inner.state.is_ready()
        };
        if ready {
            self.update()?;
        }
        Ok(())
    }

    pub fn set_expiration_offset(&self, offset: TimeStamp) {
        self.inner.write().config.expiration_offset = offset;
    }

    pub fn config(&self) -> PlaybackConfig {
        self.inner.read().config.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.read().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn current_time(&self) -> TimeStamp {
        self.inner.read().current
    }

    pub fn begin_time(&self) -> TimeStamp {
        self.inner.read().begin
    }

    pub fn end_time(&self) -> TimeStamp {
        self.inner.read().end
    }

    pub fn stream_id(&self) -> Option<String> {
        self.inner.read().stream_id.clone()
    }

    pub fn status(&self) -> String {
        self.inner.read().status.clone()
    }

    pub fn last_frame(&self) -> Option<VideoFrame> {
        self.inner.read().last_frame.clone()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn frame_count(&self) -> usize {
        self.source.lock().frame_count()
    }

    /// Add a subscriber; it is held weakly and pruned once dropped
    pub fn add_subscriber(&self, subscriber: Arc<dyn PresentationSink>) {
        let mut subscribers = self.subscribers.write();
        subscribers.push(Arc::downgrade(&subscriber));
    }

    fn notify_subscribers(
        &self,
        frame: &VideoFrame,
        tracks: &[VisibleTrack],
        added: &[TrackId],
        removed: &[TrackId],
    ) {
        let mut subscribers = self.subscribers.write();

        // Remove any dead weak references
        subscribers.retain(|weak| weak.strong_count() > 0);

        for weak in subscribers.iter() {
            if let Some(subscriber) = weak.upgrade() {
                if !removed.is_empty() {
                    subscriber.remove_renderables(removed);
                }
                if !added.is_empty() {
                    subscriber.add_renderables(added);
                }
                subscriber.present(frame, tracks);
            }
        }
    }

    fn not_ready(&self) -> CoreError {
        let inner = self.inner.read();
        match inner.state {
            PlaybackState::Failed => CoreError::SourceUnavailable {
                stream: inner.stream_id.clone().unwrap_or_default(),
                reason: inner.status.clone(),
            },
            _ => CoreError::NotInitialized,
        }
    }

    fn fail(&self, stream_id: &str, reason: String) -> CoreError {
        error!(stream = stream_id, %reason, "Unable to open video stream");
        let mut inner = self.inner.write();
        inner.state = PlaybackState::Failed;
        inner.stream_id = Some(stream_id.to_string());
        inner.anchor = None;
        inner.status = reason.clone();
        CoreError::SourceUnavailable {
            stream: stream_id.to_string(),
            reason,
        }
    }
}

/// Position reached after `elapsed` wall time from `position`
fn advance(position: &TimeStamp, elapsed: Duration, fps: f64) -> TimeStamp {
    match (position.time(), position.frame_number()) {
        (Some(t), _) => TimeStamp::from_time(t + elapsed.as_micros() as f64),
        (None, Some(f)) => {
            let frames = (elapsed.as_secs_f64() * fps).floor() as u32;
            TimeStamp::from_frame(f.saturating_add(frames))
        }
        _ => *position,
    }
}
