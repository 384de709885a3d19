//! Object tracks
//!
//! A track is a sequence of spatial samples ordered strictly by timestamp.
//! Tracks live in a [`TrackStore`]; a detached track must be bound to a store
//! before samples can be pushed onto it one at a time.

mod store;

pub use store::TrackStore;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::timestamp::TimeStamp;

/// Track identifier, unique within a store
pub type TrackId = i64;

/// Image-space point
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// World position of a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub northing: f64,
    pub easting: f64,
    /// Geographic coordinate system code
    pub gcs: i32,
}

/// Four-corner polygon outlining the object in a sample
pub type Shell = [Point2; 4];

/// Build a shell from an image box, corners in winding order
pub fn box_shell(left: f64, top: f64, right: f64, bottom: f64) -> Shell {
    [
        Point2::new(left, top),
        Point2::new(right, top),
        Point2::new(right, bottom),
        Point2::new(left, bottom),
    ]
}

/// A single observation of a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSample {
    pub timestamp: TimeStamp,
    pub point: Point2,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoCoordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<Shell>,
}

impl TrackSample {
    pub fn new(timestamp: TimeStamp, point: Point2) -> Self {
        Self {
            timestamp,
            point,
            geo: None,
            shell: None,
        }
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn with_geo(mut self, geo: GeoCoordinate) -> Self {
        self.geo = Some(geo);
        self
    }
}

/// Identity of the store a track is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(Uuid);

impl StoreId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An object track
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: TrackId,
    samples: Vec<TrackSample>,
    classification: IndexMap<String, f64>,
    binding: Option<StoreId>,
}

impl Track {
    /// Create an empty, unbound track
    pub fn new(id: TrackId) -> Self {
        Self {
            id,
            samples: Vec::new(),
            classification: IndexMap::new(),
            binding: None,
        }
    }

    /// Create an unbound track from a complete sample list
    ///
    /// Samples must already be strictly increasing by timestamp.
    pub fn from_samples(id: TrackId, samples: Vec<TrackSample>) -> Result<Self> {
        for pair in samples.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(CoreError::OutOfOrder {
                    track: id,
                    timestamp: pair[1].timestamp,
                    last: pair[0].timestamp,
                });
            }
        }
        if samples.iter().any(|s| !s.timestamp.is_valid()) {
            return Err(CoreError::InvalidTimeStamp(id));
        }

        Ok(Self {
            samples,
            ..Self::new(id)
        })
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn set_id(&mut self, id: TrackId) {
        self.id = id;
    }

    pub fn samples(&self) -> &[TrackSample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<TimeStamp> {
        self.samples.first().map(|s| s.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<TimeStamp> {
        self.samples.last().map(|s| s.timestamp)
    }

    pub fn binding(&self) -> Option<StoreId> {
        self.binding
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub(crate) fn bind(&mut self, store: StoreId) {
        self.binding = Some(store);
    }

    /// Append a sample to a bound track
    pub fn push_sample(&mut self, sample: TrackSample) -> Result<()> {
        if !self.is_bound() {
            return Err(CoreError::UnboundTrack(self.id));
        }
        self.check_next(&sample.timestamp)?;
        self.samples.push(sample);
        Ok(())
    }

    pub(crate) fn check_next(&self, timestamp: &TimeStamp) -> Result<()> {
        if !timestamp.is_valid() {
            return Err(CoreError::InvalidTimeStamp(self.id));
        }
        match self.last_timestamp() {
            Some(last) if *timestamp <= last => Err(CoreError::OutOfOrder {
                track: self.id,
                timestamp: *timestamp,
                last,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn push_unchecked(&mut self, sample: TrackSample) {
        self.samples.push(sample);
    }

    /// Record a type confidence; repeated names keep their first position
    pub fn set_classification(&mut self, type_name: impl Into<String>, confidence: f64) {
        self.classification.insert(type_name.into(), confidence);
    }

    pub fn classification(&self) -> &IndexMap<String, f64> {
        &self.classification
    }

    /// The type with the highest confidence
    pub fn best_classification(&self) -> Option<(&str, f64)> {
        self.classification
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, conf)| (name.as_str(), *conf))
    }

    /// Express a timeline position in the terms the samples use
    ///
    /// Frame-only tracks are compared by frame number even when the position
    /// also carries a time.
    pub fn position_of(&self, timestamp: &TimeStamp) -> TimeStamp {
        let frame_only = self
            .samples
            .first()
            .map_or(false, |s| !s.timestamp.has_time() && s.timestamp.has_frame_number());
        match timestamp.frame_number() {
            Some(frame) if frame_only && timestamp.has_time() => TimeStamp::from_frame(frame),
            _ => *timestamp,
        }
    }

    /// Latest sample at or before `timestamp`
    pub fn head_at(&self, timestamp: &TimeStamp) -> Option<&TrackSample> {
        let end = self.samples.partition_point(|s| s.timestamp <= *timestamp);
        end.checked_sub(1).map(|i| &self.samples[i])
    }

    /// Points of every sample at or before `timestamp`
    pub fn trail_until(&self, timestamp: &TimeStamp) -> Vec<Point2> {
        let end = self.samples.partition_point(|s| s.timestamp <= *timestamp);
        self.samples[..end].iter().map(|s| s.point).collect()
    }
}

/// A track as it appears at one timeline position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleTrack {
    pub id: TrackId,
    pub head: TrackSample,
    /// Empty when trails are hidden
    pub trail: Vec<Point2>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
}
