//! Timeline positions
//!
//! A timestamp carries a world time in microseconds, a frame number, or both.
//! When both are present the time takes precedence. Two sentinel values
//! bracket every other valid timestamp.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel bounds of the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Bound {
    Min,
    Max,
}

/// Ordering classes; the derived order is the order of the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Invalid,
    Min,
    Value,
    Max,
}

/// A comparable point in a timeline
///
/// Ordering is total: `invalid < MinTime < valid < MaxTime`. Two stamps that
/// both carry a time compare by time alone; their frame numbers are ignored.
/// Two frame-only stamps compare by frame number. A stamp carrying a time
/// always orders before a frame-only stamp.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(from = "RawTimeStamp", into = "RawTimeStamp")]
pub struct TimeStamp {
    time: Option<f64>,
    frame_number: Option<u32>,
    bound: Option<Bound>,
}

impl TimeStamp {
    /// Create an invalid timestamp
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_time(time: f64) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    pub fn from_frame(frame_number: u32) -> Self {
        Self {
            frame_number: Some(frame_number),
            ..Self::default()
        }
    }

    pub fn with_time_and_frame(time: f64, frame_number: u32) -> Self {
        Self {
            time: Some(time),
            frame_number: Some(frame_number),
            bound: None,
        }
    }

    /// A timestamp that orders before every other valid timestamp
    pub fn min_time() -> Self {
        let mut ts = Self::default();
        ts.set_to_min_time();
        ts
    }

    /// A timestamp that orders after every other valid timestamp
    pub fn max_time() -> Self {
        let mut ts = Self::default();
        ts.set_to_max_time();
        ts
    }

    pub fn is_valid(&self) -> bool {
        self.time.is_some() || self.frame_number.is_some() || self.bound.is_some()
    }

    pub fn has_time(&self) -> bool {
        self.time.is_some()
    }

    pub fn has_frame_number(&self) -> bool {
        self.frame_number.is_some()
    }

    pub fn is_min_time(&self) -> bool {
        self.bound == Some(Bound::Min)
    }

    pub fn is_max_time(&self) -> bool {
        self.bound == Some(Bound::Max)
    }

    /// Time in microseconds, if present
    pub fn time(&self) -> Option<f64> {
        self.time
    }

    pub fn frame_number(&self) -> Option<u32> {
        self.frame_number
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = Some(time);
        self.bound = None;
    }

    pub fn set_frame_number(&mut self, frame_number: u32) {
        self.frame_number = Some(frame_number);
    }

    pub fn set_to_min_time(&mut self) {
        self.time = None;
        self.bound = Some(Bound::Min);
    }

    pub fn set_to_max_time(&mut self) {
        self.time = None;
        self.bound = Some(Bound::Max);
    }

    /// Clear both time and frame number
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Move this timestamp forward by `offset`, component by component
    ///
    /// Time is shifted only if both carry a time, the frame number only if both
    /// carry a frame number. Sentinels and invalid stamps are returned as is.
    pub fn shifted_forward(&self, offset: &TimeStamp) -> TimeStamp {
        if self.bound.is_some() {
            return *self;
        }
        let mut result = *self;
        if let (Some(t), Some(o)) = (self.time, offset.time) {
            result.time = Some(t + o);
        }
        if let (Some(f), Some(o)) = (self.frame_number, offset.frame_number) {
            result.frame_number = Some(f.saturating_add(o));
        }
        result
    }

    /// Move this timestamp backward by `offset`; frame numbers saturate at zero
    pub fn shifted_backward(&self, offset: &TimeStamp) -> TimeStamp {
        if self.bound.is_some() {
            return *self;
        }
        let mut result = *self;
        if let (Some(t), Some(o)) = (self.time, offset.time) {
            result.time = Some(t - o);
        }
        if let (Some(f), Some(o)) = (self.frame_number, offset.frame_number) {
            result.frame_number = Some(f.saturating_sub(o));
        }
        result
    }

    /// `self - other` in seconds when both carry a time, otherwise in frames
    pub fn difference_secs(&self, other: &TimeStamp) -> Option<f64> {
        if self.bound.is_some() || other.bound.is_some() {
            return None;
        }
        match (self.time, other.time) {
            (Some(a), Some(b)) => Some((a - b) / 1e6),
            _ => match (self.frame_number, other.frame_number) {
                (Some(a), Some(b)) => Some(f64::from(a) - f64::from(b)),
                _ => None,
            },
        }
    }

    /// Interpret the time as microseconds since the UNIX epoch
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let micros = self.time?.round() as i64;
        Utc.timestamp_micros(micros).single()
    }

    fn rank(&self) -> Rank {
        match self.bound {
            Some(Bound::Min) => Rank::Min,
            Some(Bound::Max) => Rank::Max,
            None if self.is_valid() => Rank::Value,
            None => Rank::Invalid,
        }
    }
}

impl Ord for TimeStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.rank(), other.rank());
        if a != b || a != Rank::Value {
            return a.cmp(&b);
        }

        match (self.time, other.time) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.frame_number.cmp(&other.frame_number),
        }
    }
}

impl PartialOrd for TimeStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimeStamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeStamp {}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.bound, self.time, self.frame_number) {
            (Some(Bound::Min), _, _) => write!(f, "<min>"),
            (Some(Bound::Max), _, _) => write!(f, "<max>"),
            (None, Some(t), Some(n)) => write!(f, "{}us (frame {})", t, n),
            (None, Some(t), None) => write!(f, "{}us", t),
            (None, None, Some(n)) => write!(f, "frame {}", n),
            (None, None, None) => write!(f, "<invalid>"),
        }
    }
}

/// Wire form: `{ "time": .., "frame": .. }`
#[derive(Serialize, Deserialize)]
struct RawTimeStamp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frame: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bound: Option<Bound>,
}

impl From<RawTimeStamp> for TimeStamp {
    fn from(raw: RawTimeStamp) -> Self {
        Self {
            time: if raw.bound.is_some() { None } else { raw.time },
            frame_number: raw.frame,
            bound: raw.bound,
        }
    }
}

impl From<TimeStamp> for RawTimeStamp {
    fn from(ts: TimeStamp) -> Self {
        Self {
            time: ts.time,
            frame: ts.frame_number,
            bound: ts.bound,
        }
    }
}
