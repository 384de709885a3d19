//! Nearest-frame lookup for video frame indexes

use serde::{Deserialize, Serialize};
use vv_core::TimeStamp;

/// One row of a frame index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEntry {
    pub frame: u32,
    /// Microseconds; absent for frame-only streams
    #[serde(default)]
    pub time: Option<f64>,
    pub image: String,
}

impl FrameEntry {
    pub fn timestamp(&self) -> TimeStamp {
        match self.time {
            Some(time) => TimeStamp::with_time_and_frame(time, self.frame),
            None => TimeStamp::from_frame(self.frame),
        }
    }
}

/// Frames sorted by frame number
#[derive(Debug, Clone, Default)]
pub struct FrameIndex {
    entries: Vec<FrameEntry>,
    timed: bool,
}

impl FrameIndex {
    pub fn new(mut entries: Vec<FrameEntry>) -> Self {
        entries.sort_by_key(|e| e.frame);
        entries.dedup_by_key(|e| e.frame);
        let timed = !entries.is_empty() && entries.iter().all(|e| e.time.is_some());
        Self { entries, timed }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&FrameEntry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&FrameEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    /// Keep only frames whose time lies within `[start, end]`
    ///
    /// Frame-only indexes are returned unchanged.
    pub fn restrict_time(self, start: Option<i64>, end: Option<i64>) -> Self {
        if !self.timed || (start.is_none() && end.is_none()) {
            return self;
        }
        let lower = start.map_or(f64::NEG_INFINITY, |s| s as f64);
        let upper = end.map_or(f64::INFINITY, |e| e as f64);
        let entries = self
            .entries
            .into_iter()
            .filter(|e| e.time.map_or(false, |t| t >= lower && t <= upper))
            .collect();
        Self::new(entries)
    }

    /// Frame closest to `timestamp`
    ///
    /// Lookups use time when both sides have one and fall back to frame
    /// numbers. Ties go to the earlier frame.
    pub fn nearest(&self, timestamp: &TimeStamp) -> Option<&FrameEntry> {
        if timestamp.is_min_time() {
            return self.first();
        }
        if timestamp.is_max_time() {
            return self.last();
        }

        match (timestamp.time(), timestamp.frame_number()) {
            (Some(time), _) if self.timed => {
                self.closest(time, |e| e.time.unwrap_or_default())
            }
            (_, Some(frame)) => self.closest(f64::from(frame), |e| f64::from(e.frame)),
            _ => None,
        }
    }

    fn closest(&self, target: f64, key: impl Fn(&FrameEntry) -> f64) -> Option<&FrameEntry> {
        // Binary search for the first entry at or after the target
        let idx = self.entries.partition_point(|e| key(e) < target);
        let after = self.entries.get(idx);
        let before = idx.checked_sub(1).and_then(|i| self.entries.get(i));

        match (before, after) {
            (Some(b), Some(a)) => {
                if target - key(b) <= key(a) - target {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some(b), None) => Some(b),
            (None, a) => a,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> FrameIndex {
        FrameIndex::new(
            (0..=10)
                .rev()
                .map(|n| FrameEntry {
                    frame: n,
                    time: Some(f64::from(n) * 100.0),
                    image: format!("{}.png", n),
                })
                .collect(),
        )
    }

    #[test]
    fn test_nearest_by_time() {
        let index = index();
        assert_eq!(index.first().unwrap().frame, 0);
        assert_eq!(index.nearest(&TimeStamp::from_time(500.0)).unwrap().frame, 5);
        assert_eq!(index.nearest(&TimeStamp::from_time(549.0)).unwrap().frame, 5);
        assert_eq!(index.nearest(&TimeStamp::from_time(551.0)).unwrap().frame, 6);
        assert_eq!(index.nearest(&TimeStamp::from_time(-40.0)).unwrap().frame, 0);
        assert_eq!(index.nearest(&TimeStamp::from_time(9999.0)).unwrap().frame, 10);
    }

    #[test]
    fn test_nearest_by_frame_and_sentinels() {
        let index = index();
        assert_eq!(index.nearest(&TimeStamp::from_frame(7)).unwrap().frame, 7);
        assert_eq!(index.nearest(&TimeStamp::min_time()).unwrap().frame, 0);
        assert_eq!(index.nearest(&TimeStamp::max_time()).unwrap().frame, 10);
        assert!(index.nearest(&TimeStamp::new()).is_none());
    }

    #[test]
    fn test_restrict_time() {
        let index = index().restrict_time(Some(200), Some(450));
        let frames: Vec<_> = index.entries().iter().map(|e| e.frame).collect();
        assert_eq!(frames, vec![2, 3, 4]);
    }

    #[test]
    fn test_frame_only_index() {
        let index = FrameIndex::new(vec![
            FrameEntry { frame: 3, time: None, image: "a".into() },
            FrameEntry { frame: 9, time: None, image: "b".into() },
        ]);
        assert_eq!(index.nearest(&TimeStamp::from_time(7.0)), None);
        assert_eq!(index.nearest(&TimeStamp::with_time_and_frame(7.0, 7)).unwrap().frame, 9);
        assert_eq!(index.first().unwrap().timestamp(), TimeStamp::from_frame(3));
    }
}
