//! Video clip archive
//!
//! Clips are registered from provider index files and looked up by mission,
//! stream and time range.

mod providers;

use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vv_core::{ArchiveRequest, ArchiveResolver};

use crate::uri::with_time_range;
use crate::DataError;

/// A contiguous piece of archived video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    #[serde(default)]
    pub mission_id: String,
    #[serde(default)]
    pub stream_id: String,
    pub uri: String,
    /// Microseconds
    pub first_time: i64,
    /// Microseconds
    pub last_time: i64,
}

/// Clips grouped by mission id
#[derive(Debug, Default)]
pub struct ClipArchive {
    clips_by_mission: AHashMap<String, Vec<Clip>>,
}

impl ClipArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every provider; unreadable providers are logged and skipped
    pub fn from_providers<P: AsRef<Path>>(providers: &[P]) -> Self {
        let mut archive = Self::new();
        for provider in providers {
            let provider = provider.as_ref();
            if let Err(e) = archive.add_source(provider) {
                warn!(provider = %provider.display(), error = %e, "Unable to load video provider");
            }
        }
        archive
    }

    /// Load clips from a provider file (`.csv`, `.db` or `.sqlite`)
    pub fn add_source(&mut self, path: &Path) -> Result<usize, DataError> {
        let clips = providers::load(path)?;
        let count = clips.len();
        for clip in clips {
            self.add_clip(clip);
        }
        info!(provider = %path.display(), clips = count, "Added video provider");
        Ok(count)
    }

    pub fn add_clip(&mut self, clip: Clip) {
        self.clips_by_mission
            .entry(clip.mission_id.clone())
            .or_default()
            .push(clip);
    }

    pub fn len(&self) -> usize {
        self.clips_by_mission.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the clip that best covers the request
    ///
    /// A clip wholly containing the range wins at once; otherwise the clip
    /// with the longest overlap is chosen. An empty stream id on either side
    /// matches any stream.
    pub fn find_clip(&self, request: &ArchiveRequest) -> Option<&Clip> {
        if request.end_time < request.start_time {
            return None;
        }
        let mission = request.mission_id.as_deref().unwrap_or_default();
        let candidates = self.clips_by_mission.get(mission)?;

        let mut best: Option<(&Clip, i64)> = None;
        for clip in candidates {
            if !request.stream_id.is_empty()
                && !clip.stream_id.is_empty()
                && request.stream_id != clip.stream_id
            {
                continue;
            }
            if clip.first_time > request.end_time || clip.last_time < request.start_time {
                continue;
            }
            if clip.first_time <= request.start_time && clip.last_time >= request.end_time {
                return Some(clip);
            }

            let overlap = clip.last_time.min(request.end_time) - clip.first_time.max(request.start_time);
            if best.map_or(true, |(_, length)| overlap > length) {
                best = Some((clip, overlap));
            }
        }
        best.map(|(clip, _)| clip)
    }

    /// URI of the best clip, restricted to the part of the request it covers
    pub fn uri_for(&self, request: &ArchiveRequest) -> Option<String> {
        let clip = self.find_clip(request)?;
        let start = request.start_time.max(clip.first_time);
        let end = request.end_time.min(clip.last_time);
        debug!(uri = %clip.uri, start, end, "Resolved archive request");
        Some(with_time_range(&clip.uri, start, end))
    }
}

impl ArchiveResolver for ClipArchive {
    fn resolve(&self, request: &ArchiveRequest) -> anyhow::Result<String> {
        self.uri_for(request).ok_or_else(|| {
            anyhow::anyhow!(
                "No archived video for stream '{}' between {} and {}",
                request.stream_id,
                request.start_time,
                request.end_time
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(mission: &str, stream: &str, uri: &str, first: i64, last: i64) -> Clip {
        Clip {
            mission_id: mission.into(),
            stream_id: stream.into(),
            uri: uri.into(),
            first_time: first,
            last_time: last,
        }
    }

    fn request(stream: &str, mission: Option<&str>, start: i64, end: i64) -> ArchiveRequest {
        ArchiveRequest {
            stream_id: stream.into(),
            mission_id: mission.map(String::from),
            start_time: start,
            end_time: end,
        }
    }

    fn archive() -> ClipArchive {
        let mut archive = ClipArchive::new();
        archive.add_clip(clip("", "s1", "file:///a", 0, 100));
        archive.add_clip(clip("", "s1", "file:///b", 80, 300));
        archive.add_clip(clip("", "s2", "file:///c", 0, 1000));
        archive.add_clip(clip("m1", "", "file:///d", 0, 1000));
        archive
    }

    #[test]
    fn test_containing_clip_wins() {
        let archive = archive();
        let found = archive.find_clip(&request("s1", None, 10, 90)).unwrap();
        assert_eq!(found.uri, "file:///a");
    }

    #[test]
    fn test_longest_overlap() {
        let archive = archive();
        let found = archive.find_clip(&request("s1", None, 50, 400)).unwrap();
        assert_eq!(found.uri, "file:///b");
        assert_eq!(
            archive.uri_for(&request("s1", None, 50, 400)).unwrap(),
            "file:///b?StartTime=80&EndTime=300"
        );
    }

    #[test]
    fn test_mission_and_stream_matching() {
        let archive = archive();
        // Clips without a stream id match any stream
        assert_eq!(
            archive.find_clip(&request("zzz", Some("m1"), 5, 6)).unwrap().uri,
            "file:///d"
        );
        assert!(archive.find_clip(&request("s1", Some("m2"), 5, 6)).is_none());
        assert!(archive.find_clip(&request("s3", None, 5, 6)).is_none());
        assert!(archive.find_clip(&request("s1", None, 2000, 3000)).is_none());
        assert!(archive.find_clip(&request("s1", None, 60, 50)).is_none());
        assert!(archive.resolve(&request("s3", None, 5, 6)).is_err());
    }
}
