//! Video source backed by a CSV frame index
//!
//! The index lists one frame per row under a `frame,time,image` header.
//! Relative image paths are resolved against the index file's directory.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use csv::ReaderBuilder;
use tracing::{debug, info};
use vv_core::{TimeStamp, VideoFrame, VideoSource};

use crate::index::{FrameEntry, FrameIndex};
use crate::uri::ResourceUri;
use crate::DataError;

/// Frame index source for opening indexed image sequences
pub struct FrameIndexSource {
    name: String,
    base_dir: PathBuf,
    index: FrameIndex,
}

impl Default for FrameIndexSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameIndexSource {
    /// Create a source with nothing open
    pub fn new() -> Self {
        Self {
            name: String::new(),
            base_dir: PathBuf::new(),
            index: FrameIndex::default(),
        }
    }

    /// Create a source and open `uri`
    pub fn open_uri(uri: &str) -> Result<Self, DataError> {
        let mut source = Self::new();
        source.load(uri)?;
        Ok(source)
    }

    fn load(&mut self, uri: &str) -> Result<(), DataError> {
        let resource = ResourceUri::parse(uri)?;
        let entries = Self::read_index(resource.path())?;
        let index = FrameIndex::new(entries)
            .restrict_time(resource.start_time(), resource.end_time());
        if index.is_empty() {
            return Err(DataError::EmptyIndex(uri.to_string()));
        }

        info!(uri, frames = index.len(), "Opened frame index");
        self.name = uri.to_string();
        self.base_dir = resource
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.index = index;
        Ok(())
    }

    fn read_index(path: &Path) -> Result<Vec<FrameEntry>, DataError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_path(path)?;

        let mut entries = Vec::new();
        for result in reader.deserialize() {
            let entry: FrameEntry = result?;
            entries.push(entry);
        }
        debug!(path = %path.display(), rows = entries.len(), "Read frame index");
        Ok(entries)
    }

    fn image_path(&self, image: &str) -> String {
        let path = Path::new(image);
        if path.is_absolute() {
            image.to_string()
        } else {
            self.base_dir.join(path).display().to_string()
        }
    }
}

impl VideoSource for FrameIndexSource {
    fn open(&mut self, stream_id: &str) -> anyhow::Result<()> {
        self.load(stream_id)
            .with_context(|| format!("Failed to open video '{}'", stream_id))
    }

    fn min_time(&self) -> TimeStamp {
        self.index.first().map(FrameEntry::timestamp).unwrap_or_default()
    }

    fn max_time(&self) -> TimeStamp {
        self.index.last().map(FrameEntry::timestamp).unwrap_or_default()
    }

    fn frame_at(&self, timestamp: &TimeStamp) -> anyhow::Result<VideoFrame> {
        if self.index.is_empty() {
            return Err(anyhow!("no video is open"));
        }
        let entry = self
            .index
            .nearest(timestamp)
            .ok_or_else(|| anyhow!("no frame matches {}", timestamp))?;

        Ok(VideoFrame {
            timestamp: entry.timestamp(),
            image: self.image_path(&entry.image),
        })
    }

    fn frame_count(&self) -> usize {
        self.index.len()
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}
