//! Video archive lookup

use serde::{Deserialize, Serialize};

/// A request for the video covering a time range of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRequest {
    pub stream_id: String,
    pub mission_id: Option<String>,
    /// Microseconds
    pub start_time: i64,
    /// Microseconds
    pub end_time: i64,
}

/// Trait for resolving archived video by stream and time range
pub trait ArchiveResolver: Send + Sync {
    /// Resolve the request to a URI a video source can open
    fn resolve(&self, request: &ArchiveRequest) -> anyhow::Result<String>;
}
