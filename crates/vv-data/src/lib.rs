//! Data handling and sources for video playback
//!
//! File-backed video sources, the clip archive used to resolve result
//! videos, simple track archives and service configuration.

pub mod archive;
pub mod config;
pub mod index;
pub mod sources;
pub mod tracks;
pub mod uri;

use thiserror::Error;

// Re-exports
pub use archive::{Clip, ClipArchive};
pub use config::ServiceConfig;
pub use index::{FrameEntry, FrameIndex};
pub use sources::FrameIndexSource;
pub use tracks::SimpleCsvTrackReader;
pub use uri::ResourceUri;

/// Errors that can occur in data operations
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(String),

    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("No frames in '{0}'")]
    EmptyIndex(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<csv::Error> for DataError {
    fn from(error: csv::Error) -> Self {
        match error.kind() {
            csv::ErrorKind::Io(io_err) => {
                DataError::Io(std::io::Error::new(io_err.kind(), error.to_string()))
            }
            _ => DataError::Csv(error.to_string()),
        }
    }
}

impl From<rusqlite::Error> for DataError {
    fn from(error: rusqlite::Error) -> Self {
        DataError::Sqlite(error.to_string())
    }
}
