//! Service configuration
//!
//! Settings come from an optional JSON file and are then overridden by the
//! `VISGUI_*` environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use vv_core::PlaybackConfig;

use crate::DataError;

pub const ENV_VIDEO_PROVIDERS: &str = "VISGUI_VIDEO_PROVIDERS";
pub const ENV_QUERY_URL: &str = "VISGUI_QUERY_URL";
pub const ENV_STREAM_ID: &str = "VISGUI_STREAM_ID";

/// Relevance feedback settings for query sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Feedback requests asked for when a query completes
    pub desired_count: usize,
    /// Ask for feedback automatically after the first result set
    pub implicit: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            desired_count: 10,
            implicit: true,
        }
    }
}

/// Configuration for the visgui service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Clip provider index files
    pub video_providers: Vec<PathBuf>,
    /// Query service endpoint handed to clients
    pub query_url: Option<String>,
    /// Stream used when a player is given none
    pub stream_id: Option<String>,
    /// Height of result imagery, used to flip region boxes
    pub frame_height: f64,
    /// Milliseconds between playback ticks
    pub tick_interval_ms: u64,
    pub playback: PlaybackConfig,
    pub feedback: FeedbackConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            video_providers: Vec::new(),
            query_url: None,
            stream_id: None,
            frame_height: 480.0,
            tick_interval_ms: 33,
            playback: PlaybackConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply the process environment
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Apply variables looked up through `lookup`
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(providers) = lookup(ENV_VIDEO_PROVIDERS) {
            self.video_providers = split_providers(&providers);
        }
        if let Some(url) = lookup(ENV_QUERY_URL) {
            self.query_url = Some(url);
        }
        if let Some(stream) = lookup(ENV_STREAM_ID) {
            self.stream_id = Some(stream);
        }
    }

    pub fn validate(&self) -> Result<(), DataError> {
        if !(self.frame_height > 0.0) {
            return Err(DataError::Config(format!(
                "frame_height must be positive, got {}",
                self.frame_height
            )));
        }
        if !(self.playback.frames_per_second > 0.0) {
            return Err(DataError::Config(
                "playback.frames_per_second must be positive".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(DataError::Config("tick_interval_ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Split a `;`-separated provider list, ignoring empty entries
pub fn split_providers(value: &str) -> Vec<PathBuf> {
    value
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}
