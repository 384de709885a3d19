//! Turns query results into playable video and tracks

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use vv_core::tracks::box_shell;
use vv_core::{
    ArchiveRequest, ArchiveResolver, CoreError, PlaybackController, Point2, Track, TrackId,
    TrackSample,
};

use crate::error::{QueryError, Result};
use crate::result::{DescriptorRegion, QueryResult};

/// Mission id placeholder sent by clients that have none
const UNDEFINED_MISSION: &str = "-undefined-";

#[derive(Debug, Clone, PartialEq)]
pub struct BinderConfig {
    /// Image height used to flip region rows into track coordinates
    pub frame_height: f64,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            frame_height: 480.0,
        }
    }
}

/// Video URI and tracks for one result
#[derive(Debug, Clone, PartialEq)]
pub struct BoundResult {
    pub uri: String,
    pub tracks: Vec<Track>,
}

pub struct ResultBinder {
    resolver: Arc<dyn ArchiveResolver>,
    config: BinderConfig,
}

impl ResultBinder {
    pub fn new(resolver: Arc<dyn ArchiveResolver>, config: BinderConfig) -> Self {
        Self { resolver, config }
    }

    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    /// Resolve the video of a result payload and build its region tracks
    pub fn bind(&self, payload: &Value) -> Result<BoundResult> {
        let stream_id = payload
            .get("streamId")
            .and_then(Value::as_str)
            .ok_or(QueryError::MissingField("streamId"))?;
        let start_time = time_field(payload, "startTime")?;
        let end_time = time_field(payload, "endTime")?;
        let mission_id = payload
            .get("missionId")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty() && *m != UNDEFINED_MISSION)
            .map(String::from);

        let request = ArchiveRequest {
            stream_id: stream_id.to_string(),
            mission_id,
            start_time,
            end_time,
        };
        let uri = self.resolver.resolve(&request).map_err(|err| {
            QueryError::Core(CoreError::SourceUnavailable {
                stream: stream_id.to_string(),
                reason: format!("{:#}", err),
            })
        })?;

        let tracks = match payload.get("descriptors").and_then(Value::as_array) {
            Some(descriptors) => self.build_tracks(descriptors),
            None => Vec::new(),
        };
        debug!(%uri, tracks = tracks.len(), "Bound query result");
        Ok(BoundResult { uri, tracks })
    }

    pub fn bind_result(&self, result: &QueryResult) -> Result<BoundResult> {
        let payload = serde_json::to_value(result).unwrap_or(Value::Null);
        self.bind(&payload)
    }

    /// Load a bound result into a controller, replacing what it showed
    pub fn bind_into(&self, controller: &PlaybackController, payload: &Value) -> Result<BoundResult> {
        let bound = self.bind(payload)?;
        controller.stop();
        controller.init(&bound.uri)?;
        for track in &bound.tracks {
            let mut track = track.clone();
            controller.initialize_track(&mut track);
            controller.add_track(track)?;
        }
        controller.update()?;
        info!(uri = %bound.uri, tracks = bound.tracks.len(), "Loaded result into player");
        Ok(bound)
    }

    fn build_tracks(&self, descriptors: &[Value]) -> Vec<Track> {
        let mut tracks = Vec::new();
        let mut next_id: TrackId = 1;

        for descriptor in descriptors {
            // Descriptors without regions have nothing to draw
            let Some(regions) = descriptor.get("regions").and_then(Value::as_array) else {
                continue;
            };

            let mut samples: Vec<TrackSample> = regions
                .iter()
                .filter_map(|region| {
                    match serde_json::from_value::<DescriptorRegion>(region.clone()) {
                        Ok(region) if region.time_stamp.is_valid() => Some(self.sample(&region)),
                        Ok(_) => {
                            warn!("Skipping region without a valid timestamp");
                            None
                        }
                        Err(err) => {
                            warn!("Skipping malformed region: {}", err);
                            None
                        }
                    }
                })
                .collect();
            if samples.is_empty() {
                continue;
            }
            samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            samples.dedup_by(|a, b| a.timestamp == b.timestamp);

            match Track::from_samples(next_id, samples) {
                Ok(track) => {
                    tracks.push(track);
                    next_id += 1;
                }
                Err(err) => warn!(track = next_id, "Skipping descriptor track: {}", err),
            }
        }
        tracks
    }

    fn sample(&self, region: &DescriptorRegion) -> TrackSample {
        let height = self.config.frame_height;
        let image = &region.image_region;
        let top = height - image.top;
        let bottom = height - image.bottom;
        let point = Point2::new(0.5 * (image.left + image.right), bottom);
        TrackSample::new(region.time_stamp, point).with_shell(box_shell(
            image.left,
            top,
            image.right,
            bottom,
        ))
    }
}

fn time_field(payload: &Value, name: &'static str) -> Result<i64> {
    let value = payload.get(name).ok_or(QueryError::MissingField(name))?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|t| t.round() as i64))
        .ok_or(QueryError::MissingField(name))
}
