//! Simple CSV track archives
//!
//! Each row holds one track state:
//! `track id, _, frame, x0, y0, x1, y1, _, _, [type, confidence]...`.
//! Lines starting with `#` are comments. Rows that cannot be read are
//! skipped.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, info, warn};
use vv_core::tracks::box_shell;
use vv_core::{Point2, TimeStamp, Track, TrackId, TrackSample};

use crate::DataError;

const CLASSIFICATION_COLUMN: usize = 9;

struct TrackState {
    frame: u32,
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

#[derive(Default)]
struct PendingTrack {
    states: Vec<TrackState>,
    classification: Vec<(String, f64)>,
}

/// Reader for simple CSV track archives
#[derive(Debug, Default)]
pub struct SimpleCsvTrackReader {
    skipped: usize,
}

impl SimpleCsvTrackReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows skipped by the last read
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn read_path(&mut self, path: &Path) -> Result<Vec<Track>, DataError> {
        let file = std::fs::File::open(path)?;
        let tracks = self.read_from(file)?;
        info!(path = %path.display(), tracks = tracks.len(), skipped = self.skipped, "Read track archive");
        Ok(tracks)
    }

    /// Read tracks ordered by id, samples ordered by frame
    pub fn read_from<R: Read>(&mut self, input: R) -> Result<Vec<Track>, DataError> {
        self.skipped = 0;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(input);

        let mut pending: BTreeMap<TrackId, PendingTrack> = BTreeMap::new();
        for result in reader.records() {
            let record = result?;
            let Some((id, state)) = parse_state(&record) else {
                debug!(record = ?record, "Failed to read record");
                self.skipped += 1;
                continue;
            };

            let entry = pending.entry(id).or_default();
            entry.states.push(state);

            let classification = parse_classification(&record);
            if !classification.is_empty() {
                entry.classification = classification;
            }
        }

        let mut tracks = Vec::with_capacity(pending.len());
        for (id, mut track) in pending {
            track.states.sort_by_key(|s| s.frame);
            track.states.dedup_by_key(|s| s.frame);

            let samples = track
                .states
                .iter()
                .map(|s| {
                    let point = Point2::new(0.5 * (s.left + s.right), 0.5 * (s.top + s.bottom));
                    TrackSample::new(TimeStamp::from_frame(s.frame), point)
                        .with_shell(box_shell(s.left, s.top, s.right, s.bottom))
                })
                .collect();

            match Track::from_samples(id, samples) {
                Ok(mut built) => {
                    for (name, confidence) in track.classification {
                        built.set_classification(name, confidence);
                    }
                    tracks.push(built);
                }
                Err(e) => warn!(track = id, error = %e, "Dropping unreadable track"),
            }
        }
        Ok(tracks)
    }
}

fn parse_state(record: &StringRecord) -> Option<(TrackId, TrackState)> {
    let id: TrackId = record.get(0)?.parse().ok()?;
    let frame: u32 = record.get(2)?.parse().ok()?;
    let coord = |i: usize| -> Option<f64> { record.get(i)?.parse::<i64>().ok().map(|v| v as f64) };

    Some((
        id,
        TrackState {
            frame,
            left: coord(3)?,
            top: coord(4)?,
            right: coord(5)?,
            bottom: coord(6)?,
        },
    ))
}

fn parse_classification(record: &StringRecord) -> Vec<(String, f64)> {
    let mut result = Vec::new();
    let mut column = CLASSIFICATION_COLUMN;
    while let (Some(name), Some(confidence)) = (record.get(column), record.get(column + 1)) {
        match confidence.parse::<f64>() {
            Ok(confidence) if !name.is_empty() => result.push((name.to_string(), confidence)),
            _ => break,
        }
        column += 2;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARCHIVE: &str = "\
# id, unused, frame, x0, y0, x1, y1
1, 0, 5, 10, 20, 30, 40, 0, 0, person, 0.9, vehicle, 0.1
1, 0, 3, 0, 0, 10, 10
2, 0, 1, 100, 100, 110, 120
2, 0, two, 1, 1, 1, 1
3, 0
";

    #[test]
    fn test_read_tracks() {
        let mut reader = SimpleCsvTrackReader::new();
        let tracks = reader.read_from(ARCHIVE.as_bytes()).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(reader.skipped(), 2);

        let first = &tracks[0];
        assert_eq!(first.id(), 1);
        let frames: Vec<_> = first
            .samples()
            .iter()
            .map(|s| s.timestamp.frame_number().unwrap())
            .collect();
        assert_eq!(frames, vec![3, 5]);
        assert_eq!(first.samples()[1].point, Point2::new(20.0, 30.0));
        assert_eq!(first.samples()[1].shell.unwrap()[2], Point2::new(30.0, 40.0));
        assert_eq!(first.best_classification(), Some(("person", 0.9)));

        assert!(tracks[1].classification().is_empty());
    }
}
