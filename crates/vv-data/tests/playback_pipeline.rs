use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use vv_core::{
    ArchiveRequest, ArchiveResolver, PlaybackConfig, PlaybackController, PresentationSink,
    TimeStamp, TrackId, VideoFrame, VisibleTrack,
};
use vv_data::{ClipArchive, FrameIndexSource, SimpleCsvTrackReader};

#[derive(Default)]
struct Recorder {
    frames: Mutex<Vec<String>>,
    added: Mutex<Vec<TrackId>>,
}

impl PresentationSink for Recorder {
    fn add_renderables(&self, added: &[TrackId]) {
        self.added.lock().extend_from_slice(added);
    }

    fn present(&self, frame: &VideoFrame, _tracks: &[VisibleTrack]) {
        self.frames.lock().push(frame.image.clone());
    }
}

fn write(path: &Path, lines: &[String]) {
    let mut file = std::fs::File::create(path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
}

/// One stream of eleven frames, 100 µs apart, registered in a CSV provider
fn fixture() -> (TempDir, ClipArchive) {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("stream-1")).unwrap();

    let mut index = vec!["frame,time,image".to_string()];
    index.extend((0..=10).map(|n| format!("{},{},frame-{}.png", n, n * 100, n)));
    write(&dir.path().join("stream-1/index.csv"), &index);

    write(
        &dir.path().join("clips.csv"),
        &[
            "mission_id,stream_id,uri,first_time,last_time".to_string(),
            ",stream-1,stream-1/index.csv,0,1000".to_string(),
        ],
    );

    let archive = ClipArchive::from_providers(&[dir.path().join("clips.csv")]);
    (dir, archive)
}

#[test]
fn test_resolve_init_and_seek() {
    let (_dir, archive) = fixture();
    assert_eq!(archive.len(), 1);

    let uri = archive
        .resolve(&ArchiveRequest {
            stream_id: "stream-1".into(),
            mission_id: None,
            start_time: 0,
            end_time: 1000,
        })
        .unwrap();

    let controller = PlaybackController::new(
        Box::new(FrameIndexSource::new()),
        PlaybackConfig::default(),
    );
    let recorder = Arc::new(Recorder::default());
    controller.add_subscriber(recorder.clone());

    controller.init(&uri).unwrap();
    assert_eq!(controller.current_time().time(), Some(0.0));
    assert_eq!(controller.frame_count(), 11);

    controller.seek(TimeStamp::from_time(500.0)).unwrap();
    let frames = recorder.frames.lock().clone();
    assert!(frames.last().unwrap().ends_with("frame-5.png"));
    assert_eq!(controller.current_time().time(), Some(500.0));
}

#[test]
fn test_csv_tracks_follow_playback() {
    let (dir, archive) = fixture();
    let tracks_path = dir.path().join("tracks.csv");
    write(
        &tracks_path,
        &[
            "# id, _, frame, x0, y0, x1, y1".to_string(),
            "4,0,2,10,10,20,20,0,0,person,0.9".to_string(),
            "4,0,3,12,10,22,20".to_string(),
            "7,0,8,0,0,5,5".to_string(),
        ],
    );
    let tracks = SimpleCsvTrackReader::new().read_path(&tracks_path).unwrap();

    let uri = archive
        .resolve(&ArchiveRequest {
            stream_id: "stream-1".into(),
            mission_id: None,
            start_time: 100,
            end_time: 400,
        })
        .unwrap();
    let controller = PlaybackController::new(
        Box::new(FrameIndexSource::new()),
        PlaybackConfig::default(),
    );
    let recorder = Arc::new(Recorder::default());
    controller.add_subscriber(recorder.clone());
    controller.init(&uri).unwrap();
    assert_eq!(controller.begin_time().frame_number(), Some(1));

    for mut track in tracks {
        controller.initialize_track(&mut track);
        controller.add_track(track).unwrap();
    }
    controller.seek(TimeStamp::with_time_and_frame(300.0, 3)).unwrap();
    assert_eq!(recorder.added.lock().clone(), vec![4]);
}
