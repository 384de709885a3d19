//! JSON presentation of playback output

use serde_json::{json, Value};
use tokio::sync::mpsc;
use vv_core::{PresentationSink, TrackId, VideoFrame, VisibleTrack};

/// Channel carrying lines for stdout
pub type Outbox = mpsc::UnboundedSender<Value>;

/// Publishes a player's frames and track changes as notifications
pub struct JsonPresenter {
    player_id: u32,
    outbox: Outbox,
}

impl JsonPresenter {
    pub fn new(player_id: u32, outbox: Outbox) -> Self {
        Self { player_id, outbox }
    }

    fn send(&self, message: Value) {
        // The receiver only goes away during shutdown
        let _ = self.outbox.send(message);
    }
}

impl PresentationSink for JsonPresenter {
    fn add_renderables(&self, added: &[TrackId]) {
        self.send(json!({
            "event": "videoPlayer:addTracks",
            "playerId": self.player_id,
            "tracks": added,
        }));
    }

    fn remove_renderables(&self, removed: &[TrackId]) {
        self.send(json!({
            "event": "videoPlayer:removeTracks",
            "playerId": self.player_id,
            "tracks": removed,
        }));
    }

    fn present(&self, frame: &VideoFrame, tracks: &[VisibleTrack]) {
        self.send(json!({
            "event": "videoPlayer:frame",
            "playerId": self.player_id,
            "frame": frame,
            "tracks": tracks,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vv_core::TimeStamp;

    #[test]
    fn test_notifications() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let presenter = JsonPresenter::new(3, tx);

        presenter.add_renderables(&[1, 2]);
        presenter.present(
            &VideoFrame {
                timestamp: TimeStamp::with_time_and_frame(100.0, 1),
                image: "f1.png".into(),
            },
            &[],
        );

        let added = rx.try_recv().unwrap();
        assert_eq!(added["event"], "videoPlayer:addTracks");
        assert_eq!(added["tracks"], json!([1, 2]));

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame["playerId"], 3);
        assert_eq!(frame["frame"]["image"], "f1.png");
        assert_eq!(frame["frame"]["timestamp"]["frame"], 1);
    }
}
