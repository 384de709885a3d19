//! Service state and the commands exposing it
//!
//! The state owns the current query session, the opened videos and the
//! video players. Every command looks its target up by id and fails with
//! `notFound` when there is none.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use vv_core::{
    CoreError, PlaybackConfig, PlaybackController, PlaybackState, TimeStamp, VideoFrame,
    VideoSource,
};
use vv_data::{ClipArchive, FrameIndexSource, ServiceConfig, SimpleCsvTrackReader};
use vv_query::{
    ArchiveQueryTransport, BinderConfig, Classification, EventSender, Plan, QueryError,
    QueryPlanRecord, QuerySession, ResultBinder, ResultId, ResultsSnapshot, SessionConfig,
    SessionHandlers, SessionState, TransportEvent,
};

use crate::dispatch::{CommandError, CommandTable};
use crate::presenter::{JsonPresenter, Outbox};

/// A query plan as sent by clients: KST text or the structured form
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PlanParam {
    Text(String),
    Parsed(QueryPlanRecord),
}

impl From<PlanParam> for Plan {
    fn from(param: PlanParam) -> Self {
        match param {
            PlanParam::Text(text) => Plan::Raw(text),
            PlanParam::Parsed(record) => Plan::Parsed(record),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteParams {
    #[serde(default)]
    pub query_service_uri: Option<String>,
    pub plan: PlanParam,
    #[serde(default)]
    pub working_set_size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackParams {
    pub result_id: ResultId,
    pub score: Classification,
}

/// Timeline position given as a time, a frame number or both
#[derive(Debug, Default, Deserialize)]
pub struct PositionParams {
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub frame: Option<u32>,
}

impl PositionParams {
    fn timestamp(&self, command: &'static str) -> Result<TimeStamp, CommandError> {
        match (self.time, self.frame) {
            (Some(time), Some(frame)) => Ok(TimeStamp::with_time_and_frame(time, frame)),
            (Some(time), None) => Ok(TimeStamp::from_time(time)),
            (None, Some(frame)) => Ok(TimeStamp::from_frame(frame)),
            (None, None) => Err(CommandError::InvalidParams {
                command,
                reason: "a time or frame is required".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateVideoParams {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoParams {
    pub video_id: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameParams {
    pub video_id: u32,
    #[serde(flatten)]
    pub position: PositionParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerParams {
    pub player_id: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    pub player_id: u32,
    #[serde(default)]
    pub stream_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDataParams {
    pub player_id: u32,
    pub result_id: ResultId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekParams {
    pub player_id: u32,
    #[serde(flatten)]
    pub position: PositionParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailsParams {
    pub player_id: u32,
    pub visible: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTracksParams {
    pub player_id: u32,
    pub path: PathBuf,
}

/// Player summary returned by player commands
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub stream_id: Option<String>,
    pub current_time: TimeStamp,
    pub begin_time: TimeStamp,
    pub end_time: TimeStamp,
    pub track_count: usize,
    pub status: String,
}

impl PlayerStatus {
    fn of(controller: &PlaybackController) -> Self {
        Self {
            state: controller.state(),
            stream_id: controller.stream_id(),
            current_time: controller.current_time(),
            begin_time: controller.begin_time(),
            end_time: controller.end_time(),
            track_count: controller.track_count(),
            status: controller.status(),
        }
    }
}

struct Player {
    controller: PlaybackController,
    presenter: Arc<JsonPresenter>,
}

impl Player {
    fn new(id: u32, config: &PlaybackConfig, outbox: Outbox) -> Self {
        let presenter = Arc::new(JsonPresenter::new(id, outbox));
        let controller =
            PlaybackController::new(Box::new(FrameIndexSource::new()), config.clone());
        controller.add_subscriber(presenter.clone());
        Self {
            controller,
            presenter,
        }
    }

    /// Controller ready to open a stream; a failed one is replaced
    fn ready_controller(&mut self, config: &PlaybackConfig) -> &PlaybackController {
        if self.controller.state() == PlaybackState::Failed {
            debug!("Replacing failed playback controller");
            self.controller =
                PlaybackController::new(Box::new(FrameIndexSource::new()), config.clone());
            self.controller.add_subscriber(self.presenter.clone());
        }
        &self.controller
    }
}

pub struct ServerState {
    config: ServiceConfig,
    binder: ResultBinder,
    events: EventSender,
    outbox: Outbox,
    session: Option<QuerySession>,
    videos: BTreeMap<u32, FrameIndexSource>,
    next_video: u32,
    players: BTreeMap<u32, Player>,
    next_player: u32,
}

impl ServerState {
    pub fn new(config: ServiceConfig, events: EventSender, outbox: Outbox) -> Self {
        let archive = Arc::new(ClipArchive::from_providers(&config.video_providers));
        info!(clips = archive.len(), "Video archive ready");
        let binder = ResultBinder::new(
            archive,
            BinderConfig {
                frame_height: config.frame_height,
            },
        );

        Self {
            config,
            binder,
            events,
            outbox,
            session: None,
            videos: BTreeMap::new(),
            next_video: 0,
            players: BTreeMap::new(),
            next_player: 0,
        }
    }

    /// Route a transport event to the session it belongs to
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match &self.session {
            Some(session) => {
                session.handle_event(event);
            }
            None => debug!(token = event.token, "Dropping event without a session"),
        }
    }

    /// Advance every playing player
    pub fn tick(&mut self) {
        for (id, player) in &self.players {
            if player.controller.is_playing() {
                if let Err(e) = player.controller.tick() {
                    warn!(player = id, error = %e, "Playback tick failed");
                }
            }
        }
    }

    pub fn shut_down(&mut self) {
        if let Some(session) = &self.session {
            session.shut_down();
        }
        for player in self.players.values() {
            player.controller.stop();
        }
    }

    fn new_session(&self, uri: String) -> QuerySession {
        let complete = self.outbox.clone();
        let error = self.outbox.clone();
        let status = self.outbox.clone();
        let handlers = SessionHandlers::new()
            .on_complete(move |has_feedback_requests| {
                let _ = complete.send(json!({
                    "event": "query:complete",
                    "hasFeedbackRequests": has_feedback_requests,
                }));
            })
            .on_error(move |message| {
                let _ = error.send(json!({ "event": "query:error", "message": message }));
            })
            .on_status(move |message| {
                let _ = status.send(json!({ "event": "query:status", "message": message }));
            });

        let config = SessionConfig {
            desired_feedback_count: self.config.feedback.desired_count,
            implicit_feedback: self.config.feedback.implicit,
        };
        info!(%uri, "Opening query session");
        QuerySession::new(
            Arc::new(ArchiveQueryTransport::new(uri)),
            self.events.clone(),
            config,
            handlers,
        )
    }

    fn session(&self) -> Result<&QuerySession, CommandError> {
        self.session.as_ref().ok_or_else(|| {
            QueryError::SessionUnavailable("no query has been executed".to_string()).into()
        })
    }

    fn player(&self, id: u32) -> Result<&Player, CommandError> {
        self.players
            .get(&id)
            .ok_or_else(|| CommandError::not_found("Video player", id))
    }

    fn video(&self, id: u32) -> Result<&FrameIndexSource, CommandError> {
        self.videos
            .get(&id)
            .ok_or_else(|| CommandError::not_found("Video", id))
    }

    // query:*

    fn get_query_url(&mut self, _: ()) -> Result<String, CommandError> {
        Ok(self.config.query_url.clone().unwrap_or_default())
    }

    fn execute_query(&mut self, params: ExecuteParams) -> Result<bool, CommandError> {
        let uri = params
            .query_service_uri
            .or_else(|| self.config.query_url.clone())
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| CommandError::Failed("No query service configured".to_string()))?;

        let reuse = self
            .session
            .as_ref()
            .map_or(false, |session| session.query_url() == uri);
        if !reuse {
            if self.session.as_ref().map_or(false, QuerySession::is_executing) {
                return Err(QueryError::InvalidState {
                    operation: "execute",
                    state: SessionState::Executing.to_string(),
                }
                .into());
            }
            self.session = Some(self.new_session(uri));
        }

        self.session()?
            .execute(Plan::from(params.plan), params.working_set_size)?;
        Ok(true)
    }

    fn get_all_results(&mut self, _: ()) -> Result<ResultsSnapshot, CommandError> {
        Ok(self.session()?.results_and_feedback_requests())
    }

    fn shut_down_query(&mut self, _: ()) -> Result<(), CommandError> {
        if let Some(session) = &self.session {
            session.shut_down();
        }
        Ok(())
    }

    fn is_executing(&mut self, _: ()) -> Result<bool, CommandError> {
        Ok(self.session.as_ref().map_or(false, QuerySession::is_executing))
    }

    fn is_completed(&mut self, _: ()) -> Result<bool, CommandError> {
        Ok(self.session.as_ref().map_or(false, QuerySession::is_completed))
    }

    fn get_result_count(&mut self, _: ()) -> Result<usize, CommandError> {
        Ok(self.session.as_ref().map_or(0, QuerySession::result_count))
    }

    fn get_status(&mut self, _: ()) -> Result<String, CommandError> {
        Ok(self.session.as_ref().map(QuerySession::status).unwrap_or_default())
    }

    fn set_result_feedback(&mut self, params: FeedbackParams) -> Result<(), CommandError> {
        self.session()?
            .set_result_feedback(params.result_id, params.score)?;
        Ok(())
    }

    fn refine(&mut self, _: ()) -> Result<(), CommandError> {
        self.session()?.refine()?;
        Ok(())
    }

    fn cancel(&mut self, _: ()) -> Result<(), CommandError> {
        self.session()?.cancel()?;
        Ok(())
    }

    // video:*

    fn create_video(&mut self, params: CreateVideoParams) -> Result<u32, CommandError> {
        let source = FrameIndexSource::open_uri(&params.uri).map_err(|e| {
            CoreError::SourceUnavailable {
                stream: params.uri.clone(),
                reason: e.to_string(),
            }
        })?;
        self.next_video += 1;
        let id = self.next_video;
        self.videos.insert(id, source);
        info!(video = id, uri = %params.uri, "Created video");
        Ok(id)
    }

    fn get_frame(&mut self, params: FrameParams) -> Result<VideoFrame, CommandError> {
        let timestamp = params.position.timestamp("video:getFrame")?;
        let video = self.video(params.video_id)?;
        let frame = video
            .frame_at(&timestamp)
            .map_err(|e| CoreError::FrameUnavailable {
                timestamp,
                reason: format!("{:#}", e),
            })?;
        Ok(frame)
    }

    fn get_first_time(&mut self, params: VideoParams) -> Result<TimeStamp, CommandError> {
        Ok(self.video(params.video_id)?.min_time())
    }

    fn get_last_time(&mut self, params: VideoParams) -> Result<TimeStamp, CommandError> {
        Ok(self.video(params.video_id)?.max_time())
    }

    fn get_frame_count(&mut self, params: VideoParams) -> Result<usize, CommandError> {
        Ok(self.video(params.video_id)?.frame_count())
    }

    // videoPlayer:*

    fn create_player(&mut self, _: ()) -> Result<u32, CommandError> {
        self.next_player += 1;
        let id = self.next_player;
        let player = Player::new(id, &self.config.playback, self.outbox.clone());
        self.players.insert(id, player);
        info!(player = id, "Created video player");
        Ok(id)
    }

    fn set_video_stream(&mut self, params: StreamParams) -> Result<PlayerStatus, CommandError> {
        let stream_id = params
            .stream_id
            .filter(|s| !s.is_empty())
            .or_else(|| self.config.stream_id.clone())
            .ok_or_else(|| CommandError::Failed("No stream id given or configured".to_string()))?;

        let player = self
            .players
            .get_mut(&params.player_id)
            .ok_or_else(|| CommandError::not_found("Video player", params.player_id))?;
        let controller = player.ready_controller(&self.config.playback);
        controller.stop();
        controller.init(&stream_id)?;
        Ok(PlayerStatus::of(controller))
    }

    fn set_video_data(&mut self, params: VideoDataParams) -> Result<PlayerStatus, CommandError> {
        let result = self.session()?.result(params.result_id)?;
        let payload = serde_json::to_value(&result).map_err(|e| CommandError::Failed(e.to_string()))?;

        let player = self
            .players
            .get_mut(&params.player_id)
            .ok_or_else(|| CommandError::not_found("Video player", params.player_id))?;
        let controller = player.ready_controller(&self.config.playback);
        self.binder.bind_into(controller, &payload)?;
        Ok(PlayerStatus::of(controller))
    }

    fn play(&mut self, params: PlayerParams) -> Result<PlayerStatus, CommandError> {
        let controller = &self.player(params.player_id)?.controller;
        controller.play()?;
        Ok(PlayerStatus::of(controller))
    }

    fn stop(&mut self, params: PlayerParams) -> Result<PlayerStatus, CommandError> {
        let controller = &self.player(params.player_id)?.controller;
        controller.stop();
        Ok(PlayerStatus::of(controller))
    }

    fn seek(&mut self, params: SeekParams) -> Result<PlayerStatus, CommandError> {
        let timestamp = params.position.timestamp("videoPlayer:seek")?;
        let controller = &self.player(params.player_id)?.controller;
        controller.seek(timestamp)?;
        Ok(PlayerStatus::of(controller))
    }

    fn set_trails_visible(&mut self, params: TrailsParams) -> Result<(), CommandError> {
        self.player(params.player_id)?
            .controller
            .set_trails_visible(params.visible)?;
        Ok(())
    }

    fn load_tracks(&mut self, params: LoadTracksParams) -> Result<usize, CommandError> {
        let controller = &self.player(params.player_id)?.controller;
        let mut reader = SimpleCsvTrackReader::new();
        let tracks = reader
            .read_path(&params.path)
            .map_err(|e| CommandError::Failed(format!("{}: {}", params.path.display(), e)))?;

        // Rows are grouped by id, so only clashes with loaded tracks remain
        if let Some(id) = controller.with_tracks(|store| {
            tracks.iter().map(|t| t.id()).find(|id| store.contains(*id))
        }) {
            return Err(CoreError::DuplicateId(id).into());
        }

        let count = tracks.len();
        for mut track in tracks {
            controller.initialize_track(&mut track);
            controller.add_track(track)?;
        }
        if controller.state().is_ready() {
            controller.update()?;
        }
        Ok(count)
    }
}

/// Every command the service answers
pub fn command_table() -> CommandTable<ServerState> {
    let mut table = CommandTable::new();
    table
        .register("query:getQueryUrl", ServerState::get_query_url)
        .register("query:execute", ServerState::execute_query)
        .register("query:getAllResults", ServerState::get_all_results)
        .register("query:shutDown", ServerState::shut_down_query)
        .register("query:isExecuting", ServerState::is_executing)
        .register("query:isCompleted", ServerState::is_completed)
        .register("query:getResultCount", ServerState::get_result_count)
        .register("query:getStatus", ServerState::get_status)
        .register("query:setResultFeedback", ServerState::set_result_feedback)
        .register("query:refine", ServerState::refine)
        .register("query:cancel", ServerState::cancel)
        .register("video:create", ServerState::create_video)
        .register("video:getFrame", ServerState::get_frame)
        .register("video:getFirstTime", ServerState::get_first_time)
        .register("video:getLastTime", ServerState::get_last_time)
        .register("video:getFrameCount", ServerState::get_frame_count)
        .register("videoPlayer:create", ServerState::create_player)
        .register("videoPlayer:setVideoStream", ServerState::set_video_stream)
        .register("videoPlayer:setVideoData", ServerState::set_video_data)
        .register("videoPlayer:play", ServerState::play)
        .register("videoPlayer:stop", ServerState::stop)
        .register("videoPlayer:seek", ServerState::seek)
        .register("videoPlayer:setTrailsVisible", ServerState::set_trails_visible)
        .register("videoPlayer:loadTracks", ServerState::load_tracks);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use vv_query::{event_channel, EventReceiver};

    const PLAN: &str = "QueryPlan, 1;\nSIMILARITY;\nq1;\n[ color ];\n";

    fn write(path: &Path, text: &str) {
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    struct Fixture {
        dir: TempDir,
        table: CommandTable<ServerState>,
        state: ServerState,
        events: EventReceiver,
        outbox: mpsc::UnboundedReceiver<Value>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir(dir.path().join("s1")).unwrap();
            let mut index = String::from("frame,time,image\n");
            for n in 0..=10 {
                index.push_str(&format!("{},{},img{}.png\n", n, n * 100, n));
            }
            write(&dir.path().join("s1/index.csv"), &index);
            write(
                &dir.path().join("clips.csv"),
                "mission_id,stream_id,uri,first_time,last_time\n,stream-1,s1/index.csv,0,1000\n",
            );

            let results = json!([
                { "instanceId": 11, "relevancyScore": 0.4, "streamId": "stream-1",
                  "startTime": 100, "endTime": 600 },
                { "instanceId": 12, "relevancyScore": 0.9, "streamId": "stream-1",
                  "startTime": 200, "endTime": 500, "missionId": "",
                  "descriptors": [{ "descriptorName": "color", "regions": [
                      { "timeStamp": { "time": 200, "frame": 2 },
                        "imageRegion": { "top": 10, "left": 10, "bottom": 50, "right": 40 } },
                      { "timeStamp": { "time": 300, "frame": 3 },
                        "imageRegion": { "top": 12, "left": 12, "bottom": 52, "right": 42 } }
                  ]}] }
            ]);
            write(&dir.path().join("results.json"), &results.to_string());

            let config = ServiceConfig {
                video_providers: vec![dir.path().join("clips.csv")],
                query_url: Some(format!("file://{}", dir.path().join("results.json").display())),
                ..ServiceConfig::default()
            };
            let (event_tx, events) = event_channel();
            let (out_tx, outbox) = mpsc::unbounded_channel();
            Self {
                state: ServerState::new(config, event_tx, out_tx),
                table: command_table(),
                events,
                outbox,
                dir,
            }
        }

        fn call(&mut self, method: &str, params: Value) -> Result<Value, CommandError> {
            self.table.dispatch(&mut self.state, method, params)
        }

        async fn pump(&mut self) {
            while self.call("query:isExecuting", Value::Null).unwrap() == json!(true) {
                let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                    .await
                    .unwrap()
                    .unwrap();
                self.state.handle_transport_event(event);
            }
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut messages = Vec::new();
            while let Ok(message) = self.outbox.try_recv() {
                messages.push(message);
            }
            messages
        }
    }

    #[test]
    fn test_video_commands() {
        let mut fx = Fixture::new();
        let uri = format!("file://{}", fx.dir.path().join("s1/index.csv").display());
        let id = fx.call("video:create", json!({ "uri": uri })).unwrap();
        assert_eq!(id, json!(1));

        assert_eq!(fx.call("video:getFrameCount", json!({ "videoId": 1 })).unwrap(), json!(11));
        let first = fx.call("video:getFirstTime", json!({ "videoId": 1 })).unwrap();
        assert_eq!(first, json!({ "time": 0.0, "frame": 0 }));
        let frame = fx
            .call("video:getFrame", json!({ "videoId": 1, "time": 480 }))
            .unwrap();
        assert!(frame["image"].as_str().unwrap().ends_with("img5.png"));

        let err = fx.call("video:getFrameCount", json!({ "videoId": 9 })).unwrap_err();
        assert_eq!(err.code(), "notFound");
        let err = fx.call("video:getFrame", json!({ "videoId": 1 })).unwrap_err();
        assert_eq!(err.code(), "invalidParams");
        let err = fx.call("video:create", json!({ "uri": "/missing.csv" })).unwrap_err();
        assert_eq!(err.code(), "sourceUnavailable");
    }

    #[test]
    fn test_player_commands() {
        let mut fx = Fixture::new();
        assert_eq!(fx.call("videoPlayer:create", Value::Null).unwrap(), json!(1));

        let err = fx
            .call("videoPlayer:seek", json!({ "playerId": 2, "time": 5 }))
            .unwrap_err();
        assert_eq!(err.code(), "notFound");
        let err = fx.call("videoPlayer:setVideoStream", json!({ "playerId": 1 })).unwrap_err();
        assert_eq!(err.code(), "failed");

        let stream = fx.dir.path().join("s1/index.csv").display().to_string();
        let status = fx
            .call("videoPlayer:setVideoStream", json!({ "playerId": 1, "streamId": stream }))
            .unwrap();
        assert_eq!(status["state"], "Stopped");

        let status = fx
            .call("videoPlayer:seek", json!({ "playerId": 1, "time": 500 }))
            .unwrap();
        assert_eq!(status["currentTime"]["time"], 500.0);
        let frames: Vec<Value> = fx
            .drain()
            .into_iter()
            .filter(|m| m["event"] == "videoPlayer:frame")
            .collect();
        assert!(frames.last().unwrap()["frame"]["image"]
            .as_str()
            .unwrap()
            .ends_with("img5.png"));

        let tracks = fx.dir.path().join("tracks.csv");
        write(&tracks, "1,0,4,0,0,10,10\n1,0,6,2,0,12,10\n");
        let count = fx
            .call("videoPlayer:loadTracks", json!({ "playerId": 1, "path": tracks }))
            .unwrap();
        assert_eq!(count, json!(1));
        assert!(fx
            .drain()
            .iter()
            .any(|m| m["event"] == "videoPlayer:addTracks" && m["tracks"] == json!([1])));

        // A file reusing a loaded id adds nothing
        let clashing = fx.dir.path().join("clashing.csv");
        write(&clashing, "5,0,4,0,0,10,10\n1,0,5,0,0,10,10\n");
        let err = fx
            .call("videoPlayer:loadTracks", json!({ "playerId": 1, "path": clashing }))
            .unwrap_err();
        assert_eq!(err.code(), "duplicateId");
        let status = fx.call("videoPlayer:stop", json!({ "playerId": 1 })).unwrap();
        assert_eq!(status["trackCount"], 1);

        fx.call("videoPlayer:setTrailsVisible", json!({ "playerId": 1, "visible": false }))
            .unwrap();
        let status = fx.call("videoPlayer:stop", json!({ "playerId": 1 })).unwrap();
        assert_eq!(status["trackCount"], 1);
    }

    #[test]
    fn test_failed_stream_recovers_with_new_controller() {
        let mut fx = Fixture::new();
        fx.call("videoPlayer:create", Value::Null).unwrap();
        let err = fx
            .call("videoPlayer:setVideoStream", json!({ "playerId": 1, "streamId": "/nope.csv" }))
            .unwrap_err();
        assert_eq!(err.code(), "sourceUnavailable");

        let stream = fx.dir.path().join("s1/index.csv").display().to_string();
        let status = fx
            .call("videoPlayer:setVideoStream", json!({ "playerId": 1, "streamId": stream }))
            .unwrap();
        assert_eq!(status["state"], "Stopped");
    }

    #[tokio::test]
    async fn test_query_to_player() {
        let mut fx = Fixture::new();
        assert_eq!(fx.call("query:isExecuting", Value::Null).unwrap(), json!(false));
        assert_eq!(fx.call("query:getResultCount", Value::Null).unwrap(), json!(0));
        assert_eq!(
            fx.call("query:refine", Value::Null).unwrap_err().code(),
            "sessionUnavailable"
        );

        let executed = fx
            .call("query:execute", json!({ "plan": PLAN, "workingSetSize": 10 }))
            .unwrap();
        assert_eq!(executed, json!(true));
        let err = fx
            .call("query:execute", json!({ "plan": PLAN, "workingSetSize": 10 }))
            .unwrap_err();
        assert_eq!(err.code(), "invalidState");

        fx.pump().await;
        assert_eq!(fx.call("query:isCompleted", Value::Null).unwrap(), json!(true));
        assert_eq!(fx.call("query:getResultCount", Value::Null).unwrap(), json!(2));
        let all = fx.call("query:getAllResults", Value::Null).unwrap();
        assert_eq!(all["resultIds"], json!([12, 11]));
        assert!(fx.drain().iter().any(|m| m["event"] == "query:complete"));

        fx.call("videoPlayer:create", Value::Null).unwrap();
        let status = fx
            .call("videoPlayer:setVideoData", json!({ "playerId": 1, "resultId": 12 }))
            .unwrap();
        assert_eq!(status["trackCount"], 1);
        assert_eq!(status["beginTime"]["frame"], 2);

        let status = fx
            .call("videoPlayer:seek", json!({ "playerId": 1, "time": 300, "frame": 3 }))
            .unwrap();
        assert_eq!(status["status"], "");
        let messages = fx.drain();
        let frame = messages
            .iter()
            .rev()
            .find(|m| m["event"] == "videoPlayer:frame")
            .unwrap();
        assert_eq!(frame["tracks"][0]["id"], 1);

        let err = fx
            .call("videoPlayer:setVideoData", json!({ "playerId": 1, "resultId": 99 }))
            .unwrap_err();
        assert_eq!(err.code(), "notFound");

        fx.call("query:setResultFeedback", json!({ "resultId": 11, "score": 1 }))
            .unwrap();
        fx.call("query:refine", Value::Null).unwrap();
        fx.pump().await;
        assert_eq!(fx.call("query:getResultCount", Value::Null).unwrap(), json!(2));

        fx.call("query:shutDown", Value::Null).unwrap();
        assert_eq!(fx.call("query:getStatus", Value::Null).unwrap(), json!("Session closed"));
        assert_eq!(
            fx.call("query:cancel", Value::Null).unwrap_err().code(),
            "sessionClosed"
        );
    }
}
