use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vod_core::{
    Capabilities, EngineFault, ErrorKind, FaultKind, LevelSelection, MediaPipeline, MediaSource,
    PipelineEvent, PlaybackApi, PlaybackConfig, PlaybackDescriptor, PlaybackEvent, PlaybackMode,
    PlaybackPhase, PlaybackSession, TransportError,
};

const MANIFEST_URL: &str = "https://cdn.example.com/v/abc/master.m3u8";
const TOKEN: &str = "playback-token-1";

const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080,CODECS=\"avc1.640028,mp4a.40.2\"
1080p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401e,mp4a.40.2\"
360p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\"
720p/index.m3u8
";

#[derive(Default)]
struct FakeApi {
    descriptor_status: Option<u16>,
    manifest_body: Option<&'static str>,
    descriptor_calls: AtomicUsize,
    manifest_tokens: Mutex<Vec<String>>,
    /// Manifest requests still to answer with 503 before serving the body.
    manifest_outages: AtomicUsize,
}

impl FakeApi {
    fn serving(body: &'static str) -> Self {
        Self {
            manifest_body: Some(body),
            ..Self::default()
        }
    }

    fn flaky(body: &'static str, outages: usize) -> Self {
        Self {
            manifest_body: Some(body),
            manifest_outages: AtomicUsize::new(outages),
            ..Self::default()
        }
    }

    fn failing(status: u16) -> Self {
        Self {
            descriptor_status: Some(status),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PlaybackApi for FakeApi {
    async fn fetch_descriptor(
        &self,
        content_id: &str,
    ) -> Result<PlaybackDescriptor, TransportError> {
        self.descriptor_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.descriptor_status {
            return Err(TransportError::Http {
                url: format!("https://api.example.com/media/playback?videoId={content_id}"),
                status,
                message: String::new(),
            });
        }
        Ok(PlaybackDescriptor {
            manifest_url: MANIFEST_URL.into(),
            thumbnail_url: Some("https://cdn.example.com/v/abc/thumb.jpg".into()),
            playback_token: TOKEN.into(),
        })
    }

    async fn fetch_manifest(
        &self,
        url: &str,
        playback_token: &str,
    ) -> Result<String, TransportError> {
        self.manifest_tokens
            .lock()
            .unwrap()
            .push(playback_token.to_string());
        let outage = self
            .manifest_outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if outage {
            return Err(TransportError::Http {
                url: url.into(),
                status: 503,
                message: "upstream unavailable".into(),
            });
        }
        match self.manifest_body {
            Some(body) => Ok(body.to_string()),
            None => Err(TransportError::Http {
                url: url.into(),
                status: 404,
                message: String::new(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Attach(PlaybackMode, String),
    StartLoad(f64),
    RecoverMedia,
    SetLevel(usize),
    Play,
    Pause,
    Seek(f64),
    SetVolume(f64, bool),
    Destroy,
}

type CallLog = Arc<Mutex<Vec<Call>>>;

struct FakePipeline {
    caps: Capabilities,
    calls: CallLog,
    /// Outcomes of successive recover_media calls; empty means success.
    recover_results: VecDeque<Result<(), EngineFault>>,
}

impl FakePipeline {
    fn new(calls: &CallLog) -> Self {
        Self {
            caps: Capabilities {
                adaptive: true,
                native_hls: false,
            },
            calls: calls.clone(),
            recover_results: VecDeque::new(),
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaPipeline for FakePipeline {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn attach(&mut self, source: &MediaSource, mode: PlaybackMode) -> Result<(), EngineFault> {
        self.record(Call::Attach(mode, source.bearer_token.clone()));
        Ok(())
    }

    async fn start_load(&mut self, position_secs: f64) -> Result<(), EngineFault> {
        self.record(Call::StartLoad(position_secs));
        Ok(())
    }

    async fn recover_media(&mut self) -> Result<(), EngineFault> {
        self.record(Call::RecoverMedia);
        self.recover_results.pop_front().unwrap_or(Ok(()))
    }

    async fn set_level(&mut self, index: usize) {
        self.record(Call::SetLevel(index));
    }

    async fn play(&mut self) {
        self.record(Call::Play);
    }

    async fn pause(&mut self) {
        self.record(Call::Pause);
    }

    async fn seek(&mut self, position_secs: f64) {
        self.record(Call::Seek(position_secs));
    }

    async fn set_volume(&mut self, volume: f64, muted: bool) {
        self.record(Call::SetVolume(volume, muted));
    }

    async fn destroy(&mut self) {
        self.record(Call::Destroy);
    }
}

fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

fn session_with(api: FakeApi, pipeline: FakePipeline, config: PlaybackConfig) -> PlaybackSession {
    PlaybackSession::new("abc", config, Arc::new(api), Box::new(pipeline))
}

async fn playing_session() -> (PlaybackSession, CallLog) {
    let log = CallLog::default();
    let mut session = session_with(
        FakeApi::serving(MASTER),
        FakePipeline::new(&log),
        PlaybackConfig::default(),
    );
    session.open().await.unwrap();
    (session, log)
}

fn time(position_secs: f64, buffered_ahead_secs: f64) -> PipelineEvent {
    PipelineEvent::TimeUpdate {
        position_secs,
        buffered_ahead_secs,
    }
}

fn fragment(level: usize, megabits_per_sec: u64) -> PipelineEvent {
    PipelineEvent::FragmentLoaded {
        level,
        bytes: megabits_per_sec * 125_000,
        elapsed: Duration::from_secs(1),
        duration_secs: 4.0,
    }
}

fn count<F: Fn(&PlaybackEvent) -> bool>(session: &PlaybackSession, pred: F) -> usize {
    session.history().iter().filter(|r| pred(&r.event)).count()
}

fn phases(session: &PlaybackSession) -> Vec<PlaybackPhase> {
    session
        .history()
        .into_iter()
        .filter_map(|r| match r.event {
            PlaybackEvent::PhaseChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn open_attaches_lowest_level_and_autoplays_muted() {
    let (session, log) = playing_session().await;
    let state = session.state();

    assert_eq!(state.phase, PlaybackPhase::Playing);
    assert_eq!(state.mode, Some(PlaybackMode::Adaptive));
    assert_eq!(state.active_level, Some(0));
    assert!(state.muted);
    assert_eq!(
        state.thumbnail_url.as_deref(),
        Some("https://cdn.example.com/v/abc/thumb.jpg")
    );

    let bitrates: Vec<u64> = state.levels.iter().map(|l| l.bitrate).collect();
    assert_eq!(bitrates, vec![800_000, 2_800_000, 5_000_000]);
    assert_eq!(state.levels[0].name, "360p");
    assert_eq!(
        state.levels[2].uri,
        "https://cdn.example.com/v/abc/1080p/index.m3u8"
    );

    assert_eq!(
        calls(&log),
        vec![
            Call::Attach(PlaybackMode::Adaptive, TOKEN.into()),
            Call::SetLevel(0),
            Call::StartLoad(0.0),
            Call::SetVolume(1.0, true),
            Call::Play,
        ]
    );
    assert_eq!(
        phases(&session),
        vec![
            PlaybackPhase::Initializing,
            PlaybackPhase::Ready,
            PlaybackPhase::Playing
        ]
    );
    assert_eq!(
        count(&session, |e| matches!(e, PlaybackEvent::LevelsAvailable { .. })),
        1
    );
}

#[tokio::test]
async fn manifest_is_fetched_with_playback_token() {
    let api = Arc::new(FakeApi::serving(MASTER));
    let log = CallLog::default();
    let mut session = PlaybackSession::new(
        "abc",
        PlaybackConfig::default(),
        api.clone(),
        Box::new(FakePipeline::new(&log)),
    );
    session.open().await.unwrap();

    assert_eq!(api.descriptor_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*api.manifest_tokens.lock().unwrap(), vec![TOKEN.to_string()]);
}

#[tokio::test]
async fn without_autoplay_session_waits_in_ready() {
    let log = CallLog::default();
    let mut session = session_with(
        FakeApi::serving(MASTER),
        FakePipeline::new(&log),
        PlaybackConfig::default().with_autoplay(false),
    );
    session.open().await.unwrap();
    assert_eq!(session.state().phase, PlaybackPhase::Ready);
    assert!(!calls(&log).contains(&Call::Play));

    session.toggle_play().await.unwrap();
    assert_eq!(session.state().phase, PlaybackPhase::Playing);
    session.toggle_play().await.unwrap();
    assert_eq!(session.state().phase, PlaybackPhase::Paused);
    assert!(calls(&log).ends_with(&[Call::Play, Call::Pause]));
}

#[tokio::test]
async fn descriptor_failures_are_fatal_before_attach() {
    for (status, kind) in [(401, ErrorKind::Auth), (404, ErrorKind::NotFound)] {
        let log = CallLog::default();
        let mut session = session_with(
            FakeApi::failing(status),
            FakePipeline::new(&log),
            PlaybackConfig::default(),
        );

        let err = session.open().await.unwrap_err();
        assert_eq!(err.kind, kind);
        assert_eq!(err.status_code, Some(status));
        assert_eq!(session.state().phase, PlaybackPhase::FatalError);
        assert!(calls(&log).is_empty());
        assert_eq!(
            count(&session, |e| matches!(e, PlaybackEvent::Fatal { .. })),
            1
        );
    }
}

#[tokio::test]
async fn unparseable_manifest_is_fatal() {
    let log = CallLog::default();
    let mut session = session_with(
        FakeApi::serving("this is not a playlist"),
        FakePipeline::new(&log),
        PlaybackConfig::default(),
    );

    let err = session.open().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Protocol);
    assert_eq!(session.state().phase, PlaybackPhase::FatalError);
}

#[tokio::test(start_paused = true)]
async fn transient_manifest_failure_is_reloaded() {
    let log = CallLog::default();
    let api = Arc::new(FakeApi::flaky(MASTER, 1));
    let mut session = PlaybackSession::new(
        "abc",
        PlaybackConfig::default(),
        api.clone(),
        Box::new(FakePipeline::new(&log)),
    );

    session.open().await.unwrap();

    let state = session.state();
    assert_eq!(state.phase, PlaybackPhase::Playing);
    assert_eq!(state.levels.len(), 3);
    assert!(state.last_fault.is_none());
    assert_eq!(api.manifest_tokens.lock().unwrap().len(), 2);
    assert_eq!(
        phases(&session),
        vec![
            PlaybackPhase::Initializing,
            PlaybackPhase::Recovering,
            PlaybackPhase::Initializing,
            PlaybackPhase::Ready,
            PlaybackPhase::Playing,
        ]
    );
    assert_eq!(
        count(&session, |e| matches!(
            e,
            PlaybackEvent::FaultDetected {
                kind: FaultKind::Network,
                ..
            }
        )),
        1
    );
    assert_eq!(count(&session, |e| matches!(e, PlaybackEvent::Recovered)), 1);
    assert_eq!(count(&session, |e| matches!(e, PlaybackEvent::Fatal { .. })), 0);
}

#[tokio::test(start_paused = true)]
async fn manifest_outage_is_fatal_after_reload_limit() {
    let log = CallLog::default();
    let api = Arc::new(FakeApi::flaky(MASTER, 10));
    let mut session = PlaybackSession::new(
        "abc",
        PlaybackConfig::default().with_max_recovery_attempts(2),
        api.clone(),
        Box::new(FakePipeline::new(&log)),
    );

    let err = session.open().await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Network);
    assert_eq!(session.state().phase, PlaybackPhase::FatalError);
    assert_eq!(api.manifest_tokens.lock().unwrap().len(), 3);
    assert!(calls(&log).is_empty());
    assert_eq!(count(&session, |e| matches!(e, PlaybackEvent::Fatal { .. })), 1);
}

#[tokio::test]
async fn missing_manifest_is_fatal_without_reload() {
    let log = CallLog::default();
    let api = Arc::new(FakeApi::default());
    let mut session = PlaybackSession::new(
        "abc",
        PlaybackConfig::default(),
        api.clone(),
        Box::new(FakePipeline::new(&log)),
    );

    let err = session.open().await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(api.manifest_tokens.lock().unwrap().len(), 1);
    assert_eq!(
        count(&session, |e| matches!(e, PlaybackEvent::FaultDetected { .. })),
        0
    );
}

#[tokio::test]
async fn network_fault_reloads_from_current_position() {
    let (mut session, log) = playing_session().await;
    session.handle_event(time(42.0, 10.0)).await;

    session
        .handle_event(PipelineEvent::Fault(EngineFault::network("fragment load timeout")))
        .await;
    assert_eq!(session.state().phase, PlaybackPhase::Recovering);
    assert_eq!(calls(&log).last(), Some(&Call::StartLoad(42.0)));

    session.handle_event(time(42.5, 8.0)).await;
    assert_eq!(session.state().phase, PlaybackPhase::Recovering);

    session.handle_event(fragment(0, 2)).await;
    let state = session.state();
    assert_eq!(state.phase, PlaybackPhase::Playing);
    assert_eq!(state.position_secs, 42.5);
    assert!(state.last_fault.is_none());

    assert_eq!(
        count(&session, |e| matches!(e, PlaybackEvent::FaultDetected { .. })),
        1
    );
    assert_eq!(count(&session, |e| matches!(e, PlaybackEvent::Recovered)), 1);
    assert!(!calls(&log).contains(&Call::Destroy));
}

#[tokio::test]
async fn media_fault_recovers_in_place() {
    let (mut session, log) = playing_session().await;
    session.handle_event(time(12.0, 6.0)).await;

    session
        .handle_event(PipelineEvent::Fault(EngineFault::media("buffer append error")))
        .await;
    assert_eq!(calls(&log).last(), Some(&Call::RecoverMedia));
    assert_eq!(session.state().phase, PlaybackPhase::Recovering);

    session.handle_event(fragment(0, 2)).await;
    assert_eq!(session.state().phase, PlaybackPhase::Playing);
}

#[tokio::test]
async fn repeated_faults_share_one_recovery_episode_until_exhausted() {
    let log = CallLog::default();
    let mut session = session_with(
        FakeApi::serving(MASTER),
        FakePipeline::new(&log),
        PlaybackConfig::default().with_max_recovery_attempts(2),
    );
    session.open().await.unwrap();

    session
        .handle_event(PipelineEvent::Fault(EngineFault::network("a")))
        .await;
    session
        .handle_event(PipelineEvent::Fault(EngineFault::network("b")))
        .await;
    assert_eq!(session.state().phase, PlaybackPhase::Recovering);
    assert_eq!(
        count(&session, |e| matches!(e, PlaybackEvent::FaultDetected { .. })),
        1
    );

    session
        .handle_event(PipelineEvent::Fault(EngineFault::network("c")))
        .await;
    assert_eq!(session.state().phase, PlaybackPhase::FatalError);
    assert_eq!(calls(&log).last(), Some(&Call::Destroy));
}

#[tokio::test]
async fn failing_media_recovery_escalates_to_fatal() {
    let log = CallLog::default();
    let mut pipeline = FakePipeline::new(&log);
    pipeline
        .recover_results
        .push_back(Err(EngineFault::other("decoder unavailable")));
    let mut session = session_with(FakeApi::serving(MASTER), pipeline, PlaybackConfig::default());
    session.open().await.unwrap();

    session
        .handle_event(PipelineEvent::Fault(EngineFault::media("decode error")))
        .await;

    assert_eq!(session.state().phase, PlaybackPhase::FatalError);
    let fatal: Vec<ErrorKind> = session
        .history()
        .into_iter()
        .filter_map(|r| match r.event {
            PlaybackEvent::Fatal { error } => Some(error.kind),
            _ => None,
        })
        .collect();
    assert_eq!(fatal, vec![ErrorKind::Fatal]);
}

#[tokio::test]
async fn unrecoverable_fault_stops_all_pipeline_traffic() {
    let (mut session, log) = playing_session().await;

    session
        .handle_event(PipelineEvent::Fault(EngineFault::other("internal exception")))
        .await;
    assert_eq!(session.state().phase, PlaybackPhase::FatalError);
    let after_fatal = calls(&log).len();
    assert_eq!(calls(&log).last(), Some(&Call::Destroy));

    session.handle_event(time(5.0, 5.0)).await;
    session.handle_event(fragment(0, 16)).await;
    session
        .handle_event(PipelineEvent::Fault(EngineFault::network("late")))
        .await;
    assert_eq!(
        session.set_quality(LevelSelection::Fixed(1)).await.unwrap_err().kind,
        ErrorKind::InvalidState
    );
    assert_eq!(session.play().await.unwrap_err().kind, ErrorKind::InvalidState);
    session.close().await;

    assert_eq!(calls(&log).len(), after_fatal);
    assert_eq!(session.state().phase, PlaybackPhase::FatalError);
    assert_eq!(
        count(&session, |e| matches!(e, PlaybackEvent::Fatal { .. })),
        1
    );
}

#[tokio::test]
async fn non_fatal_faults_leave_playback_alone() {
    let (mut session, log) = playing_session().await;
    let before = calls(&log).len();

    session
        .handle_event(PipelineEvent::Fault(EngineFault::network("retrying").non_fatal()))
        .await;

    assert_eq!(session.state().phase, PlaybackPhase::Playing);
    assert_eq!(calls(&log).len(), before);
}

#[tokio::test]
async fn starved_buffer_enters_and_leaves_buffering() {
    let (mut session, _log) = playing_session().await;
    session
        .handle_event(PipelineEvent::MetadataLoaded { duration_secs: 600.0 })
        .await;

    session.handle_event(time(30.0, 0.1)).await;
    assert_eq!(session.state().phase, PlaybackPhase::Buffering);
    session.handle_event(time(30.0, 1.0)).await;
    assert_eq!(session.state().phase, PlaybackPhase::Buffering);
    session.handle_event(time(30.2, 3.0)).await;
    assert_eq!(session.state().phase, PlaybackPhase::Playing);
}

#[tokio::test]
async fn throughput_drop_steps_down_without_moving_playhead() {
    let (mut session, log) = playing_session().await;
    session.handle_event(time(30.0, 12.0)).await;

    session.handle_event(fragment(0, 16)).await;
    assert_eq!(session.state().active_level, Some(2));
    assert_eq!(calls(&log).last(), Some(&Call::SetLevel(2)));

    session.handle_event(time(31.0, 3.0)).await;
    session.handle_event(fragment(2, 1)).await;

    let state = session.state();
    assert!(state.active_level.is_some_and(|l| l < 2));
    assert_eq!(state.position_secs, 31.0);
    assert_eq!(state.phase, PlaybackPhase::Playing);
    assert!(!calls(&log).iter().any(|c| matches!(c, Call::Seek(_))));
}

#[tokio::test]
async fn fixed_quality_pins_level_until_auto() {
    let (mut session, log) = playing_session().await;
    session.handle_event(time(10.0, 12.0)).await;

    session.set_quality(LevelSelection::Fixed(1)).await.unwrap();
    assert_eq!(session.state().active_level, Some(1));
    assert_eq!(session.state().selected_level, LevelSelection::Fixed(1));

    session.handle_event(fragment(1, 16)).await;
    assert_eq!(session.state().active_level, Some(1));
    assert_eq!(calls(&log).last(), Some(&Call::SetLevel(1)));

    session
        .handle_event(PipelineEvent::LevelSwitched { level: 0 })
        .await;
    assert_eq!(session.state().active_level, Some(1));
    assert_eq!(session.state().selected_level, LevelSelection::Fixed(1));
    assert_eq!(calls(&log).last(), Some(&Call::SetLevel(1)));

    session.set_quality(LevelSelection::Auto).await.unwrap();
    assert_eq!(session.state().active_level, Some(2));

    assert_eq!(
        session.set_quality(LevelSelection::Fixed(3)).await.unwrap_err().kind,
        ErrorKind::Validation
    );
}

#[tokio::test]
async fn seek_is_clamped_to_known_duration() {
    let (mut session, log) = playing_session().await;
    session
        .handle_event(PipelineEvent::MetadataLoaded { duration_secs: 120.0 })
        .await;

    session.seek(500.0).await.unwrap();
    assert_eq!(session.state().position_secs, 120.0);
    session.seek(-3.0).await.unwrap();
    assert_eq!(session.state().position_secs, 0.0);
    assert!(session.seek(f64::NAN).await.is_err());

    assert!(calls(&log).ends_with(&[Call::Seek(120.0), Call::Seek(0.0)]));
}

#[tokio::test]
async fn volume_is_clamped_and_mute_toggles() {
    let (mut session, _log) = playing_session().await;

    session.set_volume(1.7).await.unwrap();
    assert_eq!(session.state().volume, 1.0);
    assert!(!session.state().muted);

    session.set_volume(0.0).await.unwrap();
    assert!(session.state().muted);

    session.toggle_mute().await.unwrap();
    assert!(!session.state().muted);
    assert_eq!(session.state().volume, 0.5);

    session.toggle_mute().await.unwrap();
    assert!(session.state().muted);
    assert_eq!(session.state().volume, 0.5);
}

#[tokio::test]
async fn direct_playback_when_adaptive_is_unsupported() {
    let api = Arc::new(FakeApi::serving(MASTER));
    let log = CallLog::default();
    let mut pipeline = FakePipeline::new(&log);
    pipeline.caps = Capabilities {
        adaptive: false,
        native_hls: true,
    };
    let mut session =
        PlaybackSession::new("abc", PlaybackConfig::default(), api.clone(), Box::new(pipeline));
    session.open().await.unwrap();

    let state = session.state();
    assert_eq!(state.mode, Some(PlaybackMode::Direct));
    assert_eq!(state.phase, PlaybackPhase::Playing);
    assert!(state.levels.is_empty());
    assert_eq!(state.active_level_index(), -1);
    assert!(api.manifest_tokens.lock().unwrap().is_empty());
    assert_eq!(
        calls(&log).first(),
        Some(&Call::Attach(PlaybackMode::Direct, TOKEN.into()))
    );
    assert_eq!(
        session.set_quality(LevelSelection::Fixed(0)).await.unwrap_err().kind,
        ErrorKind::Validation
    );
}

#[tokio::test]
async fn no_playback_support_is_fatal() {
    let log = CallLog::default();
    let mut pipeline = FakePipeline::new(&log);
    pipeline.caps = Capabilities {
        adaptive: false,
        native_hls: false,
    };
    let mut session = session_with(FakeApi::serving(MASTER), pipeline, PlaybackConfig::default());

    assert_eq!(session.open().await.unwrap_err().kind, ErrorKind::Fatal);
    assert_eq!(session.state().phase, PlaybackPhase::FatalError);
    assert!(calls(&log).is_empty());
}

#[tokio::test]
async fn ended_pauses_at_duration() {
    let (mut session, _log) = playing_session().await;
    session
        .handle_event(PipelineEvent::MetadataLoaded { duration_secs: 60.0 })
        .await;
    session.handle_event(PipelineEvent::Ended).await;

    assert_eq!(session.state().phase, PlaybackPhase::Paused);
    assert_eq!(session.state().position_secs, 60.0);
}

#[tokio::test]
async fn close_ignores_late_events() {
    let (mut session, log) = playing_session().await;
    session.close().await;
    assert!(session.is_closed());
    assert_eq!(calls(&log).last(), Some(&Call::Destroy));

    let before = session.history().len();
    session.handle_event(time(3.0, 3.0)).await;
    assert_eq!(session.history().len(), before);
    assert_eq!(session.seek(1.0).await.unwrap_err().kind, ErrorKind::InvalidState);
}

#[tokio::test]
async fn restart_leaves_fatal_error() {
    let (mut session, log) = playing_session().await;
    session
        .handle_event(PipelineEvent::Fault(EngineFault::other("boom")))
        .await;
    assert_eq!(session.state().phase, PlaybackPhase::FatalError);

    session.restart().await.unwrap();
    assert_eq!(session.state().phase, PlaybackPhase::Playing);
    assert_eq!(session.state().active_level, Some(0));
    let attaches = calls(&log)
        .iter()
        .filter(|c| matches!(c, Call::Attach(..)))
        .count();
    assert_eq!(attaches, 2);
}
