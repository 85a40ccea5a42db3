use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::abr::{AbrReason, LevelPolicy, ThroughputPolicy, ThroughputSample};
use super::event::PlaybackEvent;
use super::fault::{EngineFault, FaultKind, RecoveryAction};
use super::manifest::parse_manifest;
use super::pipeline::{MediaPipeline, MediaSource, PipelineEvent, PlaybackMode};
use super::state::{LevelSelection, PlaybackPhase, PlaybackSessionState};
use crate::config::PlaybackConfig;
use crate::error::{ErrorKind, SessionError};
use crate::events::{EventHub, RecordedEvent};
use crate::transport::PlaybackApi;

const UNMUTE_DEFAULT_VOLUME: f64 = 0.5;

/// One in-progress Recovering episode.
#[derive(Debug, Clone, Copy)]
struct Recovery {
    attempts: u32,
    /// Phase to return to once the pipeline delivers data again.
    resume_phase: PlaybackPhase,
}

/// Adaptive playback of one piece of content.
///
/// The session is driven from a single task: user operations and
/// [`PipelineEvent`]s both go through `&mut self`, so no response can be
/// applied after [`close`](Self::close) or concurrently with another operation.
pub struct PlaybackSession {
    id: Uuid,
    content_id: String,
    config: PlaybackConfig,
    api: Arc<dyn PlaybackApi>,
    pipeline: Box<dyn MediaPipeline>,
    policy: Box<dyn LevelPolicy>,
    state: PlaybackSessionState,
    events: EventHub<PlaybackEvent>,
    recovery: Option<Recovery>,
    want_playing: bool,
    closed: bool,
}

impl PlaybackSession {
    pub fn new(
        content_id: impl Into<String>,
        config: PlaybackConfig,
        api: Arc<dyn PlaybackApi>,
        pipeline: Box<dyn MediaPipeline>,
    ) -> Self {
        let policy = Box::new(ThroughputPolicy::new(config.abr.clone()));
        Self {
            id: Uuid::new_v4(),
            content_id: content_id.into(),
            events: EventHub::new(config.event_limit),
            config,
            api,
            pipeline,
            policy,
            state: PlaybackSessionState::default(),
            recovery: None,
            want_playing: false,
            closed: false,
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn LevelPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn state(&self) -> &PlaybackSessionState {
        &self.state
    }

    pub fn snapshot(&self) -> PlaybackSessionState {
        self.state.clone()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn history(&self) -> Vec<RecordedEvent<PlaybackEvent>> {
        self.events.history()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Fetches the descriptor and manifest, attaches the pipeline, and reaches Ready
    /// (or Playing with autoplay).
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.closed || self.state.phase != PlaybackPhase::FetchingManifest {
            return Err(SessionError::invalid_state(format!(
                "cannot open a session that is {}",
                self.state.phase
            )));
        }

        info!(session_id = %self.id, content_id = %self.content_id, "Fetching playback descriptor");
        let fetched = self.api.fetch_descriptor(&self.content_id).await;
        let descriptor = match fetched {
            Ok(d) => d,
            Err(e) => return Err(self.enter_fatal(SessionError::from_transport(&e)).await),
        };
        self.state.thumbnail_url = descriptor.thumbnail_url.clone();
        self.set_phase(PlaybackPhase::Initializing);

        let source = MediaSource {
            manifest_url: descriptor.manifest_url.clone(),
            bearer_token: descriptor.playback_token.clone(),
            back_buffer: self.config.back_buffer_length,
        };
        let caps = self.pipeline.capabilities();

        let mode = if caps.adaptive {
            let body = self.load_manifest(&source).await?;
            let manifest = match parse_manifest(&source.manifest_url, &body) {
                Ok(m) => m,
                Err(e) => return Err(self.enter_fatal(SessionError::protocol(e.to_string())).await),
            };
            debug!(
                session_id = %self.id,
                levels = manifest.levels.len(),
                "Manifest parsed"
            );
            if let Some(duration) = manifest.duration_secs {
                self.state.duration_secs = duration;
            }
            self.state.levels = manifest.levels;
            self.events.emit(PlaybackEvent::LevelsAvailable {
                levels: self.state.levels.clone(),
            });
            PlaybackMode::Adaptive
        } else if caps.native_hls {
            warn!(session_id = %self.id, "Adaptive playback unsupported, falling back to direct playback");
            PlaybackMode::Direct
        } else {
            let error = SessionError::fatal("runtime supports neither adaptive nor direct HLS playback");
            return Err(self.enter_fatal(error).await);
        };
        self.state.mode = Some(mode);

        if let Err(fault) = self.pipeline.attach(&source, mode).await {
            let error = SessionError::new(fault_error_kind(fault.kind), fault.details);
            return Err(self.enter_fatal(error).await);
        }

        if mode == PlaybackMode::Adaptive {
            let decision = self.policy.choose(&self.state.levels, None, 0.0, Instant::now());
            self.switch_level(decision.target, AbrReason::Initial).await;
        }

        if let Err(fault) = self.pipeline.start_load(0.0).await {
            let error = SessionError::new(fault_error_kind(fault.kind), fault.details);
            return Err(self.enter_fatal(error).await);
        }

        self.state.muted = self.config.start_muted;
        self.pipeline
            .set_volume(self.state.volume, self.state.muted)
            .await;
        self.set_phase(PlaybackPhase::Ready);

        if self.config.autoplay {
            self.want_playing = true;
            self.pipeline.play().await;
            self.set_phase(PlaybackPhase::Playing);
        }
        info!(session_id = %self.id, ?mode, phase = %self.state.phase, "Playback session ready");
        Ok(())
    }

    /// Applies one notification from the media pipeline.
    ///
    /// Ignored once the session is closed or fatal, or before it is attached.
    pub async fn handle_event(&mut self, event: PipelineEvent) {
        if self.closed || !self.state.phase.is_attached() {
            debug!(session_id = %self.id, phase = %self.state.phase, ?event, "Ignoring pipeline event");
            return;
        }

        match event {
            PipelineEvent::MetadataLoaded { duration_secs } => {
                if duration_secs.is_finite() {
                    self.state.duration_secs = duration_secs.max(0.0);
                }
            }
            PipelineEvent::TimeUpdate {
                position_secs,
                buffered_ahead_secs,
            } => {
                self.state.position_secs = self.clamp_position(position_secs);
                self.state.buffered_ahead_secs = buffered_ahead_secs.max(0.0);
                self.update_buffering();
                self.emit_progress();
            }
            PipelineEvent::FragmentLoaded {
                level,
                bytes,
                elapsed,
                duration_secs,
            } => {
                debug!(session_id = %self.id, level, bytes, elapsed_ms = elapsed.as_millis(), duration_secs, "Fragment loaded");
                self.settle_recovery();
                self.policy.record_sample(ThroughputSample {
                    bytes,
                    duration: elapsed,
                });
                if self.state.selected_level == LevelSelection::Auto
                    && self.state.mode == Some(PlaybackMode::Adaptive)
                {
                    self.run_abr().await;
                }
            }
            PipelineEvent::LevelSwitched { level } => {
                if let LevelSelection::Fixed(pinned) = self.state.selected_level {
                    if level != pinned {
                        debug!(session_id = %self.id, level, pinned, "Engine left the pinned level, restoring it");
                        self.pipeline.set_level(pinned).await;
                        return;
                    }
                }
                if level < self.state.levels.len() && self.state.active_level != Some(level) {
                    self.events.emit(PlaybackEvent::LevelSwitched {
                        from: self.state.active_level,
                        to: level,
                        reason: AbrReason::Engine,
                    });
                    self.state.active_level = Some(level);
                }
            }
            PipelineEvent::Fault(fault) => self.handle_fault(fault).await,
            PipelineEvent::Ended => {
                self.settle_recovery();
                self.want_playing = false;
                self.state.position_secs = self.state.duration_secs;
                self.set_phase(PlaybackPhase::Paused);
            }
        }
    }

    pub async fn toggle_play(&mut self) -> Result<(), SessionError> {
        self.ensure_attached()?;
        if self.want_playing {
            self.pause().await
        } else {
            self.play().await
        }
    }

    pub async fn play(&mut self) -> Result<(), SessionError> {
        self.ensure_attached()?;
        self.want_playing = true;
        self.pipeline.play().await;
        self.apply_intent(PlaybackPhase::Playing);
        Ok(())
    }

    pub async fn pause(&mut self) -> Result<(), SessionError> {
        self.ensure_attached()?;
        self.want_playing = false;
        self.pipeline.pause().await;
        self.apply_intent(PlaybackPhase::Paused);
        Ok(())
    }

    /// `Auto` hands level choice to the policy; a fixed index pins the active level.
    pub async fn set_quality(&mut self, selection: LevelSelection) -> Result<(), SessionError> {
        self.ensure_attached()?;
        if self.state.mode != Some(PlaybackMode::Adaptive) || self.state.levels.is_empty() {
            return Err(SessionError::validation(
                "quality selection is unavailable in direct playback",
            ));
        }
        if let LevelSelection::Fixed(index) = selection {
            if index >= self.state.levels.len() {
                return Err(SessionError::validation(format!(
                    "level {index} out of range, {} levels available",
                    self.state.levels.len()
                )));
            }
        }

        self.state.selected_level = selection;
        self.events.emit(PlaybackEvent::QualitySelected { selection });
        info!(session_id = %self.id, %selection, "Quality selected");

        match selection {
            LevelSelection::Fixed(index) => {
                self.switch_level(index, AbrReason::ManualOverride).await;
            }
            LevelSelection::Auto => {
                self.policy.reset();
                self.run_abr().await;
            }
        }
        Ok(())
    }

    pub async fn seek(&mut self, target_secs: f64) -> Result<(), SessionError> {
        self.ensure_attached()?;
        if target_secs.is_nan() {
            return Err(SessionError::validation("seek target is not a number"));
        }
        let position = self.clamp_position(target_secs);
        self.pipeline.seek(position).await;
        self.state.position_secs = position;
        debug!(session_id = %self.id, requested = target_secs, position, "Seek");
        self.emit_progress();
        Ok(())
    }

    /// Clamps to `[0, 1]`; a volume of 0 mutes.
    pub async fn set_volume(&mut self, volume: f64) -> Result<(), SessionError> {
        self.ensure_attached()?;
        if volume.is_nan() {
            return Err(SessionError::validation("volume is not a number"));
        }
        let volume = volume.clamp(0.0, 1.0);
        self.state.volume = volume;
        self.state.muted = volume == 0.0;
        self.apply_volume().await;
        Ok(())
    }

    /// Unmuting a silent session restores a default volume.
    pub async fn toggle_mute(&mut self) -> Result<(), SessionError> {
        self.ensure_attached()?;
        if self.state.muted {
            self.state.muted = false;
            if self.state.volume <= 0.0 {
                self.state.volume = UNMUTE_DEFAULT_VOLUME;
            }
        } else {
            self.state.muted = true;
        }
        self.apply_volume().await;
        Ok(())
    }

    /// Tears the pipeline down. Later events and operations are ignored or rejected.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if !self.state.phase.is_fatal() {
            self.pipeline.destroy().await;
        }
        self.recovery = None;
        info!(session_id = %self.id, "Playback session closed");
    }

    /// Full restart: the only way out of FatalError.
    pub async fn restart(&mut self) -> Result<(), SessionError> {
        if !self.closed && !self.state.phase.is_fatal() {
            self.pipeline.destroy().await;
        }
        info!(session_id = %self.id, from = %self.state.phase, "Restarting playback session");
        let from = self.state.phase;
        self.state = PlaybackSessionState::default();
        if from != self.state.phase {
            self.events.emit(PlaybackEvent::PhaseChanged {
                from,
                to: self.state.phase,
            });
        }
        self.policy.reset();
        self.recovery = None;
        self.want_playing = false;
        self.closed = false;
        self.open().await
    }

    fn ensure_attached(&self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::invalid_state("session is closed"));
        }
        if !self.state.phase.is_attached() {
            return Err(SessionError::invalid_state(format!(
                "session is {}",
                self.state.phase
            )));
        }
        Ok(())
    }

    fn set_phase(&mut self, to: PlaybackPhase) {
        let from = self.state.phase;
        if from == to {
            return;
        }
        self.state.phase = to;
        debug!(session_id = %self.id, %from, %to, "Playback phase changed");
        self.events.emit(PlaybackEvent::PhaseChanged { from, to });
    }

    /// Moves to the user's intended phase, or records it for after recovery.
    fn apply_intent(&mut self, phase: PlaybackPhase) {
        if let Some(recovery) = self.recovery.as_mut() {
            recovery.resume_phase = phase;
            return;
        }
        if self.state.phase == PlaybackPhase::Buffering && phase == PlaybackPhase::Playing {
            return;
        }
        self.set_phase(phase);
    }

    fn clamp_position(&self, secs: f64) -> f64 {
        if secs.is_nan() {
            return self.state.position_secs;
        }
        let secs = secs.max(0.0);
        if self.state.duration_secs > 0.0 {
            secs.min(self.state.duration_secs)
        } else {
            secs
        }
    }

    fn update_buffering(&mut self) {
        let at_end = self.state.duration_secs > 0.0
            && self.state.position_secs >= self.state.duration_secs - self.config.low_buffer_secs;
        let buffered = self.state.buffered_ahead_secs;
        match self.state.phase {
            PlaybackPhase::Playing if buffered < self.config.low_buffer_secs && !at_end => {
                self.set_phase(PlaybackPhase::Buffering);
            }
            PlaybackPhase::Buffering if buffered >= self.config.resume_buffer_secs || at_end => {
                let phase = if self.want_playing {
                    PlaybackPhase::Playing
                } else {
                    PlaybackPhase::Paused
                };
                self.set_phase(phase);
            }
            _ => {}
        }
    }

    fn emit_progress(&self) {
        self.events.emit(PlaybackEvent::Progress {
            position_secs: self.state.position_secs,
            duration_secs: self.state.duration_secs,
            buffered_ahead_secs: self.state.buffered_ahead_secs,
        });
    }

    async fn apply_volume(&mut self) {
        self.pipeline
            .set_volume(self.state.volume, self.state.muted)
            .await;
        self.events.emit(PlaybackEvent::VolumeChanged {
            volume: self.state.volume,
            muted: self.state.muted,
        });
    }

    async fn run_abr(&mut self) {
        let decision = self.policy.choose(
            &self.state.levels,
            self.state.active_level,
            self.state.buffered_ahead_secs,
            Instant::now(),
        );
        if decision.changed {
            self.switch_level(decision.target, decision.reason).await;
        }
    }

    async fn switch_level(&mut self, target: usize, reason: AbrReason) {
        if target >= self.state.levels.len() || self.state.active_level == Some(target) {
            return;
        }
        let from = self.state.active_level;
        self.pipeline.set_level(target).await;
        self.state.active_level = Some(target);
        info!(
            session_id = %self.id,
            from = from.map_or(-1, |i| i as i64),
            to = target,
            ?reason,
            bitrate = self.state.levels[target].bitrate,
            "Level switched"
        );
        self.events.emit(PlaybackEvent::LevelSwitched {
            from,
            to: target,
            reason,
        });
    }

    async fn handle_fault(&mut self, fault: EngineFault) {
        let mut fault = fault;
        loop {
            let action = fault.recovery_action();
            match action {
                RecoveryAction::Ignore => {
                    debug!(session_id = %self.id, kind = %fault.kind, details = %fault.details, "Non-fatal engine fault");
                    return;
                }
                RecoveryAction::Terminate => {
                    let error = SessionError::new(fault_error_kind(fault.kind), fault.details);
                    self.enter_fatal(error).await;
                    return;
                }
                RecoveryAction::ReloadSource | RecoveryAction::RecoverMedia => {}
            }

            let attempts = match self.recovery.as_mut() {
                Some(recovery) => {
                    recovery.attempts += 1;
                    recovery.attempts
                }
                None => {
                    let resume_phase = match self.state.phase {
                        PlaybackPhase::Buffering if self.want_playing => PlaybackPhase::Playing,
                        PlaybackPhase::Buffering => PlaybackPhase::Paused,
                        phase => phase,
                    };
                    self.recovery = Some(Recovery {
                        attempts: 1,
                        resume_phase,
                    });
                    self.events.emit(PlaybackEvent::FaultDetected {
                        kind: fault.kind,
                        details: fault.details.clone(),
                    });
                    self.set_phase(PlaybackPhase::Recovering);
                    1
                }
            };
            self.state.last_fault = Some(fault.kind);

            if attempts > self.config.max_recovery_attempts {
                let error = SessionError::new(
                    fault_error_kind(fault.kind),
                    format!(
                        "{} persisted after {} recovery attempts: {}",
                        fault.kind, self.config.max_recovery_attempts, fault.details
                    ),
                );
                self.enter_fatal(error).await;
                return;
            }

            warn!(
                session_id = %self.id,
                kind = %fault.kind,
                attempt = attempts,
                ?action,
                position_secs = self.state.position_secs,
                details = %fault.details,
                "Recovering from engine fault"
            );
            let result = match action {
                RecoveryAction::ReloadSource => {
                    self.pipeline.start_load(self.state.position_secs).await
                }
                _ => self.pipeline.recover_media().await,
            };
            match result {
                Ok(()) => return,
                Err(next) => fault = next,
            }
        }
    }

    /// Fetches the manifest, reloading it through a Recovering episode while
    /// failures are transient.
    async fn load_manifest(&mut self, source: &MediaSource) -> Result<String, SessionError> {
        let mut attempts = 0u32;
        loop {
            let fetched = self
                .api
                .fetch_manifest(&source.manifest_url, &source.bearer_token)
                .await;
            let e = match fetched {
                Ok(body) => {
                    if attempts > 0 {
                        self.state.last_fault = None;
                        info!(session_id = %self.id, attempts, "Manifest reload succeeded");
                        self.events.emit(PlaybackEvent::Recovered);
                        self.set_phase(PlaybackPhase::Initializing);
                    }
                    return Ok(body);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(self.enter_fatal(SessionError::from_transport(&e)).await),
            };

            attempts += 1;
            if attempts == 1 {
                self.events.emit(PlaybackEvent::FaultDetected {
                    kind: FaultKind::Network,
                    details: e.to_string(),
                });
                self.set_phase(PlaybackPhase::Recovering);
            }
            self.state.last_fault = Some(FaultKind::Network);

            if attempts > self.config.max_recovery_attempts {
                let mut error = SessionError::from_transport(&e);
                error.message = format!(
                    "manifest unavailable after {} reloads: {}",
                    self.config.max_recovery_attempts, error.message
                );
                return Err(self.enter_fatal(error).await);
            }
            warn!(
                session_id = %self.id,
                attempt = attempts,
                error = %e,
                "Manifest fetch failed, reloading"
            );
            tokio::time::sleep(self.config.retry_backoff).await;
        }
    }

    /// Ends the current Recovering episode once the pipeline loads a fragment again.
    /// Time updates alone can come from data buffered before the fault.
    fn settle_recovery(&mut self) {
        let Some(recovery) = self.recovery.take() else {
            return;
        };
        self.state.last_fault = None;
        info!(session_id = %self.id, attempts = recovery.attempts, "Recovered from engine fault");
        self.events.emit(PlaybackEvent::Recovered);
        self.set_phase(recovery.resume_phase);
    }

    /// Terminal: tears down the pipeline, emits the single Fatal event, returns the error.
    async fn enter_fatal(&mut self, error: SessionError) -> SessionError {
        if self.state.phase.is_fatal() {
            return error;
        }
        warn!(session_id = %self.id, kind = %error.kind, error = %error.message, "Playback session failed");
        self.recovery = None;
        self.want_playing = false;
        if self.state.mode.is_some() {
            self.pipeline.destroy().await;
        }
        self.set_phase(PlaybackPhase::FatalError);
        self.events.emit(PlaybackEvent::Fatal {
            error: error.clone(),
        });
        error
    }
}

fn fault_error_kind(kind: FaultKind) -> ErrorKind {
    match kind {
        FaultKind::Network => ErrorKind::Network,
        FaultKind::Media => ErrorKind::Media,
        FaultKind::Other => ErrorKind::Fatal,
    }
}
