use std::fmt;

use serde::{Deserialize, Serialize};

use super::fault::FaultKind;
use super::manifest::QualityLevel;
use super::pipeline::PlaybackMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    FetchingManifest,
    Initializing,
    Ready,
    Playing,
    Paused,
    Buffering,
    Recovering,
    FatalError,
}

impl PlaybackPhase {
    pub fn is_fatal(self) -> bool {
        self == PlaybackPhase::FatalError
    }

    /// Phases in which the media pipeline is attached and user operations apply.
    pub fn is_attached(self) -> bool {
        matches!(
            self,
            PlaybackPhase::Ready
                | PlaybackPhase::Playing
                | PlaybackPhase::Paused
                | PlaybackPhase::Buffering
                | PlaybackPhase::Recovering
        )
    }
}

impl fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackPhase::FetchingManifest => "fetching_manifest",
            PlaybackPhase::Initializing => "initializing",
            PlaybackPhase::Ready => "ready",
            PlaybackPhase::Playing => "playing",
            PlaybackPhase::Paused => "paused",
            PlaybackPhase::Buffering => "buffering",
            PlaybackPhase::Recovering => "recovering",
            PlaybackPhase::FatalError => "fatal_error",
        };
        f.write_str(s)
    }
}

/// Requested quality: engine-chosen or pinned to a level index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSelection {
    #[default]
    Auto,
    Fixed(usize),
}

impl fmt::Display for LevelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelSelection::Auto => f.write_str("auto"),
            LevelSelection::Fixed(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSessionState {
    pub phase: PlaybackPhase,
    pub selected_level: LevelSelection,
    /// `None` until a level is playing (and always in direct mode).
    pub active_level: Option<usize>,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub buffered_ahead_secs: f64,
    pub volume: f64,
    pub muted: bool,
    pub last_fault: Option<FaultKind>,
    pub thumbnail_url: Option<String>,
    pub mode: Option<PlaybackMode>,
    pub levels: Vec<QualityLevel>,
}

impl Default for PlaybackSessionState {
    fn default() -> Self {
        Self {
            phase: PlaybackPhase::FetchingManifest,
            selected_level: LevelSelection::Auto,
            active_level: None,
            position_secs: 0.0,
            duration_secs: 0.0,
            buffered_ahead_secs: 0.0,
            volume: 1.0,
            muted: false,
            last_fault: None,
            thumbnail_url: None,
            mode: None,
            levels: Vec::new(),
        }
    }
}

impl PlaybackSessionState {
    /// Active level as a signed index, `-1` when none is playing.
    pub fn active_level_index(&self) -> i64 {
        self.active_level.map_or(-1, |i| i as i64)
    }

    pub fn active_quality(&self) -> Option<&QualityLevel> {
        self.active_level.and_then(|i| self.levels.get(i))
    }
}
