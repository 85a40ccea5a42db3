use serde::Serialize;

use super::abr::AbrReason;
use super::fault::FaultKind;
use super::manifest::QualityLevel;
use super::state::{LevelSelection, PlaybackPhase};
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    PhaseChanged {
        from: PlaybackPhase,
        to: PlaybackPhase,
    },
    /// Emitted once per session, after the manifest is parsed.
    LevelsAvailable {
        levels: Vec<QualityLevel>,
    },
    QualitySelected {
        selection: LevelSelection,
    },
    LevelSwitched {
        from: Option<usize>,
        to: usize,
        reason: AbrReason,
    },
    FaultDetected {
        kind: FaultKind,
        details: String,
    },
    Recovered,
    Progress {
        position_secs: f64,
        duration_secs: f64,
        buffered_ahead_secs: f64,
    },
    VolumeChanged {
        volume: f64,
        muted: bool,
    },
    Fatal {
        error: SessionError,
    },
}
