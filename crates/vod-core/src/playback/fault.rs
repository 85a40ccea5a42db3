use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine fault categories, as reported by the media pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Manifest or segment fetch failure.
    Network,
    /// Decode or buffer pipeline failure.
    Media,
    Other,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Network => write!(f, "network fault"),
            FaultKind::Media => write!(f, "media fault"),
            FaultKind::Other => write!(f, "engine fault"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineFault {
    pub kind: FaultKind,
    /// The engine gave up on its own internal retries.
    pub fatal: bool,
    pub details: String,
}

impl EngineFault {
    pub fn new(kind: FaultKind, fatal: bool, details: impl Into<String>) -> Self {
        Self {
            kind,
            fatal,
            details: details.into(),
        }
    }

    pub fn network(details: impl Into<String>) -> Self {
        Self::new(FaultKind::Network, true, details)
    }

    pub fn media(details: impl Into<String>) -> Self {
        Self::new(FaultKind::Media, true, details)
    }

    pub fn other(details: impl Into<String>) -> Self {
        Self::new(FaultKind::Other, true, details)
    }

    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    pub fn recovery_action(&self) -> RecoveryAction {
        match (self.kind, self.fatal) {
            (_, false) => RecoveryAction::Ignore,
            (FaultKind::Network, true) => RecoveryAction::ReloadSource,
            (FaultKind::Media, true) => RecoveryAction::RecoverMedia,
            (FaultKind::Other, true) => RecoveryAction::Terminate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// The engine is still retrying internally.
    Ignore,
    /// Reissue the load from the current position.
    ReloadSource,
    /// Reinitialize the decode pipeline in place.
    RecoverMedia,
    Terminate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_faults_map_to_recovery_actions() {
        assert_eq!(EngineFault::network("seg 404").recovery_action(), RecoveryAction::ReloadSource);
        assert_eq!(EngineFault::media("decode").recovery_action(), RecoveryAction::RecoverMedia);
        assert_eq!(EngineFault::other("boom").recovery_action(), RecoveryAction::Terminate);
    }

    #[test]
    fn non_fatal_faults_are_left_to_the_engine() {
        for fault in [
            EngineFault::network("x").non_fatal(),
            EngineFault::media("x").non_fatal(),
            EngineFault::other("x").non_fatal(),
        ] {
            assert_eq!(fault.recovery_action(), RecoveryAction::Ignore);
        }
    }
}
