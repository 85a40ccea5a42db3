use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Idle,
    Creating,
    Uploading,
    Paused,
    Succeeded,
    Failed,
}

impl UploadStatus {
    pub fn can_transition_to(self, target: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, target),
            (Idle | Failed, Creating)
                | (Creating, Uploading)
                | (Creating, Failed)
                | (Uploading, Paused)
                | (Uploading, Succeeded)
                | (Uploading, Failed)
                | (Paused, Uploading)
                | (Paused, Succeeded)
                | (Paused, Failed)
                | (Creating | Uploading | Paused | Failed, Idle)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Succeeded)
    }

    /// A create or transfer exchange may be in flight.
    pub fn is_active(self) -> bool {
        matches!(self, UploadStatus::Creating | UploadStatus::Uploading)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Idle => write!(f, "idle"),
            UploadStatus::Creating => write!(f, "creating"),
            UploadStatus::Uploading => write!(f, "uploading"),
            UploadStatus::Paused => write!(f, "paused"),
            UploadStatus::Succeeded => write!(f, "succeeded"),
            UploadStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Server-side upload target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResource {
    pub resource_id: String,
    pub url: String,
    pub total_size: u64,
    pub committed_offset: u64,
}

/// Snapshot of an upload session.
///
/// `committed_offset <= local_offset <= total_size` holds for every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSessionState {
    pub status: UploadStatus,
    pub file_name: Option<String>,
    pub total_size: u64,
    pub committed_offset: u64,
    pub local_offset: u64,
    pub retry_count: u32,
    pub last_error: Option<SessionError>,
    pub resource: Option<UploadResource>,
    /// Public URL of the finished resource.
    pub upload_url: Option<String>,
}

impl Default for UploadSessionState {
    fn default() -> Self {
        Self {
            status: UploadStatus::Idle,
            file_name: None,
            total_size: 0,
            committed_offset: 0,
            local_offset: 0,
            retry_count: 0,
            last_error: None,
            resource: None,
            upload_url: None,
        }
    }
}

impl UploadSessionState {
    pub fn percent(&self) -> f64 {
        percent(self.committed_offset, self.total_size)
    }
}

pub(crate) fn percent(committed: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (committed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_allowed_only_from_idle_or_failed() {
        assert!(UploadStatus::Idle.can_transition_to(UploadStatus::Creating));
        assert!(UploadStatus::Failed.can_transition_to(UploadStatus::Creating));
        assert!(!UploadStatus::Paused.can_transition_to(UploadStatus::Creating));
        assert!(!UploadStatus::Succeeded.can_transition_to(UploadStatus::Creating));
    }

    #[test]
    fn succeeded_is_terminal() {
        assert!(UploadStatus::Succeeded.is_terminal());
        assert!(!UploadStatus::Succeeded.can_transition_to(UploadStatus::Idle));
        assert!(!UploadStatus::Failed.is_terminal());
    }

    #[test]
    fn abort_returns_non_terminal_states_to_idle() {
        for status in [
            UploadStatus::Creating,
            UploadStatus::Uploading,
            UploadStatus::Paused,
            UploadStatus::Failed,
        ] {
            assert!(status.can_transition_to(UploadStatus::Idle), "{status}");
        }
    }

    #[test]
    fn percent_of_empty_total_is_complete() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(250, 1000), 25.0);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&UploadStatus::Uploading).unwrap(),
            "\"uploading\""
        );
    }
}
