use serde::Serialize;

use super::state::UploadStatus;
use crate::error::SessionError;

/// Everything an upload session reports to its observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
    StatusChanged {
        status: UploadStatus,
    },
    Created {
        resource_id: String,
        committed_offset: u64,
    },
    /// Emitted after every advance of the committed offset.
    Progress {
        committed_offset: u64,
        total_size: u64,
        percent: f64,
    },
    Succeeded {
        url: String,
    },
    Failed {
        error: SessionError,
    },
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadEvent::Succeeded { .. } | UploadEvent::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(UploadEvent::Progress {
            committed_offset: 5,
            total_size: 10,
            percent: 50.0,
        })
        .unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 50.0);
    }
}
