use std::fmt::Write;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use vod_core::{UploadEvent, UploadStatus};

use crate::state::AppState;

const STATUSES: [UploadStatus; 6] = [
    UploadStatus::Idle,
    UploadStatus::Creating,
    UploadStatus::Uploading,
    UploadStatus::Paused,
    UploadStatus::Succeeded,
    UploadStatus::Failed,
];

/// Renders every registered upload in OpenMetrics text format.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = String::with_capacity(4096);

    let mut uploads: Vec<_> = state
        .uploads
        .iter()
        .map(|e| (*e.key(), Arc::clone(e.value())))
        .collect();
    uploads.sort_by_key(|(_, u)| u.created_at);

    let mut snapshots = Vec::with_capacity(uploads.len());
    for (id, u) in &uploads {
        snapshots.push((*id, u, u.session.state().await));
    }

    let _ = writeln!(out, "# TYPE vod_upload_info info");
    let _ = writeln!(out, "# HELP vod_upload_info Information about a registered upload");
    for (id, u, s) in &snapshots {
        let _ = writeln!(
            out,
            "vod_upload_info{{upload_id=\"{}\",file=\"{}\",created=\"{}\"}} 1",
            id,
            escape_label(s.file_name.as_deref().unwrap_or("")),
            u.created_at.to_rfc3339()
        );
    }

    let _ = writeln!(out, "# TYPE vod_upload_status stateset");
    let _ = writeln!(out, "# HELP vod_upload_status Current status of the upload");
    for (id, _, s) in &snapshots {
        for variant in STATUSES {
            let _ = writeln!(
                out,
                "vod_upload_status{{upload_id=\"{}\",vod_upload_status=\"{}\"}} {}",
                id,
                variant,
                u8::from(s.status == variant)
            );
        }
    }

    let _ = writeln!(out, "# TYPE vod_upload_size_bytes gauge");
    let _ = writeln!(out, "# HELP vod_upload_size_bytes Total size of the file being uploaded");
    for (id, _, s) in &snapshots {
        let _ = writeln!(out, "vod_upload_size_bytes{{upload_id=\"{}\"}} {}", id, s.total_size);
    }

    let _ = writeln!(out, "# TYPE vod_upload_committed_bytes gauge");
    let _ = writeln!(
        out,
        "# HELP vod_upload_committed_bytes Bytes acknowledged by the upload server"
    );
    for (id, _, s) in &snapshots {
        let _ = writeln!(
            out,
            "vod_upload_committed_bytes{{upload_id=\"{}\"}} {}",
            id, s.committed_offset
        );
    }

    let _ = writeln!(out, "# TYPE vod_upload_progress_ratio gauge");
    let _ = writeln!(out, "# HELP vod_upload_progress_ratio Committed fraction of the file");
    for (id, _, s) in &snapshots {
        let _ = writeln!(
            out,
            "vod_upload_progress_ratio{{upload_id=\"{}\"}} {:.4}",
            id,
            s.percent() / 100.0
        );
    }

    let _ = writeln!(out, "# TYPE vod_upload_consecutive_retries gauge");
    let _ = writeln!(
        out,
        "# HELP vod_upload_consecutive_retries Retries since the last successful exchange"
    );
    for (id, _, s) in &snapshots {
        let _ = writeln!(
            out,
            "vod_upload_consecutive_retries{{upload_id=\"{}\"}} {}",
            id, s.retry_count
        );
    }

    let _ = writeln!(out, "# TYPE vod_upload_failures counter");
    let _ = writeln!(out, "# HELP vod_upload_failures Failed runs since the upload was registered");
    for (id, u, _) in &snapshots {
        let failures = u
            .session
            .history()
            .iter()
            .filter(|r| matches!(r.event, UploadEvent::Failed { .. }))
            .count();
        let _ = writeln!(out, "vod_upload_failures_total{{upload_id=\"{}\"}} {}", id, failures);
    }

    let _ = writeln!(out, "# TYPE vod_upload_age_seconds gauge");
    let _ = writeln!(out, "# HELP vod_upload_age_seconds Time since the upload was registered");
    for (id, u, _) in &snapshots {
        let age = (chrono::Utc::now() - u.created_at).num_milliseconds() as f64 / 1000.0;
        let _ = writeln!(out, "vod_upload_age_seconds{{upload_id=\"{}\"}} {:.3}", id, age);
    }

    let _ = writeln!(out, "# EOF");

    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }
}
