use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vod_core::{
    HttpClient, MediaFile, RecordedEvent, UploadEvent, UploadSession, UploadSessionState,
    UploadTransport,
};

use crate::error::ApiError;
use crate::state::{AppState, ManagedUpload};

#[derive(Debug, Deserialize)]
pub struct CreateUploadRequest {
    /// Local file to upload.
    pub path: String,
    /// Overrides the type guessed from the file extension.
    pub media_type: Option<String>,
    pub endpoint: Option<String>,
    pub chunk_size: Option<u64>,
    pub min_chunk_size: Option<u64>,
    pub max_chunk_size: Option<u64>,
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub autostart: bool,
}

#[derive(Serialize)]
pub struct UploadSummary {
    pub id: Uuid,
    pub status: String,
    pub file_name: Option<String>,
    pub total_size: u64,
    pub committed_offset: u64,
    pub percent: f64,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct UploadDetail {
    pub id: Uuid,
    pub created_at: String,
    pub source_path: String,
    pub endpoint: String,
    pub chunk_size: u64,
    pub percent: f64,
    #[serde(flatten)]
    pub state: UploadSessionState,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub upload_id: Uuid,
    pub events: Vec<RecordedEvent<UploadEvent>>,
}

#[derive(Serialize)]
pub struct DeleteUploadResponse {
    pub message: String,
    pub id: Uuid,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/uploads", post(create_upload).get(list_uploads))
        .route("/uploads/{id}", get(get_upload).delete(delete_upload))
        .route("/uploads/{id}/start", post(start_upload))
        .route("/uploads/{id}/pause", post(pause_upload))
        .route("/uploads/{id}/resume", post(resume_upload))
        .route("/uploads/{id}/abort", post(abort_upload))
        .route("/uploads/{id}/events", get(get_events))
}

fn is_valid_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| u.scheme() == "http" || u.scheme() == "https")
        .unwrap_or(false)
}

fn parse_upload_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("Invalid upload ID: {}", id)))
}

fn get_upload_arc(state: &AppState, id: Uuid) -> Result<Arc<ManagedUpload>, ApiError> {
    state
        .uploads
        .get(&id)
        .map(|r| Arc::clone(r.value()))
        .ok_or_else(|| ApiError::NotFound(format!("Upload {} not found", id)))
}

async fn resolve_path(state: &AppState, raw: &str) -> Result<PathBuf, ApiError> {
    let path = tokio::fs::canonicalize(raw)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Cannot read {}: {}", raw, e)))?;
    if let Some(root) = &state.upload_root {
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| ApiError::Internal(format!("Upload root unavailable: {}", e)))?;
        if !path.starts_with(&root) {
            return Err(ApiError::Forbidden(format!(
                "{} is outside the upload directory",
                raw
            )));
        }
    }
    Ok(path)
}

async fn detail(id: Uuid, upload: &ManagedUpload) -> UploadDetail {
    let state = upload.session.state().await;
    let config = upload.session.config();
    UploadDetail {
        id,
        created_at: upload.created_at.to_rfc3339(),
        source_path: upload.source_path.display().to_string(),
        endpoint: config.endpoint.clone(),
        chunk_size: config.chunk_size,
        percent: state.percent(),
        state,
    }
}

/// POST /api/v1/uploads
async fn create_upload(
    State(state): State<AppState>,
    Json(body): Json<CreateUploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.path.trim().is_empty() {
        return Err(ApiError::BadRequest("path must not be empty".into()));
    }
    if let Some(endpoint) = &body.endpoint {
        if !is_valid_url(endpoint) {
            return Err(ApiError::BadRequest(format!("Invalid endpoint URL: {}", endpoint)));
        }
    }

    let config = {
        let mut c = state.default_config.clone();
        if let Some(endpoint) = body.endpoint {
            c = c.with_endpoint(endpoint);
        }
        if let (Some(min), Some(max)) = (body.min_chunk_size, body.max_chunk_size) {
            if min > max {
                return Err(ApiError::BadRequest(
                    "min_chunk_size must not exceed max_chunk_size".into(),
                ));
            }
            c = c.with_chunk_bounds(min, max);
        }
        if let Some(v) = body.chunk_size {
            c = c.with_chunk_size(v);
        }
        if body.max_retries.is_some() {
            c = c.with_max_retries(body.max_retries);
        }
        for (k, v) in body.metadata {
            c = c.with_metadata(k, v);
        }
        c
    };

    let path = resolve_path(&state, &body.path).await?;
    let mut file = MediaFile::open(&path)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Cannot open {}: {}", body.path, e)))?;
    if let Some(media_type) = body.media_type {
        file = file.with_media_type(media_type);
    }

    let transport: Arc<dyn UploadTransport> = match &state.transport {
        Some(t) => Arc::clone(t),
        None => Arc::new(
            HttpClient::from_upload_config(&config)
                .map_err(|e| ApiError::Internal(e.to_string()))?
                .with_credentials(Arc::clone(&state.credentials)),
        ),
    };
    let session = UploadSession::new(
        config,
        transport,
        Arc::clone(&state.resume_store),
        state.notification_tx.clone(),
    );
    session.select_file(file).await?;
    if body.autostart {
        session.start().await?;
    }

    let id = session.id();
    let upload = Arc::new(ManagedUpload {
        session,
        source_path: path,
        created_at: Utc::now(),
    });
    state.uploads.insert(id, Arc::clone(&upload));
    tracing::info!(upload_id = %id, path = %upload.source_path.display(), "Upload registered");

    Ok((StatusCode::CREATED, Json(detail(id, &upload).await)))
}

/// GET /api/v1/uploads
async fn list_uploads(State(state): State<AppState>) -> impl IntoResponse {
    let mut uploads: Vec<_> = state
        .uploads
        .iter()
        .map(|e| (*e.key(), Arc::clone(e.value())))
        .collect();
    uploads.sort_by_key(|(_, u)| u.created_at);

    let mut summaries = Vec::with_capacity(uploads.len());
    for (id, u) in uploads {
        let s = u.session.state().await;
        summaries.push(UploadSummary {
            id,
            status: s.status.to_string(),
            percent: s.percent(),
            file_name: s.file_name,
            total_size: s.total_size,
            committed_offset: s.committed_offset,
            created_at: u.created_at.to_rfc3339(),
        });
    }
    Json(summaries)
}

/// GET /api/v1/uploads/:id
async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadDetail>, ApiError> {
    let id = parse_upload_id(&id)?;
    let u = get_upload_arc(&state, id)?;
    Ok(Json(detail(id, &u).await))
}

/// DELETE /api/v1/uploads/:id
async fn delete_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteUploadResponse>, ApiError> {
    let id = parse_upload_id(&id)?;

    let (_, upload) = state
        .uploads
        .remove(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Upload {} not found", id)))?;

    if !upload.session.state().await.status.is_terminal() {
        if let Err(e) = upload.session.abort().await {
            tracing::debug!(upload_id = %id, error = %e, "Abort on delete rejected");
        }
    }

    Ok(Json(DeleteUploadResponse {
        message: "Upload aborted and deleted".into(),
        id,
    }))
}

/// POST /api/v1/uploads/:id/start
async fn start_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadDetail>, ApiError> {
    let id = parse_upload_id(&id)?;
    let u = get_upload_arc(&state, id)?;
    u.session.start().await?;
    Ok(Json(detail(id, &u).await))
}

/// POST /api/v1/uploads/:id/pause
async fn pause_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadDetail>, ApiError> {
    let id = parse_upload_id(&id)?;
    let u = get_upload_arc(&state, id)?;
    u.session.pause().await?;
    Ok(Json(detail(id, &u).await))
}

/// POST /api/v1/uploads/:id/resume
async fn resume_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadDetail>, ApiError> {
    let id = parse_upload_id(&id)?;
    let u = get_upload_arc(&state, id)?;
    u.session.resume().await?;
    Ok(Json(detail(id, &u).await))
}

/// POST /api/v1/uploads/:id/abort
async fn abort_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadDetail>, ApiError> {
    let id = parse_upload_id(&id)?;
    let u = get_upload_arc(&state, id)?;
    u.session.abort().await?;
    Ok(Json(detail(id, &u).await))
}

/// GET /api/v1/uploads/:id/events
async fn get_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventsResponse>, ApiError> {
    let id = parse_upload_id(&id)?;
    let u = get_upload_arc(&state, id)?;

    Ok(Json(EventsResponse {
        upload_id: id,
        events: u.session.history(),
    }))
}
