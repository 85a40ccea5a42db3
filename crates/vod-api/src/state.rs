use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use vod_core::{
    CredentialProvider, MemoryResumeStore, Notification, ResumeStore, StaticCredentials,
    UploadConfig, UploadSession, UploadTransport,
};

/// An upload session registered with the server.
pub struct ManagedUpload {
    pub session: UploadSession,
    pub source_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<DashMap<Uuid, Arc<ManagedUpload>>>,
    pub default_config: UploadConfig,
    /// Shared transport; when unset each upload gets its own HTTP client.
    pub transport: Option<Arc<dyn UploadTransport>>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub resume_store: Arc<dyn ResumeStore>,
    /// Uploads may only read files below this directory.
    pub upload_root: Option<PathBuf>,
    pub notification_tx: Option<UnboundedSender<Notification>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            uploads: Arc::new(DashMap::new()),
            default_config: UploadConfig::default(),
            transport: None,
            credentials: Arc::new(StaticCredentials::none()),
            resume_store: Arc::new(MemoryResumeStore::new()),
            upload_root: None,
            notification_tx: None,
        }
    }

    pub fn with_notification_tx(mut self, tx: UnboundedSender<Notification>) -> Self {
        self.notification_tx = Some(tx);
        self
    }

    pub fn with_default_config(mut self, config: UploadConfig) -> Self {
        self.default_config = config;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn UploadTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_resume_store(mut self, store: Arc<dyn ResumeStore>) -> Self {
        self.resume_store = store;
        self
    }

    pub fn with_upload_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.upload_root = Some(root.into());
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
