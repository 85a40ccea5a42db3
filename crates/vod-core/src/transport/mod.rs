mod http;

pub use http::HttpClient;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::upload::UploadResource;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error {status} from {url}: {message}")]
    Http {
        url: String,
        status: u16,
        message: String,
    },
    #[error("Network error reaching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Timeout reaching {url}")]
    Timeout { url: String },
    /// The server rejected the transfer offset; it currently holds `server_offset` bytes.
    #[error("Offset conflict at {url}: server holds {server_offset} bytes")]
    OffsetConflict { url: String, server_offset: u64 },
    #[error("Invalid response from {url}: {message}")]
    Parse { url: String, message: String },
}

impl TransportError {
    /// Transient failures are retried; everything else is surfaced.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::OffsetConflict { .. } | Self::Parse { .. } => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::OffsetConflict { .. } => Some(409),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Http { status: 401 | 403, .. } => ErrorKind::Auth,
            Self::Http { status: 404 | 410, .. } => ErrorKind::NotFound,
            Self::OffsetConflict { .. } | Self::Parse { .. } => ErrorKind::Protocol,
            e if e.is_transient() => ErrorKind::Network,
            Self::Http { .. } => ErrorKind::Fatal,
            Self::Network { .. } | Self::Timeout { .. } => ErrorKind::Network,
        }
    }
}

/// A credential attached to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    Cookie(String),
}

/// Supplies the credential for each request. Implemented by the auth collaborator.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Option<Credential>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<Credential>);

impl StaticCredentials {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self(Some(Credential::Bearer(token.into())))
    }

    pub fn cookie(cookie: impl Into<String>) -> Self {
        Self(Some(Credential::Cookie(cookie.into())))
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self) -> Option<Credential> {
        self.0.clone()
    }
}

/// Parameters of the create exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub endpoint: String,
    pub total_size: u64,
    pub metadata: BTreeMap<String, String>,
    /// URL of a prior partial resource for the same file, if one is known.
    pub resume_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    pub resource_id: String,
    pub url: String,
    /// 0 for a fresh resource, the server's offset for a recognized one.
    pub committed_offset: u64,
}

/// The upload protocol: one create exchange, then offset-tagged transfers.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn create(&self, request: &CreateRequest) -> Result<CreatedResource, TransportError>;

    /// Sends `chunk` at `offset` and returns the offset the server now holds.
    async fn transfer(
        &self,
        resource: &UploadResource,
        offset: u64,
        chunk: Bytes,
    ) -> Result<u64, TransportError>;
}

/// Server-provided descriptor for one playback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackDescriptor {
    pub manifest_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub playback_token: String,
}

#[async_trait]
pub trait PlaybackApi: Send + Sync {
    async fn fetch_descriptor(&self, content_id: &str)
        -> Result<PlaybackDescriptor, TransportError>;

    /// Fetches a manifest using the session's playback token as bearer credential.
    async fn fetch_manifest(&self, url: &str, playback_token: &str)
        -> Result<String, TransportError>;
}
