use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{
    CreateRequest, CreatedResource, Credential, CredentialProvider, PlaybackApi,
    PlaybackDescriptor, StaticCredentials, TransportError, UploadTransport,
};
use crate::config::{PlaybackConfig, UploadConfig};
use crate::upload::UploadResource;

const TUS_VERSION: &str = "1.0.0";
const TUS_RESUMABLE: &str = "Tus-Resumable";
const UPLOAD_OFFSET: &str = "Upload-Offset";
const UPLOAD_LENGTH: &str = "Upload-Length";
const UPLOAD_METADATA: &str = "Upload-Metadata";
const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// reqwest-backed collaborator speaking tus for uploads and the media API for playback.
///
/// Credentials are injected per request through a [`CredentialProvider`]
/// rather than by reaching into the transport.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
    api_base_url: String,
    max_retries: u32,
    base_backoff: Duration,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("api_base_url", &self.api_base_url)
            .field("max_retries", &self.max_retries)
            .field("base_backoff", &self.base_backoff)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct DescriptorEnvelope {
    data: PlaybackDescriptor,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self::with_client(Self::build_client(timeout)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            credentials: Arc::new(StaticCredentials::none()),
            api_base_url: String::new(),
            max_retries: 0,
            base_backoff: Duration::from_millis(100),
        }
    }

    pub fn from_upload_config(config: &UploadConfig) -> Result<Self, TransportError> {
        Self::new(config.request_timeout)
    }

    pub fn from_playback_config(config: &PlaybackConfig) -> Result<Self, TransportError> {
        Ok(Self::new(config.request_timeout)?
            .with_api_base_url(&config.api_base_url)
            .with_retries(config.max_retries, config.retry_backoff))
    }

    pub fn build_client(timeout: Duration) -> Result<Client, TransportError> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(8)
            .gzip(true)
            .build()
            .map_err(|e| TransportError::Network {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Retry policy for descriptor and manifest GETs. Uploads retry at the session level.
    pub fn with_retries(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.credentials.credential() {
            Some(Credential::Bearer(token)) => req.bearer_auth(token),
            Some(Credential::Cookie(cookie)) => req.header(reqwest::header::COOKIE, cookie),
            None => req,
        }
    }

    /// Asks the server how many bytes it holds for `url`.
    async fn head_offset(&self, url: &str) -> Result<u64, TransportError> {
        let resp = self
            .authorize(self.client.head(url))
            .header(TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        if !resp.status().is_success() {
            return Err(status_error(url, resp.status()));
        }
        offset_header(url, &resp)?.ok_or_else(|| TransportError::Parse {
            url: url.to_string(),
            message: format!("missing {UPLOAD_OFFSET} header"),
        })
    }

    async fn resume_existing(
        &self,
        url: &str,
        total_size: u64,
    ) -> Result<Option<CreatedResource>, TransportError> {
        match self.head_offset(url).await {
            Ok(offset) if offset <= total_size => {
                debug!(url, offset, "Resuming previously created upload");
                Ok(Some(CreatedResource {
                    resource_id: resource_id_from_url(url),
                    url: url.to_string(),
                    committed_offset: offset,
                }))
            }
            Ok(offset) => {
                warn!(url, offset, total_size, "Stored upload is larger than the file, creating a new one");
                Ok(None)
            }
            Err(e) if matches!(e.status_code(), Some(403 | 404 | 410)) => {
                debug!(url, error = %e, "Stored upload is gone, creating a new one");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// GET with retries on transient failures; 4xx responses return immediately.
    async fn get_with_retry(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<Response, TransportError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                debug!(url, attempt, backoff_ms = backoff.as_millis(), "Retrying fetch");
                tokio::time::sleep(backoff).await;
            }

            let req = match bearer {
                Some(token) => self.client.get(url).bearer_auth(token),
                None => self.authorize(self.client.get(url)),
            };

            match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let err = status_error(url, resp.status());
                    warn!(url, status = resp.status().as_u16(), attempt, "Fetch returned error status");
                    if !err.is_transient() {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
                Err(e) => {
                    let err = request_error(url, e);
                    warn!(url, attempt, error = %err, "Fetch failed");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TransportError::Network {
            url: url.to_string(),
            reason: "no attempt was made".to_string(),
        }))
    }
}

#[async_trait]
impl UploadTransport for HttpClient {
    async fn create(&self, request: &CreateRequest) -> Result<CreatedResource, TransportError> {
        if let Some(url) = &request.resume_url {
            if let Some(existing) = self.resume_existing(url, request.total_size).await? {
                return Ok(existing);
            }
        }

        let endpoint = request.endpoint.as_str();
        let resp = self
            .authorize(self.client.post(endpoint))
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(UPLOAD_LENGTH, request.total_size.to_string())
            .header(UPLOAD_METADATA, encode_metadata(&request.metadata))
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;

        if !resp.status().is_success() {
            return Err(status_error(endpoint, resp.status()));
        }

        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TransportError::Parse {
                url: endpoint.to_string(),
                message: "create response has no Location header".to_string(),
            })?;
        let url = Url::parse(endpoint)
            .and_then(|base| base.join(location))
            .map_err(|e| TransportError::Parse {
                url: endpoint.to_string(),
                message: format!("invalid Location '{location}': {e}"),
            })?
            .to_string();
        let committed_offset = offset_header(endpoint, &resp)?.unwrap_or(0);

        debug!(url, committed_offset, "Created upload resource");
        Ok(CreatedResource {
            resource_id: resource_id_from_url(&url),
            url,
            committed_offset,
        })
    }

    async fn transfer(
        &self,
        resource: &UploadResource,
        offset: u64,
        chunk: Bytes,
    ) -> Result<u64, TransportError> {
        let url = resource.url.as_str();
        let resp = self
            .authorize(self.client.patch(url))
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(UPLOAD_OFFSET, offset.to_string())
            .header(reqwest::header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .body(chunk)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        match resp.status() {
            status if status.is_success() => {
                offset_header(url, &resp)?.ok_or_else(|| TransportError::Parse {
                    url: url.to_string(),
                    message: format!("transfer response has no {UPLOAD_OFFSET} header"),
                })
            }
            StatusCode::CONFLICT => {
                let server_offset = self.head_offset(url).await?;
                warn!(url, offset, server_offset, "Server rejected transfer offset");
                Err(TransportError::OffsetConflict {
                    url: url.to_string(),
                    server_offset,
                })
            }
            status => Err(status_error(url, status)),
        }
    }
}

#[async_trait]
impl PlaybackApi for HttpClient {
    async fn fetch_descriptor(
        &self,
        content_id: &str,
    ) -> Result<PlaybackDescriptor, TransportError> {
        let base = format!("{}/media/playback", self.api_base_url.trim_end_matches('/'));
        let url = Url::parse_with_params(&base, &[("videoId", content_id)])
            .map_err(|e| TransportError::Parse {
                url: base.clone(),
                message: format!("invalid API base URL: {e}"),
            })?
            .to_string();

        let resp = self.get_with_retry(&url, None).await?;
        let envelope: DescriptorEnvelope = resp.json().await.map_err(|e| TransportError::Parse {
            url: url.clone(),
            message: format!("invalid playback descriptor: {e}"),
        })?;
        Ok(envelope.data)
    }

    async fn fetch_manifest(
        &self,
        url: &str,
        playback_token: &str,
    ) -> Result<String, TransportError> {
        let resp = self.get_with_retry(url, Some(playback_token)).await?;
        resp.text().await.map_err(|e| request_error(url, e))
    }
}

/// tus `Upload-Metadata`: comma-separated `key base64(value)` pairs.
pub(crate) fn encode_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{} {}", k, STANDARD.encode(v.as_bytes())))
        .collect::<Vec<_>>()
        .join(",")
}

fn resource_id_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

fn offset_header(url: &str, resp: &Response) -> Result<Option<u64>, TransportError> {
    let Some(value) = resp.headers().get(UPLOAD_OFFSET) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| TransportError::Parse {
            url: url.to_string(),
            message: format!("malformed {UPLOAD_OFFSET} header"),
        })
}

fn status_error(url: &str, status: StatusCode) -> TransportError {
    TransportError::Http {
        url: url.to_string(),
        status: status.as_u16(),
        message: status.canonical_reason().unwrap_or("Unknown").to_string(),
    }
}

fn request_error(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}
