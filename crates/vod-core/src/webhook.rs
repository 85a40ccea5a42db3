//! Webhook delivery of terminal upload outcomes.
//!
//! Upload sessions push a [`Notification`] into an unbounded channel when
//! they succeed or fail. The [`WebhookDispatcher`] drains that channel and
//! POSTs a JSON envelope to every configured endpoint that accepts it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SessionError;

pub const SIGNATURE_HEADER: &str = "X-Vod-Signature-256";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// Notification types to deliver (`upload_succeeded`, `upload_failed`). Empty means all.
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_webhook_retries")]
    pub max_retries: u32,

    /// HMAC-SHA256 signing secret for the signature header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

fn default_webhook_retries() -> u32 {
    2
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: Vec::new(),
            timeout_ms: default_webhook_timeout_ms(),
            max_retries: default_webhook_retries(),
            secret: None,
        }
    }

    pub fn accepts(&self, notification_type: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == notification_type)
    }
}

#[derive(Debug, Clone)]
pub enum Notification {
    UploadSucceeded {
        session_id: String,
        file_name: String,
        total_size: u64,
        url: String,
    },
    UploadFailed {
        session_id: String,
        file_name: String,
        error: SessionError,
    },
}

impl Notification {
    pub fn notification_type(&self) -> &'static str {
        match self {
            Notification::UploadSucceeded { .. } => "upload_succeeded",
            Notification::UploadFailed { .. } => "upload_failed",
        }
    }
}

/// The JSON envelope POSTed to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub version: u8,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub session_id: String,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn from_notification(notification: &Notification) -> Self {
        let (session_id, timestamp, data) = match notification {
            Notification::UploadSucceeded {
                session_id,
                file_name,
                total_size,
                url,
            } => (
                session_id.clone(),
                Utc::now(),
                serde_json::json!({
                    "file_name": file_name,
                    "total_size": total_size,
                    "url": url,
                }),
            ),
            Notification::UploadFailed {
                session_id,
                file_name,
                error,
            } => (
                session_id.clone(),
                error.timestamp,
                serde_json::json!({
                    "file_name": file_name,
                    "kind": error.kind,
                    "message": error.message,
                    "status_code": error.status_code,
                }),
            ),
        };
        Self {
            version: 1,
            id: Uuid::new_v4().to_string(),
            timestamp,
            notification_type: notification.notification_type().to_string(),
            session_id,
            data,
        }
    }
}

pub struct WebhookDispatcher {
    rx: mpsc::UnboundedReceiver<Notification>,
    webhooks: Vec<WebhookConfig>,
    client: Client,
}

impl WebhookDispatcher {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Notification>,
        webhooks: Vec<WebhookConfig>,
        client: Client,
    ) -> Self {
        Self {
            rx,
            webhooks,
            client,
        }
    }

    /// Returns when every sender is dropped.
    pub async fn run(mut self) {
        debug!(webhook_count = self.webhooks.len(), "Webhook dispatcher started");

        while let Some(notification) = self.rx.recv().await {
            let payload = WebhookPayload::from_notification(&notification);
            let notification_type = notification.notification_type();
            let body = match serde_json::to_vec(&payload) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize webhook payload");
                    continue;
                }
            };

            let deliveries = self
                .webhooks
                .iter()
                .filter(|wh| wh.accepts(notification_type))
                .map(|wh| {
                    let body = &body;
                    let client = &self.client;
                    async move {
                        let result = deliver(
                            client,
                            &wh.url,
                            body,
                            wh.secret.as_deref(),
                            Duration::from_millis(wh.timeout_ms),
                            wh.max_retries,
                        )
                        .await;
                        match result {
                            Ok(()) => debug!(url = %wh.url, notification_type, "Webhook delivered"),
                            Err(e) => warn!(
                                url = %wh.url,
                                notification_type,
                                error = %e,
                                "Webhook delivery failed"
                            ),
                        }
                    }
                });
            join_all(deliveries).await;
        }

        debug!("Webhook dispatcher shutting down");
    }
}

pub fn notification_channel() -> (
    mpsc::UnboundedSender<Notification>,
    mpsc::UnboundedReceiver<Notification>,
) {
    mpsc::unbounded_channel()
}

async fn deliver(
    client: &Client,
    url: &str,
    body: &[u8],
    secret: Option<&str>,
    timeout: Duration,
    max_retries: u32,
) -> Result<(), String> {
    let signature = match secret {
        Some(secret) => Some(sign_payload(body, secret)?),
        None => None,
    };
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
            tokio::time::sleep(backoff).await;
        }

        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", concat!("vod/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .body(body.to_vec());

        if let Some(signature) = &signature {
            req = req.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status().as_u16();
                last_error = format!("HTTP {status} from {url}");
                if (400..500).contains(&status) && status != 429 {
                    return Err(last_error);
                }
            }
            Err(e) => {
                last_error = format!("Request to {url} failed: {e}");
            }
        }
    }

    Err(last_error)
}

fn sign_payload(body: &[u8], secret: &str) -> Result<String, String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| format!("invalid webhook secret: {e}"))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
