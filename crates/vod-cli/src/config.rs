//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//! upload_root = "/srv/media/incoming"
//!
//! [upload]
//! endpoint = "https://upload.example.com/files/"
//! chunk_size_bytes = 8388608
//! retry_delays_ms = [0, 1000, 3000, 5000]
//! resume_file = ".vod-resume.json"
//! metadata = { project = "holiday" }
//!
//! [playback]
//! api_base_url = "https://api.example.com"
//! low_buffer_secs = 0.5
//! max_recovery_attempts = 5
//!
//! [[webhook]]
//! url = "https://hooks.example.com/uploads"
//! events = ["upload_succeeded"]
//! secret = "my-key"
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use vod_core::{PlaybackConfig, UploadConfig, WebhookConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upload: UploadSettings,

    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default)]
    pub webhook: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// When set, the API only uploads files below this directory.
    #[serde(default)]
    pub upload_root: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
            upload_root: None,
        }
    }
}

pub fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadSettings {
    pub endpoint: Option<String>,
    pub chunk_size_bytes: Option<u64>,
    pub min_chunk_size_bytes: Option<u64>,
    pub max_chunk_size_bytes: Option<u64>,
    pub chunk_target_ms: Option<u64>,
    pub retry_delays_ms: Option<Vec<u64>>,
    pub max_retries: Option<u32>,
    pub request_timeout_ms: Option<u64>,
    pub resume_file: Option<PathBuf>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl UploadSettings {
    pub fn to_upload_config(&self) -> UploadConfig {
        let mut c = UploadConfig::default();
        if let Some(endpoint) = &self.endpoint {
            c = c.with_endpoint(endpoint);
        }
        if let (Some(min), Some(max)) = (self.min_chunk_size_bytes, self.max_chunk_size_bytes) {
            c = c.with_chunk_bounds(min, max);
        }
        if let Some(v) = self.chunk_size_bytes {
            c = c.with_chunk_size(v);
        }
        if let Some(v) = self.chunk_target_ms {
            c = c.with_chunk_target_duration(v);
        }
        if let Some(delays) = &self.retry_delays_ms {
            c = c.with_retry_delays(delays);
        }
        if self.max_retries.is_some() {
            c = c.with_max_retries(self.max_retries);
        }
        if let Some(v) = self.request_timeout_ms {
            c = c.with_request_timeout(v);
        }
        for (k, v) in &self.metadata {
            c = c.with_metadata(k, v);
        }
        c
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackSettings {
    pub api_base_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub low_buffer_secs: Option<f64>,
    pub resume_buffer_secs: Option<f64>,
    pub max_recovery_attempts: Option<u32>,
    pub autoplay: Option<bool>,
    pub start_muted: Option<bool>,
}

impl PlaybackSettings {
    pub fn to_playback_config(&self) -> PlaybackConfig {
        let mut c = PlaybackConfig::default();
        if let Some(url) = &self.api_base_url {
            c = c.with_api_base_url(url);
        }
        if let Some(v) = self.request_timeout_ms {
            c = c.with_request_timeout(v);
        }
        if self.max_retries.is_some() || self.retry_backoff_ms.is_some() {
            let retries = self.max_retries.unwrap_or(c.max_retries);
            let backoff = self
                .retry_backoff_ms
                .unwrap_or(c.retry_backoff.as_millis() as u64);
            c = c.with_retries(retries, backoff);
        }
        if self.low_buffer_secs.is_some() || self.resume_buffer_secs.is_some() {
            let low = self.low_buffer_secs.unwrap_or(c.low_buffer_secs);
            let resume = self.resume_buffer_secs.unwrap_or(c.resume_buffer_secs);
            c = c.with_buffer_thresholds(low, resume);
        }
        if let Some(v) = self.max_recovery_attempts {
            c = c.with_max_recovery_attempts(v);
        }
        if let Some(v) = self.autoplay {
            c = c.with_autoplay(v);
        }
        if let Some(v) = self.start_muted {
            c = c.with_start_muted(v);
        }
        c
    }
}

fn check_http_url(what: &str, raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("Invalid {}: {} ({})", what, raw, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(format!("{} must use http or https: {}", what, raw));
    }
    Ok(())
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_optional(path: Option<&Path>) -> Result<Self, String> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    fn validate(&self) -> Result<(), String> {
        for (i, wh) in self.webhook.iter().enumerate() {
            check_http_url(&format!("webhook URL at index {}", i), &wh.url)?;
        }

        if let Some(endpoint) = &self.upload.endpoint {
            check_http_url("upload endpoint", endpoint)?;
        }
        if let Some(url) = &self.playback.api_base_url {
            check_http_url("playback api_base_url", url)?;
        }

        let u = &self.upload;
        if let (Some(min), Some(max)) = (u.min_chunk_size_bytes, u.max_chunk_size_bytes) {
            if min > max {
                return Err(format!(
                    "min_chunk_size_bytes ({}) exceeds max_chunk_size_bytes ({})",
                    min, max
                ));
            }
        }
        if let Some(chunk) = u.chunk_size_bytes {
            if chunk == 0 {
                return Err("chunk_size_bytes must be positive".into());
            }
            let below = u.min_chunk_size_bytes.is_some_and(|min| chunk < min);
            let above = u.max_chunk_size_bytes.is_some_and(|max| chunk > max);
            if below || above {
                return Err(format!(
                    "chunk_size_bytes ({}) is outside the configured chunk bounds",
                    chunk
                ));
            }
        }
        if u.retry_delays_ms.as_ref().is_some_and(|d| d.is_empty()) {
            return Err("retry_delays_ms must list at least one delay".into());
        }

        let p = &self.playback;
        if let (Some(low), Some(resume)) = (p.low_buffer_secs, p.resume_buffer_secs) {
            if low > resume {
                return Err(format!(
                    "low_buffer_secs ({}) exceeds resume_buffer_secs ({})",
                    low, resume
                ));
            }
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config: AppConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.server.log_format, "pretty");
        assert!(config.webhook.is_empty());

        let upload = config.upload.to_upload_config();
        assert_eq!(upload.retry_delays.len(), 4);
        assert!(upload.max_retries.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:9090"
log_format = "json"
upload_root = "/srv/media"

[upload]
endpoint = "https://upload.example.com/files/"
chunk_size_bytes = 2097152
min_chunk_size_bytes = 1048576
max_chunk_size_bytes = 16777216
retry_delays_ms = [0, 500]
max_retries = 10
metadata = { project = "holiday" }

[playback]
api_base_url = "https://api.example.com"
low_buffer_secs = 1.0
resume_buffer_secs = 4.0
max_recovery_attempts = 3
autoplay = false

[[webhook]]
url = "https://hooks.example.com/uploads"
events = ["upload_failed"]
secret = "my-key"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.server.upload_root.as_deref(), Some(Path::new("/srv/media")));
        assert_eq!(config.webhook[0].events, vec!["upload_failed"]);
        assert_eq!(config.webhook[0].secret.as_deref(), Some("my-key"));
        assert_eq!(config.webhook[0].timeout_ms, 5000);

        let upload = config.upload.to_upload_config();
        assert_eq!(upload.endpoint, "https://upload.example.com/files/");
        assert_eq!(upload.chunk_size, 2_097_152);
        assert_eq!(upload.min_chunk_size, 1_048_576);
        assert_eq!(upload.max_chunk_size, 16_777_216);
        assert_eq!(upload.retry_delays.len(), 2);
        assert_eq!(upload.max_retries, Some(10));
        assert_eq!(upload.metadata.get("project").map(String::as_str), Some("holiday"));

        let playback = config.playback.to_playback_config();
        assert_eq!(playback.api_base_url, "https://api.example.com");
        assert_eq!(playback.low_buffer_secs, 1.0);
        assert_eq!(playback.resume_buffer_secs, 4.0);
        assert_eq!(playback.max_recovery_attempts, 3);
        assert!(!playback.autoplay);
        assert!(playback.start_muted);
    }

    #[test]
    fn validate_rejects_inverted_chunk_bounds() {
        let toml = r#"
[upload]
min_chunk_size_bytes = 4096
max_chunk_size_bytes = 1024
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("exceeds max_chunk_size_bytes"), "{}", err);
    }

    #[test]
    fn validate_rejects_chunk_size_outside_bounds() {
        let toml = r#"
[upload]
chunk_size_bytes = 100
min_chunk_size_bytes = 1024
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("outside the configured chunk bounds"), "{}", err);
    }

    #[test]
    fn validate_rejects_non_http_endpoint() {
        let toml = r#"
[upload]
endpoint = "ftp://upload.example.com/"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("must use http or https"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_webhook_url() {
        let toml = r#"
[[webhook]]
url = "not-valid"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid webhook URL"), "{}", err);
    }

    #[test]
    fn validate_rejects_inverted_buffer_thresholds() {
        let toml = r#"
[playback]
low_buffer_secs = 5.0
resume_buffer_secs = 2.0
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("exceeds resume_buffer_secs"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[server]
log_format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }
}
