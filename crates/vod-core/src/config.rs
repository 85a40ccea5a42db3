use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::upload::RetrySchedule;

const MIB: u64 = 1024 * 1024;

/// Configuration for a resumable upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Creation endpoint of the upload server (tus `POST` target).
    pub endpoint: String,
    /// Initial chunk size in bytes.
    pub chunk_size: u64,
    /// Lower bound for adaptive chunk sizing.
    pub min_chunk_size: u64,
    /// Upper bound for adaptive chunk sizing.
    pub max_chunk_size: u64,
    /// A chunk finishing in under half this duration doubles the next chunk.
    pub chunk_target_duration: Duration,
    /// Delays applied before consecutive retries; the last one repeats.
    pub retry_delays: Vec<Duration>,
    /// Give up after this many consecutive retries. `None` retries forever.
    pub max_retries: Option<u32>,
    /// HTTP request timeout for create and transfer exchanges.
    pub request_timeout: Duration,
    /// Extra metadata sent with the create exchange, besides filename and filetype.
    pub metadata: BTreeMap<String, String>,
    /// Number of recent events retained per session.
    pub event_limit: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:1080/files/".to_string(),
            chunk_size: 8 * MIB,
            min_chunk_size: MIB,
            max_chunk_size: 64 * MIB,
            chunk_target_duration: Duration::from_secs(10),
            retry_delays: vec![
                Duration::ZERO,
                Duration::from_millis(1000),
                Duration::from_millis(3000),
                Duration::from_millis(5000),
            ],
            max_retries: None,
            request_timeout: Duration::from_secs(30),
            metadata: BTreeMap::new(),
            event_limit: 200,
        }
    }
}

impl UploadConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the initial chunk size, widening the bounds if they no longer contain it.
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes.max(1);
        self.min_chunk_size = self.min_chunk_size.min(self.chunk_size);
        self.max_chunk_size = self.max_chunk_size.max(self.chunk_size);
        self
    }

    pub fn with_chunk_bounds(mut self, min: u64, max: u64) -> Self {
        self.min_chunk_size = min.max(1);
        self.max_chunk_size = max.max(self.min_chunk_size);
        self.chunk_size = self.chunk_size.clamp(self.min_chunk_size, self.max_chunk_size);
        self
    }

    /// Disables adaptive sizing: every chunk is exactly `bytes` long (except the last).
    pub fn with_fixed_chunk_size(mut self, bytes: u64) -> Self {
        let bytes = bytes.max(1);
        self.chunk_size = bytes;
        self.min_chunk_size = bytes;
        self.max_chunk_size = bytes;
        self
    }

    pub fn with_chunk_target_duration(mut self, ms: u64) -> Self {
        self.chunk_target_duration = Duration::from_millis(ms);
        self
    }

    pub fn with_retry_delays(mut self, delays_ms: &[u64]) -> Self {
        self.retry_delays = delays_ms.iter().copied().map(Duration::from_millis).collect();
        self
    }

    pub fn with_max_retries(mut self, max: Option<u32>) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_event_limit(mut self, limit: usize) -> Self {
        self.event_limit = limit.max(1);
        self
    }

    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule::new(self.retry_delays.clone())
    }
}

/// Tuning for the default throughput-based level policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbrConfig {
    /// Estimated throughput is divided by this before comparing against bitrates.
    pub throughput_safety_factor: f64,
    /// Up-switch requires adjusted throughput of at least `bitrate * up_hysteresis_ratio`.
    pub up_hysteresis_ratio: f64,
    /// Down-switch requires adjusted throughput at most `current_bitrate * down_hysteresis_ratio`.
    pub down_hysteresis_ratio: f64,
    /// Buffer ahead required before switching up.
    pub min_buffer_for_up_switch_secs: f64,
    /// Buffer ahead at or below which a down-switch happens regardless of hysteresis.
    pub urgent_down_switch_buffer_secs: f64,
    /// Minimum spacing between non-urgent switches.
    pub min_switch_interval: Duration,
    pub fast_half_life_secs: f64,
    pub slow_half_life_secs: f64,
    /// Fragments smaller than this are ignored by the estimator.
    pub min_sample_bytes: u64,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            throughput_safety_factor: 1.5,
            up_hysteresis_ratio: 1.3,
            down_hysteresis_ratio: 0.8,
            min_buffer_for_up_switch_secs: 10.0,
            urgent_down_switch_buffer_secs: 5.0,
            min_switch_interval: Duration::from_secs(10),
            fast_half_life_secs: 2.0,
            slow_half_life_secs: 10.0,
            min_sample_bytes: 16_000,
        }
    }
}

/// Configuration for an adaptive playback session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Base URL of the media API serving playback descriptors.
    pub api_base_url: String,
    /// HTTP request timeout for descriptor and manifest fetches.
    pub request_timeout: Duration,
    /// Retries for transient descriptor and manifest fetch failures.
    pub max_retries: u32,
    /// Base backoff for those retries (doubled each attempt).
    pub retry_backoff: Duration,
    /// Played-back media the engine may keep behind the playhead.
    pub back_buffer_length: Duration,
    /// While playing, buffer ahead below this enters Buffering.
    pub low_buffer_secs: f64,
    /// While buffering, buffer ahead at or above this resumes Playing.
    pub resume_buffer_secs: f64,
    /// Recovery attempts within one episode before the session turns fatal.
    pub max_recovery_attempts: u32,
    /// Start playing as soon as the session is Ready.
    pub autoplay: bool,
    /// Start with audio muted.
    pub start_muted: bool,
    pub abr: AbrConfig,
    /// Number of recent events retained per session.
    pub event_limit: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            request_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
            back_buffer_length: Duration::from_secs(90),
            low_buffer_secs: 0.5,
            resume_buffer_secs: 2.0,
            max_recovery_attempts: 5,
            autoplay: true,
            start_muted: true,
            abr: AbrConfig::default(),
            event_limit: 200,
        }
    }
}

impl PlaybackConfig {
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = Duration::from_millis(backoff_ms);
        self
    }

    pub fn with_buffer_thresholds(mut self, low_secs: f64, resume_secs: f64) -> Self {
        self.low_buffer_secs = low_secs.max(0.0);
        self.resume_buffer_secs = resume_secs.max(self.low_buffer_secs);
        self
    }

    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = attempts.max(1);
        self
    }

    pub fn with_autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    pub fn with_start_muted(mut self, muted: bool) -> Self {
        self.start_muted = muted;
        self
    }

    pub fn with_abr(mut self, abr: AbrConfig) -> Self {
        self.abr = abr;
        self
    }
}
