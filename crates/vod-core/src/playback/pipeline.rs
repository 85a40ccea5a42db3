use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::fault::EngineFault;

/// What the runtime's media stack can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Segment-level adaptive playback driven by this session.
    pub adaptive: bool,
    /// The runtime plays HLS manifests natively, without level control.
    pub native_hls: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    Adaptive,
    /// Degraded: the manifest URL is handed to the runtime as-is.
    Direct,
}

/// Everything the pipeline needs to load one piece of content.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSource {
    pub manifest_url: String,
    /// Attached as a bearer credential to every manifest and segment fetch.
    pub bearer_token: String,
    pub back_buffer: Duration,
}

/// The media engine the session drives.
#[async_trait]
pub trait MediaPipeline: Send {
    fn capabilities(&self) -> Capabilities;

    async fn attach(&mut self, source: &MediaSource, mode: PlaybackMode) -> Result<(), EngineFault>;

    /// (Re)issues manifest and segment loading starting at `position_secs`.
    async fn start_load(&mut self, position_secs: f64) -> Result<(), EngineFault>;

    /// Reinitializes the decode pipeline in place.
    async fn recover_media(&mut self) -> Result<(), EngineFault>;

    async fn set_level(&mut self, index: usize);

    async fn play(&mut self);

    async fn pause(&mut self);

    async fn seek(&mut self, position_secs: f64);

    async fn set_volume(&mut self, volume: f64, muted: bool);

    async fn destroy(&mut self);
}

/// Notifications flowing from the pipeline back into the session.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    MetadataLoaded {
        duration_secs: f64,
    },
    TimeUpdate {
        position_secs: f64,
        buffered_ahead_secs: f64,
    },
    FragmentLoaded {
        level: usize,
        bytes: u64,
        elapsed: Duration,
        duration_secs: f64,
    },
    /// The engine switched levels on its own.
    LevelSwitched {
        level: usize,
    },
    Fault(EngineFault),
    Ended,
}
