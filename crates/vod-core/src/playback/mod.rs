mod abr;
mod event;
mod fault;
mod manifest;
mod pipeline;
mod session;
mod state;

pub use abr::{AbrDecision, AbrReason, LevelPolicy, ThroughputPolicy, ThroughputSample};
pub use event::PlaybackEvent;
pub use fault::{EngineFault, FaultKind, RecoveryAction};
pub use manifest::{parse_manifest, Manifest, ManifestError, QualityLevel};
pub use pipeline::{Capabilities, MediaPipeline, MediaSource, PipelineEvent, PlaybackMode};
pub use session::PlaybackSession;
pub use state::{LevelSelection, PlaybackPhase, PlaybackSessionState};
