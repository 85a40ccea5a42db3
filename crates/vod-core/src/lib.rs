#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod transport;
pub mod upload;
pub mod webhook;

pub use config::{AbrConfig, PlaybackConfig, UploadConfig};
pub use error::{ErrorKind, SessionError};
pub use events::{EventHub, EventRing, RecordedEvent};
pub use playback::{
    parse_manifest, AbrDecision, AbrReason, Capabilities, EngineFault, FaultKind, LevelPolicy,
    LevelSelection, Manifest, ManifestError, MediaPipeline, MediaSource, PipelineEvent,
    PlaybackEvent, PlaybackMode, PlaybackPhase, PlaybackSession, PlaybackSessionState,
    QualityLevel, RecoveryAction, ThroughputPolicy, ThroughputSample,
};
pub use transport::{
    CreateRequest, CreatedResource, Credential, CredentialProvider, HttpClient, PlaybackApi,
    PlaybackDescriptor, StaticCredentials, TransportError, UploadTransport,
};
pub use upload::{
    fingerprint, ChunkSizer, ChunkSource, FileResumeStore, MediaFile, MemoryResumeStore,
    ResumeStore, ResumeStoreError, RetrySchedule, UploadEvent, UploadResource, UploadSession,
    UploadSessionState, UploadStatus,
};
pub use webhook::{
    notification_channel, Notification, WebhookConfig, WebhookDispatcher, WebhookPayload,
};
