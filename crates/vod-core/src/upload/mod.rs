mod chunk;
mod event;
mod file;
mod resume;
mod retry;
mod session;
mod state;

pub use chunk::ChunkSizer;
pub use event::UploadEvent;
pub use file::{ChunkSource, MediaFile};
pub use resume::{fingerprint, FileResumeStore, MemoryResumeStore, ResumeStore, ResumeStoreError};
pub use retry::RetrySchedule;
pub use session::UploadSession;
pub use state::{UploadResource, UploadSessionState, UploadStatus};
