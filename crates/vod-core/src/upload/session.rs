use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{watch, Notify, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::chunk::ChunkSizer;
use super::event::UploadEvent;
use super::file::MediaFile;
use super::resume::{fingerprint, ResumeStore};
use super::retry::RetrySchedule;
use super::state::{percent, UploadResource, UploadSessionState, UploadStatus};
use crate::config::UploadConfig;
use crate::error::{ErrorKind, SessionError};
use crate::events::{EventHub, RecordedEvent};
use crate::transport::{CreateRequest, TransportError, UploadTransport};
use crate::webhook::Notification;

/// Resumable upload of one file.
///
/// Operations return immediately; the create and transfer exchanges run on a
/// spawned task, one exchange at a time. Every run is tagged with an epoch and
/// any response arriving after `abort()` (or a newer run) is discarded.
pub struct UploadSession {
    id: Uuid,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    state: UploadSessionState,
    file: Option<MediaFile>,
}

struct Shared {
    session_id: Uuid,
    config: UploadConfig,
    schedule: RetrySchedule,
    transport: Arc<dyn UploadTransport>,
    resume_store: Arc<dyn ResumeStore>,
    inner: RwLock<Inner>,
    events: EventHub<UploadEvent>,
    epoch: AtomicU64,
    pause_requested: AtomicBool,
    pause_notify: Notify,
    /// Epoch of the run task currently alive, if any.
    running: watch::Sender<Option<u64>>,
    notification_tx: Option<UnboundedSender<Notification>>,
}

enum Flow {
    Completed(UploadResource),
    Paused,
    Cancelled,
}

impl UploadSession {
    pub fn new(
        config: UploadConfig,
        transport: Arc<dyn UploadTransport>,
        resume_store: Arc<dyn ResumeStore>,
        notification_tx: Option<UnboundedSender<Notification>>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (running, _) = watch::channel(None);
        let shared = Shared {
            session_id: id,
            schedule: config.retry_schedule(),
            events: EventHub::new(config.event_limit),
            config,
            transport,
            resume_store,
            inner: RwLock::new(Inner {
                state: UploadSessionState::default(),
                file: None,
            }),
            epoch: AtomicU64::new(0),
            pause_requested: AtomicBool::new(false),
            pause_notify: Notify::new(),
            running,
            notification_tx,
        };
        Self {
            id,
            shared: Arc::new(shared),
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &UploadConfig {
        &self.shared.config
    }

    pub async fn state(&self) -> UploadSessionState {
        self.shared.inner.read().await.state.clone()
    }

    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<UploadEvent> {
        self.shared.events.subscribe()
    }

    pub fn history(&self) -> Vec<RecordedEvent<UploadEvent>> {
        self.shared.events.history()
    }

    /// Replaces the selected file. Non-video files are rejected without any network call.
    pub async fn select_file(&self, file: MediaFile) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.write().await;
        let status = inner.state.status;
        if status.is_active() || status == UploadStatus::Paused {
            return Err(SessionError::invalid_state(format!(
                "cannot select a new file while the upload is {status}"
            )));
        }

        if !file.is_video() {
            let error = match file.mime() {
                Ok(_) => SessionError::validation(format!(
                    "{} has media type '{}', expected a video",
                    file.name, file.media_type
                )),
                Err(e) => SessionError::validation(format!(
                    "{} has an invalid media type '{}': {e}",
                    file.name, file.media_type
                )),
            };
            debug!(session_id = %self.id, file = %file.name, "Rejected non-video file");
            inner.file = None;
            inner.state = UploadSessionState {
                status,
                last_error: Some(error.clone()),
                ..UploadSessionState::default()
            };
            self.shared.set_status(&mut inner, UploadStatus::Idle);
            return Err(error);
        }

        debug!(session_id = %self.id, file = %file.name, size = file.size, "File selected");
        inner.state = UploadSessionState {
            status,
            file_name: Some(file.name.clone()),
            total_size: file.size,
            ..UploadSessionState::default()
        };
        inner.file = Some(file);
        self.shared.set_status(&mut inner, UploadStatus::Idle);
        Ok(())
    }

    /// Creates (or recognizes) the server resource and starts transferring.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.write().await;
        let status = inner.state.status;
        if !status.can_transition_to(UploadStatus::Creating) {
            return Err(SessionError::invalid_state(format!(
                "cannot start an upload that is {status}"
            )));
        }
        let Some((name, size)) = inner.file.as_ref().map(|f| (f.name.clone(), f.size)) else {
            return Err(SessionError::validation("no file selected"));
        };

        inner.state = UploadSessionState {
            status,
            file_name: Some(name),
            total_size: size,
            ..UploadSessionState::default()
        };
        let epoch = self.shared.begin_run();
        self.shared.set_status(&mut inner, UploadStatus::Creating);
        drop(inner);

        info!(session_id = %self.id, size, "Upload started");
        self.spawn(epoch);
        Ok(())
    }

    /// Stops issuing chunks. An exchange already in flight completes and is applied.
    pub async fn pause(&self) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.write().await;
        let status = inner.state.status;
        if status != UploadStatus::Uploading {
            return Err(SessionError::invalid_state(format!(
                "cannot pause an upload that is {status}"
            )));
        }
        self.shared.pause_requested.store(true, Ordering::SeqCst);
        self.shared.set_status(&mut inner, UploadStatus::Paused);
        drop(inner);

        self.shared.pause_notify.notify_waiters();
        info!(session_id = %self.id, "Upload paused");
        Ok(())
    }

    /// Continues from the committed offset once the paused run has wound down.
    pub async fn resume(&self) -> Result<(), SessionError> {
        let not_paused = |status: UploadStatus| {
            SessionError::invalid_state(format!("cannot resume an upload that is {status}"))
        };

        let status = self.shared.inner.read().await.state.status;
        if status != UploadStatus::Paused {
            return Err(not_paused(status));
        }

        self.shared.wait_idle().await;

        let mut inner = self.shared.inner.write().await;
        let status = inner.state.status;
        if status != UploadStatus::Paused {
            return Err(not_paused(status));
        }
        let epoch = self.shared.begin_run();
        self.shared.set_status(&mut inner, UploadStatus::Uploading);
        let committed = inner.state.committed_offset;
        drop(inner);

        info!(session_id = %self.id, committed, "Upload resumed");
        self.spawn(epoch);
        Ok(())
    }

    /// Cancels any in-flight exchange and returns to Idle with nothing selected.
    ///
    /// The server resource is left alone; a later upload of the same file can resume it.
    pub async fn abort(&self) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.write().await;
        let status = inner.state.status;
        if status.is_terminal() {
            return Err(SessionError::invalid_state(format!(
                "cannot abort an upload that is {status}"
            )));
        }

        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.running.send_replace(None);
        inner.file = None;
        inner.state = UploadSessionState {
            status,
            ..UploadSessionState::default()
        };
        self.shared.set_status(&mut inner, UploadStatus::Idle);
        drop(inner);

        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
        self.shared.pause_notify.notify_waiters();
        info!(session_id = %self.id, from = %status, "Upload aborted");
        Ok(())
    }

    /// Waits until no run task is active (finished, paused, failed, or aborted).
    pub async fn join(&self) {
        self.shared.wait_idle().await;
    }

    fn spawn(&self, epoch: u64) {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run(shared, epoch));
        *self.lock_task() = Some(handle);
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
    }
}

struct RunGuard {
    shared: Arc<Shared>,
    epoch: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let epoch = self.epoch;
        self.shared.running.send_if_modified(|current| {
            if *current == Some(epoch) {
                *current = None;
                true
            } else {
                false
            }
        });
    }
}

async fn run(shared: Arc<Shared>, epoch: u64) {
    let _guard = RunGuard {
        shared: Arc::clone(&shared),
        epoch,
    };
    if let Err(error) = shared.drive(epoch).await {
        shared.fail(epoch, error).await;
    }
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Must be called with the state lock held.
    fn begin_run(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.pause_requested.store(false, Ordering::SeqCst);
        self.running.send_replace(Some(epoch));
        epoch
    }

    async fn wait_idle(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(Option::is_none).await;
    }

    fn set_status(&self, inner: &mut RwLockWriteGuard<'_, Inner>, status: UploadStatus) {
        let from = inner.state.status;
        if from == status {
            return;
        }
        inner.state.status = status;
        debug!(session_id = %self.session_id, %from, to = %status, "Upload status changed");
        self.events.emit(UploadEvent::StatusChanged { status });
    }

    fn commit(&self, inner: &mut RwLockWriteGuard<'_, Inner>, resource: &UploadResource) {
        inner.state.committed_offset = resource.committed_offset;
        inner.state.local_offset = resource.committed_offset;
        inner.state.retry_count = 0;
        inner.state.resource = Some(resource.clone());
        self.events.emit(UploadEvent::Progress {
            committed_offset: resource.committed_offset,
            total_size: resource.total_size,
            percent: percent(resource.committed_offset, resource.total_size),
        });
    }

    fn retry_budget(&self, attempt: u32, error: &TransportError) -> Result<(), SessionError> {
        match self.config.max_retries {
            Some(max) if attempt > max => {
                let err = SessionError::new(
                    ErrorKind::Network,
                    format!("giving up after {max} retries: {error}"),
                );
                Err(match error.status_code() {
                    Some(code) => err.with_status_code(code),
                    None => err,
                })
            }
            _ => Ok(()),
        }
    }

    /// Sleeps before retry `attempt` (1-based); a pause request cuts the wait short.
    async fn backoff(&self, attempt: u32) {
        let delay = self.schedule.delay_for(attempt.saturating_sub(1));
        let notified = self.pause_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.pause_requested.load(Ordering::SeqCst) {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut notified => {}
        }
    }

    async fn drive(&self, epoch: u64) -> Result<(), SessionError> {
        let (file, existing) = {
            let inner = self.inner.read().await;
            if !self.is_current(epoch) {
                return Ok(());
            }
            let Some(file) = inner.file.clone() else {
                return Err(SessionError::validation("no file selected"));
            };
            (file, inner.state.resource.clone())
        };
        let fingerprint = fingerprint(&self.config.endpoint, &file.name, &file.media_type, file.size);

        let resource = match existing {
            Some(resource) => resource,
            None => match self.create(epoch, &file, &fingerprint).await? {
                Some(resource) => resource,
                None => return Ok(()),
            },
        };

        match self.transfer_all(epoch, &file, resource).await? {
            Flow::Completed(resource) => {
                self.succeed(epoch, &resource).await;
                if let Err(e) = self.resume_store.remove(&fingerprint).await {
                    warn!(session_id = %self.session_id, error = %e, "Failed to clear resume entry");
                }
            }
            Flow::Paused => {
                debug!(session_id = %self.session_id, "Transfer loop stopped for pause");
            }
            Flow::Cancelled => {
                debug!(session_id = %self.session_id, "Discarded response from a cancelled run");
            }
        }
        Ok(())
    }

    async fn create(
        &self,
        epoch: u64,
        file: &MediaFile,
        fingerprint: &str,
    ) -> Result<Option<UploadResource>, SessionError> {
        let resume_url = match self.resume_store.find(fingerprint).await {
            Ok(url) => url,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Resume store lookup failed");
                None
            }
        };
        let mut metadata = self.config.metadata.clone();
        metadata.insert("filename".to_string(), file.name.clone());
        metadata.insert("filetype".to_string(), file.media_type.clone());
        let request = CreateRequest {
            endpoint: self.config.endpoint.clone(),
            total_size: file.size,
            metadata,
            resume_url,
        };

        let mut attempt = 0u32;
        loop {
            let result = self.transport.create(&request).await;
            let mut inner = self.inner.write().await;
            if !self.is_current(epoch) {
                return Ok(None);
            }

            match result {
                Ok(created) => {
                    if created.committed_offset > file.size {
                        return Err(SessionError::protocol(format!(
                            "server holds {} bytes of a {}-byte file",
                            created.committed_offset, file.size
                        )));
                    }
                    let resource = UploadResource {
                        resource_id: created.resource_id,
                        url: created.url,
                        total_size: file.size,
                        committed_offset: created.committed_offset,
                    };
                    inner.state.resource = Some(resource.clone());
                    inner.state.committed_offset = resource.committed_offset;
                    inner.state.local_offset = resource.committed_offset;
                    inner.state.retry_count = 0;
                    self.events.emit(UploadEvent::Created {
                        resource_id: resource.resource_id.clone(),
                        committed_offset: resource.committed_offset,
                    });
                    self.set_status(&mut inner, UploadStatus::Uploading);
                    if resource.committed_offset > 0 {
                        self.commit(&mut inner, &resource);
                    }
                    drop(inner);

                    info!(
                        session_id = %self.session_id,
                        resource_id = %resource.resource_id,
                        committed_offset = resource.committed_offset,
                        "Upload resource ready"
                    );
                    if let Err(e) = self.resume_store.save(fingerprint, &resource.url).await {
                        warn!(session_id = %self.session_id, error = %e, "Failed to record resume entry");
                    }
                    return Ok(Some(resource));
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    inner.state.retry_count = attempt;
                    self.retry_budget(attempt, &e)?;
                    drop(inner);
                    warn!(session_id = %self.session_id, attempt, error = %e, "Create failed, retrying");
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(SessionError::from_transport(&e)),
            }
        }
    }

    async fn transfer_all(
        &self,
        epoch: u64,
        file: &MediaFile,
        mut resource: UploadResource,
    ) -> Result<Flow, SessionError> {
        let mut sizer = ChunkSizer::from_config(&self.config);
        let mut attempt = 0u32;

        loop {
            let offset = resource.committed_offset;
            if offset >= resource.total_size {
                return Ok(Flow::Completed(resource));
            }
            if self.pause_requested.load(Ordering::SeqCst) {
                return Ok(Flow::Paused);
            }

            let len = sizer.next_len(offset, resource.total_size);
            let chunk = file.read_range(offset, len).await.map_err(|e| {
                SessionError::fatal(format!("failed to read {} at offset {offset}: {e}", file.name))
            })?;
            if chunk.len() as u64 != len {
                return Err(SessionError::fatal(format!(
                    "{} is shorter than its declared size",
                    file.name
                )));
            }
            {
                let mut inner = self.inner.write().await;
                if !self.is_current(epoch) {
                    return Ok(Flow::Cancelled);
                }
                inner.state.local_offset = offset + len;
            }

            let started = Instant::now();
            let result = self.transport.transfer(&resource, offset, chunk).await;
            let elapsed = started.elapsed();

            let mut inner = self.inner.write().await;
            if !self.is_current(epoch) {
                return Ok(Flow::Cancelled);
            }

            match result {
                Ok(acked) if acked == offset + len => {
                    sizer.record_success(elapsed);
                    attempt = 0;
                    resource.committed_offset = acked;
                    self.commit(&mut inner, &resource);
                    debug!(
                        session_id = %self.session_id,
                        committed_offset = acked,
                        elapsed_ms = elapsed.as_millis(),
                        next_chunk = sizer.current(),
                        "Chunk committed"
                    );
                }
                Ok(acked) => {
                    return Err(SessionError::protocol(format!(
                        "server acknowledged offset {acked} for a chunk ending at {}",
                        offset + len
                    )));
                }
                Err(TransportError::OffsetConflict { server_offset, .. })
                    if server_offset > offset && server_offset <= resource.total_size =>
                {
                    warn!(
                        session_id = %self.session_id,
                        committed_offset = offset,
                        server_offset,
                        "Server is ahead of the committed offset, adopting it"
                    );
                    attempt = 0;
                    resource.committed_offset = server_offset;
                    self.commit(&mut inner, &resource);
                }
                Err(e) if e.is_transient() => {
                    if matches!(e, TransportError::Timeout { .. }) {
                        sizer.record_timeout();
                    }
                    attempt += 1;
                    inner.state.local_offset = inner.state.committed_offset;
                    inner.state.retry_count = attempt;
                    self.retry_budget(attempt, &e)?;
                    drop(inner);
                    warn!(
                        session_id = %self.session_id,
                        offset,
                        attempt,
                        error = %e,
                        "Chunk transfer failed, retrying"
                    );
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(SessionError::from_transport(&e)),
            }
        }
    }

    async fn succeed(&self, epoch: u64, resource: &UploadResource) {
        let mut inner = self.inner.write().await;
        if !self.is_current(epoch) {
            return;
        }
        if resource.total_size == 0 {
            self.commit(&mut inner, resource);
        }
        inner.state.upload_url = Some(resource.url.clone());
        self.set_status(&mut inner, UploadStatus::Succeeded);
        self.events.emit(UploadEvent::Succeeded {
            url: resource.url.clone(),
        });
        let file_name = inner.state.file_name.clone().unwrap_or_default();
        drop(inner);

        info!(session_id = %self.session_id, url = %resource.url, "Upload succeeded");
        self.notify(Notification::UploadSucceeded {
            session_id: self.session_id.to_string(),
            file_name,
            total_size: resource.total_size,
            url: resource.url.clone(),
        });
    }

    async fn fail(&self, epoch: u64, error: SessionError) {
        let mut inner = self.inner.write().await;
        if !self.is_current(epoch) {
            return;
        }
        inner.state.local_offset = inner.state.committed_offset;
        inner.state.last_error = Some(error.clone());
        self.set_status(&mut inner, UploadStatus::Failed);
        self.events.emit(UploadEvent::Failed {
            error: error.clone(),
        });
        let file_name = inner.state.file_name.clone().unwrap_or_default();
        drop(inner);

        warn!(session_id = %self.session_id, kind = %error.kind, error = %error.message, "Upload failed");
        self.notify(Notification::UploadFailed {
            session_id: self.session_id.to_string(),
            file_name,
            error,
        });
    }

    fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.notification_tx {
            let _ = tx.send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CreatedResource;
    use crate::upload::MemoryResumeStore;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct OkTransport;

    #[async_trait]
    impl UploadTransport for OkTransport {
        async fn create(&self, _: &CreateRequest) -> Result<CreatedResource, TransportError> {
            Ok(CreatedResource {
                resource_id: "r1".into(),
                url: "https://u.example.com/files/r1".into(),
                committed_offset: 0,
            })
        }

        async fn transfer(
            &self,
            _: &UploadResource,
            offset: u64,
            chunk: Bytes,
        ) -> Result<u64, TransportError> {
            Ok(offset + chunk.len() as u64)
        }
    }

    fn session() -> UploadSession {
        UploadSession::new(
            UploadConfig::default().with_fixed_chunk_size(4),
            Arc::new(OkTransport),
            Arc::new(MemoryResumeStore::new()),
            None,
        )
    }

    #[tokio::test]
    async fn start_without_file_is_validation_error() {
        let err = session().start().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn pause_requires_uploading() {
        let err = session().pause().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn resume_requires_paused() {
        let err = session().resume().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn zero_byte_file_succeeds_at_full_progress() {
        let s = session();
        s.select_file(MediaFile::from_bytes("empty.mp4", "video/mp4", Vec::<u8>::new()))
            .await
            .unwrap();
        s.start().await.unwrap();
        s.join().await;

        let state = s.state().await;
        assert_eq!(state.status, UploadStatus::Succeeded);
        assert_eq!(state.percent(), 100.0);
        assert!(s.history().iter().any(|r| matches!(
            r.event,
            UploadEvent::Progress { percent, .. } if percent == 100.0
        )));
    }

    #[tokio::test]
    async fn succeeded_session_cannot_be_aborted() {
        let s = session();
        s.select_file(MediaFile::from_bytes("a.mp4", "video/mp4", vec![1u8; 10]))
            .await
            .unwrap();
        s.start().await.unwrap();
        s.join().await;
        assert_eq!(s.state().await.status, UploadStatus::Succeeded);
        assert_eq!(s.abort().await.unwrap_err().kind, ErrorKind::InvalidState);
    }
}
