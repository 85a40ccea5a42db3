use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mime::Mime;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Random-access byte source backing an upload.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn read_range(&self, offset: u64, len: u64) -> io::Result<Bytes>;
}

struct MemorySource(Bytes);

#[async_trait]
impl ChunkSource for MemorySource {
    async fn read_range(&self, offset: u64, len: u64) -> io::Result<Bytes> {
        let size = self.0.len() as u64;
        if offset > size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("offset {offset} past end of {size}-byte buffer"),
            ));
        }
        let end = offset.saturating_add(len).min(size);
        Ok(self.0.slice(offset as usize..end as usize))
    }
}

struct DiskSource(PathBuf);

#[async_trait]
impl ChunkSource for DiskSource {
    async fn read_range(&self, offset: u64, len: u64) -> io::Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.0).await?;
        file.seek(io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// A file picked for upload: name, declared media type, size, and its bytes.
#[derive(Clone)]
pub struct MediaFile {
    pub name: String,
    pub media_type: String,
    pub size: u64,
    source: Arc<dyn ChunkSource>,
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl MediaFile {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        size: u64,
        source: Arc<dyn ChunkSource>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size,
            source,
        }
    }

    pub fn from_bytes(
        name: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(name, media_type, size, Arc::new(MemorySource(data)))
    }

    /// Opens a file on disk, guessing the media type from its extension.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(
            name,
            media_type_for(path),
            meta.len(),
            Arc::new(DiskSource(path.to_path_buf())),
        ))
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    /// The declared media type, parsed.
    pub fn mime(&self) -> Result<Mime, mime::FromStrError> {
        self.media_type.trim().parse()
    }

    pub fn is_video(&self) -> bool {
        self.mime()
            .is_ok_and(|m| m.type_() == mime::VIDEO && !m.subtype().as_str().is_empty())
    }

    pub async fn read_range(&self, offset: u64, len: u64) -> io::Result<Bytes> {
        self.source.read_range(offset, len).await
    }
}

fn media_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
