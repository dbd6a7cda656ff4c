//! Per-request upload entities: decoded file parts, generated keys and outcomes.

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::{
    fmt, io,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// One file extracted from a multipart body, spooled to local disk.
///
/// Consumed exactly once by [`FilePart::into_stream`]; the spool file goes away
/// when the part (or its stream) is dropped.
#[derive(Debug)]
pub struct FilePart {
    pub original_filename: Option<String>,
    pub size_bytes: u64,
    spool: SpooledFile,
}

impl FilePart {
    pub fn new(original_filename: Option<String>, size_bytes: u64, spool: SpooledFile) -> Self {
        Self {
            original_filename,
            size_bytes,
            spool,
        }
    }

    /// Filename as sent by the client, empty when absent.
    pub fn file_name(&self) -> &str {
        self.original_filename.as_deref().unwrap_or("")
    }

    /// Open the spooled bytes as a stream of chunks.
    pub async fn into_stream(self) -> io::Result<PartStream> {
        let file = File::open(self.spool.path()).await?;
        Ok(PartStream {
            inner: ReaderStream::with_capacity(file, READ_CHUNK_SIZE),
            _spool: self.spool,
        })
    }
}

/// Temp file owned by a single part. Removed on drop.
#[derive(Debug)]
pub struct SpooledFile {
    path: PathBuf,
}

impl SpooledFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpooledFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!("failed to remove spool file {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Byte stream over a spooled part. Keeps the spool file alive while reading.
pub struct PartStream {
    inner: ReaderStream<File>,
    _spool: SpooledFile,
}

impl Stream for PartStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// Key of the stored copy: a fresh random token followed by the original filename.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StoredObjectKey(String);

impl StoredObjectKey {
    pub fn generate(original_filename: &str) -> Self {
        Self(format!("{}-{}", Uuid::new_v4(), original_filename))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoredObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of storing one file whose metadata was also committed.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadResult {
    pub file_name: String,
    pub key: String,
    pub location: String,
    pub size_bytes: u64,
    pub etag: String,
}

/// Per-file status reported back to the caller when a request fails.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FileOutcome {
    /// Position of the part in the multipart stream (arrival order).
    pub index: usize,
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(flatten)]
    pub status: FileStatus,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Stored {
        location: String,
    },
    Failed {
        stage: FailureStage,
        error: String,
    },
    /// The request was aborted; `object_stored` marks an object left without metadata.
    Cancelled {
        object_stored: bool,
    },
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Storage,
    Metadata,
    Task,
}
