//! Multipart decoder: turns a `multipart/form-data` body into [`FilePart`]s.
//!
//! Each file part is spooled to disk as it arrives so the upload for it can
//! start while the rest of the body is still being read. Non-file fields are
//! skipped.

use crate::models::upload::{FilePart, SpooledFile};
use async_trait::async_trait;
use axum::extract::Multipart;
use std::{io, path::PathBuf};
use thiserror::Error;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed multipart body: {0}")]
    Malformed(String),
    #[error("file `{file_name}` exceeds the maximum size of {limit} bytes")]
    FileTooLarge { file_name: String, limit: u64 },
    #[error("uploaded files exceed the total limit of {limit} bytes")]
    TotalTooLarge { limit: u64 },
    #[error("file `{0}` is empty")]
    EmptyFile(String),
    #[error("failed to spool upload: {0}")]
    Spool(#[from] io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderLimits {
    pub max_file_size: u64,
    pub max_total_file_size: u64,
    pub allow_empty_files: bool,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_total_file_size: DEFAULT_MAX_FILE_SIZE,
            allow_empty_files: false,
        }
    }
}

/// Anything that yields file parts one at a time, in arrival order.
#[async_trait]
pub trait PartSource: Send {
    /// `Ok(None)` once the body is exhausted.
    async fn next_part(&mut self) -> Result<Option<FilePart>, DecodeError>;
}

pub struct MultipartDecoder {
    multipart: Multipart,
    limits: DecoderLimits,
    spool_dir: PathBuf,
    total_bytes: u64,
}

impl MultipartDecoder {
    pub fn new(multipart: Multipart, limits: DecoderLimits, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            multipart,
            limits,
            spool_dir: spool_dir.into(),
            total_bytes: 0,
        }
    }
}

#[async_trait]
impl PartSource for MultipartDecoder {
    async fn next_part(&mut self) -> Result<Option<FilePart>, DecodeError> {
        loop {
            let Some(mut field) = self
                .multipart
                .next_field()
                .await
                .map_err(|err| DecodeError::Malformed(err.body_text()))?
            else {
                return Ok(None);
            };

            let Some(file_name) = field.file_name().map(str::to_owned) else {
                debug!(field = ?field.name(), "skipping non-file field");
                continue;
            };

            let spool = SpooledFile::new(
                self.spool_dir
                    .join(format!(".upload-{}", Uuid::new_v4())),
            );
            let mut file = File::create(spool.path()).await?;
            let mut size = 0u64;

            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|err| DecodeError::Malformed(err.body_text()))?
            {
                size += chunk.len() as u64;
                self.total_bytes += chunk.len() as u64;
                if size > self.limits.max_file_size {
                    return Err(DecodeError::FileTooLarge {
                        file_name,
                        limit: self.limits.max_file_size,
                    });
                }
                if self.total_bytes > self.limits.max_total_file_size {
                    return Err(DecodeError::TotalTooLarge {
                        limit: self.limits.max_total_file_size,
                    });
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;

            if size == 0 && !self.limits.allow_empty_files {
                return Err(DecodeError::EmptyFile(file_name));
            }

            debug!(file_name = %file_name, size, "decoded file part");
            return Ok(Some(FilePart::new(Some(file_name), size, spool)));
        }
    }
}
