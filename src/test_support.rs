//! Shared helpers for unit and router tests.

use crate::{
    models::{
        metadata::MetadataItem,
        multipart::{CompletedPart, MultipartUpload},
        object::{ObjectSummary, StoredObject},
        upload::{FilePart, SpooledFile},
    },
    services::{
        metadata_store::{MetadataError, MetadataResult, MetadataStore},
        multipart_decoder::{DecodeError, PartSource},
        object_store::{LocalObjectStore, ObjectReader, ObjectStore, StorageError, StorageResult},
    },
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, header},
};
use bytes::Bytes;
use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};
use uuid::Uuid;

pub const BOUNDARY: &str = "gateway-test-boundary";

pub struct TestPart<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    data: &'a [u8],
}

impl<'a> TestPart<'a> {
    pub fn file(name: &'a str, file_name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            data,
        }
    }

    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            file_name: None,
            data: value.as_bytes(),
        }
    }
}

pub fn multipart_body(parts: &[TestPart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        part.name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
            }
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(uri: &str, parts: &[TestPart<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

/// Part source that replays a fixed script without touching HTTP.
pub struct ScriptedSource {
    spool_dir: PathBuf,
    script: VecDeque<Result<(String, Vec<u8>), DecodeError>>,
    hang_when_done: bool,
}

impl ScriptedSource {
    pub fn new(spool_dir: &Path) -> Self {
        Self {
            spool_dir: spool_dir.to_path_buf(),
            script: VecDeque::new(),
            hang_when_done: false,
        }
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.script.push_back(Ok((name.to_string(), data.to_vec())));
        self
    }

    pub fn error(mut self, err: DecodeError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    /// Never signal the end of the body once the script runs out.
    pub fn then_hang(mut self) -> Self {
        self.hang_when_done = true;
        self
    }
}

#[async_trait]
impl PartSource for ScriptedSource {
    async fn next_part(&mut self) -> Result<Option<FilePart>, DecodeError> {
        match self.script.pop_front() {
            None if self.hang_when_done => std::future::pending().await,
            None => Ok(None),
            Some(Err(err)) => Err(err),
            Some(Ok((name, data))) => {
                let path = self.spool_dir.join(format!(".scripted-{}", Uuid::new_v4()));
                std::fs::write(&path, &data)?;
                Ok(Some(FilePart::new(
                    Some(name),
                    data.len() as u64,
                    SpooledFile::new(path),
                )))
            }
        }
    }
}

/// Metadata store whose writes always fail.
pub struct FailingMetadataStore;

#[async_trait]
impl MetadataStore for FailingMetadataStore {
    async fn ensure_table(&self, _table: &str, _partition_key: &str) -> MetadataResult<()> {
        Ok(())
    }

    async fn put_item(&self, table: &str, _item: &MetadataItem) -> MetadataResult<()> {
        Err(MetadataError::TableNotFound(table.to_string()))
    }

    async fn health_check(&self) -> MetadataResult<()> {
        Err(MetadataError::Sqlx(sqlx::Error::PoolClosed))
    }
}

/// Local store that fails part uploads for keys ending in `fail_suffix`
/// and counts how many uploads were started.
pub struct FlakyObjectStore {
    inner: LocalObjectStore,
    fail_suffix: String,
    started: AtomicUsize,
}

impl FlakyObjectStore {
    pub async fn new(base: PathBuf, fail_suffix: &str) -> Self {
        Self {
            inner: LocalObjectStore::open(base, "uploads", "local", "")
                .await
                .unwrap(),
            fail_suffix: fail_suffix.to_string(),
            started: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &LocalObjectStore {
        &self.inner
    }

    pub fn uploads_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn create_multipart_upload(&self, key: &str) -> StorageResult<MultipartUpload> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.inner.create_multipart_upload(key).await
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<CompletedPart> {
        if upload.key.ends_with(&self.fail_suffix) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "simulated storage outage",
            )));
        }
        self.inner.upload_part(upload, part_number, body).await
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<StoredObject> {
        self.inner.complete_multipart_upload(upload, parts).await
    }

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> StorageResult<()> {
        self.inner.abort_multipart_upload(upload).await
    }

    async fn list_objects(&self) -> StorageResult<Vec<ObjectSummary>> {
        Err(StorageError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "simulated listing outage",
        )))
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader> {
        self.inner.get_object(key).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}
