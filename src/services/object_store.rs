//! src/services/object_store.rs
//!
//! Object store client. The `ObjectStore` trait is the narrow surface the
//! upload flow depends on (S3-style multipart upload plus listing and reads);
//! `LocalObjectStore` implements it on local disk, sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}` with in-progress multipart
//! sessions staged under `base_path/.multipart/{upload_id}`.

use crate::models::{
    multipart::{CompletedPart, MultipartUpload},
    object::{ObjectSummary, StoredObject},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("multipart upload `{0}` not found")]
    NoSuchUpload(String),
    #[error("invalid part list: {0}")]
    InvalidPart(String),
    #[error("upload cancelled before completion")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Readable object payload.
pub struct ObjectReader {
    pub size_bytes: u64,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

/// Durable storage for named byte streams in one bucket.
///
/// Implementations must be safe to share between concurrently running upload
/// tasks.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_multipart_upload(&self, key: &str) -> StorageResult<MultipartUpload>;

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<CompletedPart>;

    /// Reassemble parts in part-number order into the final object.
    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<StoredObject>;

    /// Discard all parts uploaded so far.
    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> StorageResult<()>;

    /// Every object currently in the bucket, ordered by key.
    async fn list_objects(&self) -> StorageResult<Vec<ObjectSummary>>;

    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader>;

    async fn health_check(&self) -> StorageResult<()>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_PARTS: u32 = 10_000;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const MULTIPART_DIR: &str = ".multipart";
const TMP_PREFIX: &str = ".tmp-";
pub const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

/// Local-disk bucket with S3-like multipart semantics.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    base_path: PathBuf,
    bucket: String,
    public_url: String,
}

impl LocalObjectStore {
    /// Validate bucket and region, then make sure the on-disk layout exists.
    pub async fn open(
        base_path: impl Into<PathBuf>,
        bucket: &str,
        region: &str,
        public_url: &str,
    ) -> StorageResult<Self> {
        ensure_bucket_name_safe(bucket)?;
        ensure_region_valid(region)?;

        let store = Self {
            base_path: base_path.into(),
            bucket: bucket.to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
        };
        fs::create_dir_all(store.bucket_root()).await?;
        fs::create_dir_all(store.base_path.join(MULTIPART_DIR)).await?;
        Ok(store)
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Two-level shard identifiers from MD5(bucket/key), as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(MULTIPART_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.staging_dir(upload_id)
            .join(format!("part-{:05}", part_number))
    }

    fn location(&self, key: &str) -> String {
        format!("{}/objects/{}", self.public_url, key)
    }

    async fn ensure_upload_exists(&self, upload: &MultipartUpload) -> StorageResult<PathBuf> {
        // Upload ids are issued as UUIDs; anything else would escape the staging dir.
        if Uuid::parse_str(&upload.upload_id).is_err() {
            return Err(StorageError::NoSuchUpload(upload.upload_id.clone()));
        }
        let dir = self.staging_dir(&upload.upload_id);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::NoSuchUpload(upload.upload_id.clone())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NoSuchUpload(upload.upload_id.clone()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Append one staged part to `out`, verifying its etag along the way.
    async fn copy_part(
        &self,
        upload: &MultipartUpload,
        part: &CompletedPart,
        out: &mut File,
    ) -> StorageResult<(md5::Digest, u64)> {
        let path = self.part_path(&upload.upload_id, part.part_number);
        let mut file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::InvalidPart(format!("part {} was never uploaded", part.part_number))
            } else {
                StorageError::Io(err)
            }
        })?;

        let mut digest = md5::Context::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digest.consume(&buf[..n]);
            out.write_all(&buf[..n]).await?;
            size += n as u64;
        }

        let digest = digest.compute();
        if format!("{:x}", digest) != part.etag {
            return Err(StorageError::InvalidPart(format!(
                "etag mismatch for part {}",
                part.part_number
            )));
        }
        Ok((digest, size))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn create_multipart_upload(&self, key: &str) -> StorageResult<MultipartUpload> {
        ensure_key_safe(key)?;
        let upload = MultipartUpload {
            upload_id: Uuid::new_v4().to_string(),
            key: key.to_string(),
        };
        fs::create_dir_all(self.staging_dir(&upload.upload_id)).await?;
        debug!(upload_id = %upload.upload_id, key, "created multipart upload");
        Ok(upload)
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<CompletedPart> {
        if part_number == 0 || part_number > MAX_PARTS {
            return Err(StorageError::InvalidPart(format!(
                "part number {} outside 1..={}",
                part_number, MAX_PARTS
            )));
        }
        let dir = self.ensure_upload_exists(upload).await?;

        // Write beside the final name so a half-written part is never visible.
        let tmp_path = dir.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        if let Err(err) = fs::write(&tmp_path, &body).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, self.part_path(&upload.upload_id, part_number)).await
        {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        Ok(CompletedPart {
            part_number,
            size_bytes: body.len() as u64,
            etag: format!("{:x}", md5::compute(&body)),
        })
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<StoredObject> {
        ensure_key_safe(&upload.key)?;
        let staging = self.ensure_upload_exists(upload).await?;
        if parts.is_empty() {
            return Err(StorageError::InvalidPart("no parts supplied".into()));
        }
        if parts
            .windows(2)
            .any(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(StorageError::InvalidPart(
                "parts must be in ascending part-number order".into(),
            ));
        }

        let file_path = self.object_path(&upload.key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        // Assemble inside the staging dir; the bucket tree only ever sees the rename.
        let tmp_path = staging.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes = 0u64;
        let mut digests = Vec::with_capacity(parts.len() * 16);
        for part in &parts {
            match self.copy_part(upload, part, &mut file).await {
                Ok((digest, size)) => {
                    digests.extend_from_slice(&digest.0);
                    size_bytes += size;
                }
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(err);
                }
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        if let Err(err) = fs::remove_dir_all(&staging).await {
            debug!(
                "failed to remove staging dir {} after complete: {}",
                staging.display(),
                err
            );
        }

        Ok(StoredObject {
            bucket: self.bucket.clone(),
            key: upload.key.clone(),
            location: self.location(&upload.key),
            size_bytes,
            etag: format!("{:x}-{}", md5::compute(&digests), parts.len()),
            last_modified: Utc::now(),
        })
    }

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> StorageResult<()> {
        let staging = self.ensure_upload_exists(upload).await?;
        fs::remove_dir_all(&staging).await?;
        debug!(upload_id = %upload.upload_id, key = %upload.key, "aborted multipart upload");
        Ok(())
    }

    async fn list_objects(&self) -> StorageResult<Vec<ObjectSummary>> {
        let root = self.bucket_root();
        let mut objects = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = key_from_path(&root, &path) else {
                    continue;
                };
                let meta = entry.metadata().await?;
                let last_modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                objects.push(ObjectSummary {
                    key,
                    size_bytes: meta.len(),
                    last_modified,
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        let size_bytes = file.metadata().await?.len();

        Ok(ObjectReader {
            size_bytes,
            stream: ReaderStream::new(file).boxed(),
        })
    }

    /// Write/read/delete a probe file under `base_path`.
    async fn health_check(&self) -> StorageResult<()> {
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let bytes = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if bytes? != b"readyz" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}

/// Recover an object key from `root/{shard}/{shard}/{key...}`.
fn key_from_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.len() < 3 {
        return None;
    }
    Some(segments[2..].join("/"))
}

/// Reject keys that could escape the bucket directory.
///
/// Keys may contain `/` (nested paths) but no empty, `.` or `..` segments,
/// no leading slash, no backslashes and no control characters.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    let invalid = || StorageError::InvalidObjectKey(key.to_string());
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(invalid());
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid());
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(invalid());
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if len < BUCKET_NAME_MIN_LEN || len > BUCKET_NAME_MAX_LEN {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Case-insensitive check against `SUPPORTED_REGIONS`.
pub fn ensure_region_valid(region: &str) -> StorageResult<()> {
    if SUPPORTED_REGIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(region))
    {
        Ok(())
    } else {
        Err(StorageError::UnsupportedRegion(region.to_string()))
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}
