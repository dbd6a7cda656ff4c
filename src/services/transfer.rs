//! Chunked transfer of one byte stream into the object store.
//!
//! The stream is cut into fixed-size parts which are uploaded with bounded
//! concurrency and then reassembled by the store in part-number order.

use crate::{
    models::{
        multipart::{CompletedPart, MultipartUpload},
        object::StoredObject,
    },
    services::object_store::{ObjectStore, StorageError, StorageResult},
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, future::BoxFuture, pin_mut, stream::FuturesUnordered};
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_QUEUE_SIZE: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferOptions {
    /// Bytes per uploaded part (the final part may be shorter).
    pub part_size: usize,
    /// Maximum parts in flight at once.
    pub queue_size: usize,
    /// Keep already-uploaded parts when the transfer fails.
    pub leave_parts_on_error: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            queue_size: DEFAULT_QUEUE_SIZE,
            leave_parts_on_error: false,
        }
    }
}

/// Upload `stream` under `key` as a multipart upload.
///
/// Cancelling `cancel` before completion aborts the upload and returns
/// [`StorageError::Cancelled`]. On any failure the staged parts are discarded
/// unless `leave_parts_on_error` is set; parts already handed to the store
/// settle before the abort runs.
pub async fn upload_stream<S>(
    store: &dyn ObjectStore,
    key: &str,
    stream: S,
    options: TransferOptions,
    cancel: &CancellationToken,
) -> StorageResult<StoredObject>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let upload = store.create_multipart_upload(key).await?;

    let result = match send_parts(store, &upload, stream, options, cancel).await {
        Ok(_) if cancel.is_cancelled() => Err(StorageError::Cancelled),
        Ok(parts) => store.complete_multipart_upload(&upload, parts).await,
        Err(err) => Err(err),
    };

    if result.is_err() && !options.leave_parts_on_error {
        if let Err(abort_err) = store.abort_multipart_upload(&upload).await {
            warn!(
                upload_id = %upload.upload_id,
                key,
                error = %abort_err,
                "failed to abort multipart upload"
            );
        }
    }
    result
}

async fn send_parts<S>(
    store: &dyn ObjectStore,
    upload: &MultipartUpload,
    stream: S,
    options: TransferOptions,
    cancel: &CancellationToken,
) -> StorageResult<Vec<CompletedPart>>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let part_size = options.part_size.max(1);
    let queue_size = options.queue_size.max(1);

    let mut in_flight: FuturesUnordered<BoxFuture<'_, StorageResult<CompletedPart>>> =
        FuturesUnordered::new();
    let mut completed = Vec::new();

    let sent: StorageResult<()> = async {
        let mut buffer = BytesMut::with_capacity(part_size);
        let mut part_number = 0u32;

        pin_mut!(stream);
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            buffer.extend_from_slice(&chunk?);

            while buffer.len() >= part_size {
                if in_flight.len() >= queue_size {
                    completed.push(next_completed(&mut in_flight, cancel).await?);
                }
                part_number += 1;
                let body = buffer.split_to(part_size).freeze();
                in_flight.push(store.upload_part(upload, part_number, body));
            }
        }

        // Trailing bytes, or a single empty part for an empty stream.
        if !buffer.is_empty() || part_number == 0 {
            if in_flight.len() >= queue_size {
                completed.push(next_completed(&mut in_flight, cancel).await?);
            }
            part_number += 1;
            in_flight.push(store.upload_part(upload, part_number, buffer.freeze()));
        }

        while !in_flight.is_empty() {
            completed.push(next_completed(&mut in_flight, cancel).await?);
        }
        Ok(())
    }
    .await;

    if let Err(err) = sent {
        // Let parts mid-write finish so an abort finds a quiet staging area.
        while in_flight.next().await.is_some() {}
        return Err(err);
    }

    completed.sort_by_key(|part| part.part_number);
    debug!(
        upload_id = %upload.upload_id,
        parts = completed.len(),
        "all parts uploaded"
    );
    Ok(completed)
}

/// Wait for one in-flight part, giving up early on cancellation.
async fn next_completed(
    in_flight: &mut FuturesUnordered<BoxFuture<'_, StorageResult<CompletedPart>>>,
    cancel: &CancellationToken,
) -> StorageResult<CompletedPart> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        done = in_flight.next() => match done {
            Some(part) => part,
            None => Err(StorageError::InvalidPart("no part in flight".into())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::object::ObjectSummary,
        services::object_store::{LocalObjectStore, ObjectReader},
    };
    use async_trait::async_trait;
    use futures::{TryStreamExt, stream};
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    /// Slows every part down and records how many were uploading at once.
    struct SlowPartStore {
        inner: LocalObjectStore,
        fail_part: Option<u32>,
        current: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
        settled: AtomicUsize,
    }

    impl SlowPartStore {
        async fn new(dir: &Path, fail_part: Option<u32>) -> Self {
            Self {
                inner: store(dir).await,
                fail_part,
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                settled: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for SlowPartStore {
        async fn create_multipart_upload(&self, key: &str) -> StorageResult<MultipartUpload> {
            self.inner.create_multipart_upload(key).await
        }

        async fn upload_part(
            &self,
            upload: &MultipartUpload,
            part_number: u32,
            body: Bytes,
        ) -> StorageResult<CompletedPart> {
            if self.fail_part == Some(part_number) {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "part rejected",
                )));
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.upload_part(upload, part_number, body).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.settled.fetch_add(1, Ordering::SeqCst);
            result
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
            self.inner.list_objects().await
        }

        async fn get_object(&self, key: &str) -> StorageResult<ObjectReader> {
            self.inner.get_object(key).await
        }

        async fn health_check(&self) -> StorageResult<()> {
            self.inner.health_check().await
        }
    }

    async fn store(dir: &Path) -> LocalObjectStore {
        LocalObjectStore::open(dir, "uploads", "local", "")
            .await
            .unwrap()
    }

    fn chunks(data: &[u8], size: usize) -> Vec<io::Result<Bytes>> {
        data.chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    fn staged_uploads(dir: &Path) -> usize {
        std::fs::read_dir(dir.join(".multipart")).unwrap().count()
    }

    #[tokio::test]
    async fn splits_into_parts_and_reassembles() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let options = TransferOptions {
            part_size: 1024,
            queue_size: 2,
            leave_parts_on_error: false,
        };

        let object = upload_stream(
            &store,
            "k-data.bin",
            stream::iter(chunks(&data, 700)),
            options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(object.size_bytes, 10_000);
        // 9 full parts of 1024 plus a 784-byte tail.
        assert!(object.etag.ends_with("-10"));
        let reader = store.get_object("k-data.bin").await.unwrap();
        let body: Vec<Bytes> = reader.stream.try_collect().await.unwrap();
        assert_eq!(body.concat(), data);
        assert_eq!(staged_uploads(dir.path()), 0);
    }

    #[tokio::test]
    async fn stream_error_aborts_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let mut items = chunks(&[7u8; 3000], 1000);
        items.push(Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away")));

        let err = upload_stream(
            &store,
            "k-broken.bin",
            stream::iter(items),
            TransferOptions {
                part_size: 1000,
                ..TransferOptions::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Io(_)));
        assert_eq!(staged_uploads(dir.path()), 0);
        assert!(store.list_objects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn leave_parts_on_error_keeps_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let items = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::Other, "boom")),
        ];

        upload_stream(
            &store,
            "k-kept.bin",
            stream::iter(items),
            TransferOptions {
                part_size: 2,
                queue_size: 1,
                leave_parts_on_error: true,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(staged_uploads(dir.path()), 1);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = upload_stream(
            &store,
            "k-cancelled.bin",
            stream::iter(chunks(b"payload", 3)),
            TransferOptions::default(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Cancelled));
        assert_eq!(staged_uploads(dir.path()), 0);
        assert!(store.list_objects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trailing_part_respects_queue_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = SlowPartStore::new(dir.path(), None).await;
        let data: Vec<u8> = (0..18u8).collect();

        // Four full parts fill the queue before the 2-byte tail is queued.
        let object = upload_stream(
            &store,
            "k-tail.bin",
            stream::iter(chunks(&data, 18)),
            TransferOptions {
                part_size: 4,
                queue_size: 4,
                leave_parts_on_error: false,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(object.etag.ends_with("-5"));
        assert_eq!(object.size_bytes, 18);
        assert!(store.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn failed_part_lets_siblings_settle_before_abort() {
        let dir = tempfile::tempdir().unwrap();
        let store = SlowPartStore::new(dir.path(), Some(3)).await;

        let err = upload_stream(
            &store,
            "k-partial.bin",
            stream::iter(chunks(&[5u8; 18], 18)),
            TransferOptions {
                part_size: 4,
                queue_size: 4,
                leave_parts_on_error: false,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Io(_)));
        assert!(store.started.load(Ordering::SeqCst) > 0);
        assert_eq!(
            store.settled.load(Ordering::SeqCst),
            store.started.load(Ordering::SeqCst)
        );
        assert_eq!(staged_uploads(dir.path()), 0);
        assert!(store.list_objects().await.unwrap().is_empty());
    }

    #[test]
    fn defaults_match_transfer_settings() {
        let options = TransferOptions::default();
        assert_eq!(options.part_size, 5 * 1024 * 1024);
        assert_eq!(options.queue_size, 4);
        assert!(!options.leave_parts_on_error);
    }
}
