//! Upload orchestration.
//!
//! Every decoded file part gets its own task: stream it into the object store,
//! then write one metadata record. Tasks run concurrently with no cap on the
//! number of files; the request settles once decoding ends and every task has
//! finished. A decode failure cancels the request's token so in-flight
//! transfers abort and already-stored objects skip their metadata write.

use crate::{
    models::{
        metadata::MetadataRecord,
        upload::{FailureStage, FileOutcome, FilePart, FileStatus, StoredObjectKey, UploadResult},
    },
    services::{
        metadata_store::{MetadataError, MetadataStore},
        multipart_decoder::{DecodeError, PartSource},
        object_store::{ObjectStore, StorageError},
        transfer::{self, TransferOptions},
    },
};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("object `{key}` was stored but its metadata write failed: {source}")]
    Metadata {
        key: String,
        #[source]
        source: MetadataError,
    },
    #[error("object `{key}` was stored but the request was aborted before its metadata was written")]
    CancelledAfterStore { key: String },
    #[error("upload task failed: {0}")]
    Task(String),
}

impl FileError {
    fn status(&self) -> FileStatus {
        match self {
            FileError::Storage(StorageError::Cancelled) => FileStatus::Cancelled {
                object_stored: false,
            },
            FileError::CancelledAfterStore { .. } => FileStatus::Cancelled {
                object_stored: true,
            },
            FileError::Storage(err) => FileStatus::Failed {
                stage: FailureStage::Storage,
                error: err.to_string(),
            },
            FileError::Metadata { source, .. } => FileStatus::Failed {
                stage: FailureStage::Metadata,
                error: source.to_string(),
            },
            FileError::Task(err) => FileStatus::Failed {
                stage: FailureStage::Task,
                error: err.clone(),
            },
        }
    }
}

/// Why a whole request failed. Both variants carry every file's outcome.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{source}")]
    Decode {
        source: DecodeError,
        outcomes: Vec<FileOutcome>,
    },
    #[error("{source}")]
    Failed {
        source: FileError,
        outcomes: Vec<FileOutcome>,
    },
}

impl UploadError {
    pub fn outcomes(&self) -> &[FileOutcome] {
        match self {
            UploadError::Decode { outcomes, .. } | UploadError::Failed { outcomes, .. } => outcomes,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UploadSettings {
    pub metadata_table: String,
    pub partition_key: String,
    pub transfer: TransferOptions,
}

/// Process-wide orchestrator; cheap to clone into per-file tasks.
#[derive(Clone)]
pub struct UploadService {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    settings: Arc<UploadSettings>,
}

impl UploadService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            objects,
            metadata,
            settings: Arc::new(settings),
        }
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Store every file `source` yields. Results come back in arrival order.
    pub async fn upload<P>(&self, source: &mut P) -> Result<Vec<UploadResult>, UploadError>
    where
        P: PartSource + ?Sized,
    {
        self.upload_with_cancel(source, &CancellationToken::new())
            .await
    }

    /// As [`upload`](Self::upload), but cancelling `parent` also aborts this request.
    pub async fn upload_with_cancel<P>(
        &self,
        source: &mut P,
        parent: &CancellationToken,
    ) -> Result<Vec<UploadResult>, UploadError>
    where
        P: PartSource + ?Sized,
    {
        let cancel = parent.child_token();
        // Dropping this request (client gone) cancels its file tasks too.
        let _abandon = cancel.clone().drop_guard();
        let mut tasks = Vec::new();
        let mut file_names = Vec::new();

        let decode_error = loop {
            match source.next_part().await {
                Ok(Some(part)) => {
                    info!(
                        index = tasks.len(),
                        file_name = part.file_name(),
                        size = part.size_bytes,
                        "starting file upload"
                    );
                    file_names.push(part.original_filename.clone());
                    let service = self.clone();
                    let cancel = cancel.clone();
                    tasks.push(tokio::spawn(
                        async move { service.store_file(part, cancel).await },
                    ));
                }
                Ok(None) => break None,
                Err(err) => {
                    warn!(error = %err, in_flight = tasks.len(), "multipart decoding failed; cancelling in-flight uploads");
                    cancel.cancel();
                    break Some(err);
                }
            }
        };

        let settled = join_all(tasks).await;

        let mut results = Vec::with_capacity(settled.len());
        let mut outcomes = Vec::with_capacity(settled.len());
        let mut first_failure = None;
        for (index, (joined, file_name)) in settled.into_iter().zip(file_names).enumerate() {
            let (key, result) = match joined {
                Ok((key, result)) => (Some(key), result),
                Err(err) => (None, Err(FileError::Task(err.to_string()))),
            };
            let status = match &result {
                Ok(stored) => FileStatus::Stored {
                    location: stored.location.clone(),
                },
                Err(err) => err.status(),
            };
            outcomes.push(FileOutcome {
                index,
                file_name,
                key,
                status,
            });
            match result {
                Ok(stored) => results.push(stored),
                Err(err) => {
                    error!(index, error = %err, "file upload failed");
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        if let Some(source) = decode_error {
            return Err(UploadError::Decode { source, outcomes });
        }
        if let Some(source) = first_failure {
            return Err(UploadError::Failed { source, outcomes });
        }
        info!(files = results.len(), "upload request settled");
        Ok(results)
    }

    async fn store_file(
        &self,
        part: FilePart,
        cancel: CancellationToken,
    ) -> (String, Result<UploadResult, FileError>) {
        let key = StoredObjectKey::generate(part.file_name());
        let result = self.store_and_record(&key, part, &cancel).await;
        (key.to_string(), result)
    }

    async fn store_and_record(
        &self,
        key: &StoredObjectKey,
        part: FilePart,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, FileError> {
        let file_name = part.file_name().to_string();
        let size_bytes = part.size_bytes;
        let stream = part.into_stream().await.map_err(StorageError::from)?;

        let object = transfer::upload_stream(
            self.objects.as_ref(),
            key.as_str(),
            stream,
            self.settings.transfer,
            cancel,
        )
        .await?;

        // Metadata is the irreversible commit; skip it once the request is aborted.
        if cancel.is_cancelled() {
            warn!(key = %key, "request aborted after object was stored; leaving object without metadata");
            return Err(FileError::CancelledAfterStore {
                key: key.to_string(),
            });
        }

        let record = MetadataRecord {
            file_name: file_name.clone(),
            object_key: key.to_string(),
            uploaded_at: Utc::now(),
            file_size: size_bytes,
            bucket: object.bucket.clone(),
            location: object.location.clone(),
        };
        let item = record.into_item(&self.settings.partition_key);
        if let Err(source) = self
            .metadata
            .put_item(&self.settings.metadata_table, &item)
            .await
        {
            warn!(key = %key, error = %source, "object stored without metadata record");
            return Err(FileError::Metadata {
                key: key.to_string(),
                source,
            });
        }

        info!(key = %key, size = size_bytes, location = %object.location, "file stored");
        Ok(UploadResult {
            file_name,
            key: key.to_string(),
            location: object.location,
            size_bytes,
            etag: object.etag,
        })
    }
}
