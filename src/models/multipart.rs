//! Represents multipart upload sessions and parts.

use serde::{Deserialize, Serialize};

/// A multipart upload session, initiated before streaming a file in parts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MultipartUpload {
    /// Unique upload ID issued by the object store.
    pub upload_id: String,

    /// Object key being uploaded.
    pub key: String,
}

/// Represents a single uploaded part in a multipart upload session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number (1-based).
    pub part_number: u32,

    /// Size in bytes.
    pub size_bytes: u64,

    /// MD5 hex digest of the part body.
    pub etag: String,
}
