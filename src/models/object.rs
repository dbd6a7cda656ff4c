//! Represents an object (file) stored in the gateway's bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single object (blob) within the configured bucket.
///
/// Carries what the object store reports back after a write or a listing,
/// not the content bytes themselves.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Bucket the object lives in.
    pub bucket: String,

    /// Object key (unique token + original filename).
    pub key: String,

    /// Location identifier handed back to callers (URL under `/objects/`).
    pub location: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// MD5-based entity tag. Multipart objects use the `<md5-of-md5s>-<parts>` form.
    pub etag: String,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,
}

/// Entry returned when listing the bucket.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}
