//! Metadata records written to the key-value table after a successful upload.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row per successfully stored object.
///
/// The partition-key attribute is populated from the original filename, so two
/// uploads sharing a filename land on the same item and the later one wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataRecord {
    pub file_name: String,
    pub object_key: String,
    pub uploaded_at: DateTime<Utc>,
    pub file_size: u64,
    pub bucket: String,
    pub location: String,
}

impl MetadataRecord {
    /// Secondary filename-derived key: `<unix millis>-<filename>`.
    pub fn file_key(&self) -> String {
        format!("{}-{}", self.uploaded_at.timestamp_millis(), self.file_name)
    }

    /// Flatten into a table item keyed by `partition_key`.
    pub fn into_item(self, partition_key: &str) -> MetadataItem {
        let mut attributes = Map::new();
        attributes.insert(
            partition_key.to_string(),
            Value::String(self.file_name.clone()),
        );
        attributes.insert("FileKey".into(), Value::String(self.file_key()));
        attributes.insert("FileName".into(), Value::String(self.file_name));
        attributes.insert(
            "UploadTime".into(),
            Value::String(
                self.uploaded_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        );
        attributes.insert("FileSize".into(), Value::from(self.file_size));
        attributes.insert("Bucket".into(), Value::String(self.bucket));
        attributes.insert("Location".into(), Value::String(self.location));
        attributes.insert("ObjectKey".into(), Value::String(self.object_key));
        MetadataItem { attributes }
    }
}

/// A schemaless item as stored in the metadata table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(transparent)]
pub struct MetadataItem {
    pub attributes: Map<String, Value>,
}

#[cfg(test)]
impl MetadataItem {
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.attributes.get(name).and_then(Value::as_u64)
    }
}
