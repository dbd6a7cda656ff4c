//! Core data models for the upload gateway.
//!
//! Objects and multipart sessions describe what the object store holds,
//! metadata records describe what lands in the key-value table, and the
//! upload models live only for the duration of one request.

pub mod metadata;
pub mod multipart;
pub mod object;
pub mod upload;
