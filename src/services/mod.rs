//! Collaborators of the upload flow and the orchestrator that drives them.

pub mod metadata_store;
pub mod multipart_decoder;
pub mod object_store;
pub mod transfer;
pub mod upload_service;
