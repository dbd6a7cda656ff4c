//! Process-wide state shared by every handler.

use crate::services::{multipart_decoder::DecoderLimits, upload_service::UploadService};
use std::{path::PathBuf, sync::Arc};

/// Long-lived client handles and request limits, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub limits: DecoderLimits,
    pub spool_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(uploads: UploadService, limits: DecoderLimits, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads,
            limits,
            spool_dir: Arc::new(spool_dir.into()),
        }
    }
}
