use crate::{
    models::upload::FileOutcome,
    services::{
        object_store::StorageError,
        upload_service::UploadError,
    },
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

const GENERIC_MESSAGE: &str = "An error occurred.";

/// Error returned by handlers, rendered as `{message, error[, files]}` JSON.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub error: String,
    pub files: Vec<FileOutcome>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    error: &'a str,
    #[serde(skip_serializing_if = "<[FileOutcome]>::is_empty")]
    files: &'a [FileOutcome],
}

impl AppError {
    /// Create a new AppError with a specific status and underlying error text.
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            message: GENERIC_MESSAGE.to_string(),
            error: error.into(),
            files: Vec::new(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            message: &self.message,
            error: &self.error,
            files: &self.files,
        });

        (self.status, body).into_response()
    }
}

/// Upload failures are always reported as 400, whatever the root cause.
impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let mut app = AppError::bad_request(err.to_string());
        app.files = err.outcomes().to_vec();
        app
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound(_) | StorageError::InvalidObjectKey(_) => {
                AppError::not_found(err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::upload::FileStatus,
        services::{multipart_decoder::DecodeError, upload_service::UploadError},
    };

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_errors_render_as_400_with_files() {
        let err = UploadError::Decode {
            source: DecodeError::EmptyFile("b.txt".into()),
            outcomes: vec![FileOutcome {
                index: 0,
                file_name: Some("a.txt".into()),
                key: Some("k-a.txt".into()),
                status: FileStatus::Cancelled {
                    object_stored: false,
                },
            }],
        };

        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["message"], "An error occurred.");
        assert_eq!(json["error"], "file `b.txt` is empty");
        assert_eq!(json["files"][0]["status"], "cancelled");
    }

    #[tokio::test]
    async fn files_field_is_omitted_when_empty() {
        let json = body_json(AppError::bad_request("boom").into_response()).await;
        assert_eq!(json, serde_json::json!({"message": "An error occurred.", "error": "boom"}));
    }

    #[test]
    fn missing_objects_map_to_404() {
        let err = AppError::from(StorageError::ObjectNotFound("k".into()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
