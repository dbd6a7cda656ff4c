//! HTTP handlers for uploads and object reads.
//! Upload bodies are decoded part by part and handed to `UploadService`;
//! reads stream straight from the object store.

use crate::{
    errors::AppError,
    services::multipart_decoder::MultipartDecoder,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{error, info};

/// `POST /api/upload`: store every `multipart/form-data` file part.
///
/// Redirects to the listing page when all files were stored and recorded;
/// any failure is a 400 with the cause and per-file outcomes.
pub async fn upload_files(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let multipart = multipart.map_err(|rejection| {
        error!("Error in file upload: {}", rejection.body_text());
        AppError::bad_request(rejection.body_text())
    })?;

    let mut decoder = MultipartDecoder::new(multipart, state.limits, state.spool_dir.as_path());
    match state.uploads.upload(&mut decoder).await {
        Ok(results) => {
            info!(files = results.len(), "upload complete");
            Ok((StatusCode::FOUND, [(header::LOCATION, "/")]).into_response())
        }
        Err(err) => {
            error!("Error in file upload: {}", err);
            Err(err.into())
        }
    }
}

/// `GET /objects/{*key}`: stream a stored object.
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let reader = state.uploads.objects().get_object(&key).await?;

    let mut response = Response::new(Body::from_stream(reader.stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(reader.size_bytes));
    Ok(response)
}
