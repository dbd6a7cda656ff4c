//! Defines the gateway's routes.
//!
//! - `GET  /`                - listing page (upload form + bucket keys)
//! - `POST /api/upload`      - multipart upload, redirects to `/` on success
//! - `GET  /objects/{*key}`  - stream a stored object (target of `Location`)
//! - `GET  /healthz`, `GET /readyz` - liveness and readiness
//!
//! The wildcard `*key` allows keys whose filename part contains `/`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, upload_files},
        page_handlers::index,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Carries `AppState` to every handler.
///
/// The upload route lifts axum's default body limit; size rules are enforced
/// per part by the multipart decoder.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(index))
        .route(
            "/api/upload",
            post(upload_files).layer(DefaultBodyLimit::disable()),
        )
        .route("/objects/{*key}", get(get_object))
}
