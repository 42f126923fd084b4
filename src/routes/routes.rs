//! Defines routes for the photo upload and storage API.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST /upload`      — compress + store to the local uploads directory
//!   - `POST /blob-upload` — compress + store to the remote blob endpoint
//!
//! - **Object endpoints**
//!   - `GET  /uploads/{key}` — serve a locally stored photo
//!   - `POST /clean-uploads` — empty the local uploads directory
//!
//! Keys are content-derived (`<hash>.jpg`), so there is no nesting below
//! `/uploads/`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{blob_upload_photo, clean_uploads, get_photo, upload_photo},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Cap on the inbound request body. Budgets constrain the *output* of the
/// encoder; the raw upload may legitimately be much larger.
const MAX_UPLOAD_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Build and return the router for all photo-store routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload endpoints
        .route("/upload", post(upload_photo))
        .route("/blob-upload", post(blob_upload_photo))
        // object endpoints
        .route("/uploads/{key}", get(get_photo))
        .route("/clean-uploads", post(clean_uploads))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES))
}
