//! HTTP handlers for photo upload, retrieval, and maintenance.
//!
//! Uploads buffer the multipart payload, re-encode it on a blocking worker
//! to fit the configured byte budget, and hand the result to a
//! content-addressed backend. The response carries the stored object's
//! public URL, content hash, and byte size.

use crate::{
    errors::AppError,
    models::upload::{ImageKind, UploadResponse},
    services::{encoder, store::ObjectStore},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Serialize;
use tokio_util::io::ReaderStream;

/// Pull the `file` field out of a multipart form.
///
/// The MIME allow-list is enforced here, before any image bytes are
/// buffered or decoded.
async fn read_photo_field(multipart: &mut Multipart) -> Result<Bytes, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let mime = field.content_type().unwrap_or_default().to_string();
        if ImageKind::from_mime(&mime).is_none() {
            return Err(AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Unsupported image type",
            ));
        }

        return field
            .bytes()
            .await
            .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()));
    }

    Err(AppError::new(StatusCode::BAD_REQUEST, "No file provided"))
}

/// Encode on a blocking worker, then store through the given backend.
///
/// A fallback result that still exceeds the budget is logged and stored
/// anyway; callers always get an image back.
async fn compress_and_store<S: ObjectStore>(
    state: &AppState,
    store: &S,
    data: Bytes,
    max_bytes: usize,
) -> Result<UploadResponse, AppError> {
    let background = state.background;
    let encoded =
        tokio::task::spawn_blocking(move || encoder::encode_to_budget(&data, max_bytes, background))
            .await
            .map_err(|err| AppError::internal(err.to_string()))??;

    if !encoded.fits(max_bytes) {
        tracing::warn!(
            bytes = encoded.data.len(),
            max_bytes,
            "fallback encode still exceeds budget, storing best effort"
        );
    }

    let stored = store.store(&encoded.data, "jpg").await?;
    tracing::debug!(
        key = %stored.key,
        quality = encoded.quality,
        scale = encoded.scale,
        bytes = stored.bytes,
        "upload encoded and stored"
    );
    Ok(UploadResponse {
        url: stored.url,
        hash: stored.hash,
        bytes: stored.bytes,
    })
}

/// POST `/upload` — compress and persist to the local uploads directory.
pub async fn upload_photo(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let data = read_photo_field(&mut multipart).await?;
    let response = compress_and_store(&state, &state.local, data, state.max_bytes).await?;
    Ok(Json(response))
}

/// POST `/blob-upload` — compress and persist to the remote blob endpoint.
pub async fn blob_upload_photo(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let Some(blob) = state.blob.as_ref() else {
        return Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Blob storage is not configured",
        ));
    };

    let data = read_photo_field(&mut multipart).await?;
    let response = compress_and_store(&state, blob, data, state.blob_max_bytes).await?;
    Ok(Json(response))
}

/// GET `/uploads/{key}` — stream a locally stored photo back to the client.
///
/// Objects are immutable (the key is content-derived), so the cache policy
/// matches the blob backend's: one year, immutable.
pub async fn get_photo(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (file, len) = state.local.open(&key).await?;
    let stream = ReaderStream::new(file);

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&len.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    Ok(response)
}

#[derive(Serialize)]
pub struct CleanUploadsResponse {
    pub success: bool,
    pub message: String,
}

/// POST `/clean-uploads` — empty the local uploads directory.
///
/// Maintenance endpoint; the store itself never deletes objects.
pub async fn clean_uploads(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let removed = state.local.purge().await?;
    tracing::info!(removed, "cleaned uploads directory");
    Ok(Json(CleanUploadsResponse {
        success: true,
        message: format!("Uploads folder cleaned successfully ({} entries removed).", removed),
    }))
}
