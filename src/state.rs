//! Shared application state threaded through the router.

use crate::{
    config::AppConfig,
    services::store::{BlobStore, FsStore},
};
use image::Rgb;

/// Everything handlers need: both storage backends plus encode settings.
///
/// Cloned per request by axum. All fields are cheap to clone and nothing is
/// mutable, so concurrent uploads share no state.
#[derive(Clone)]
pub struct AppState {
    pub local: FsStore,
    pub blob: Option<BlobStore>,
    pub max_bytes: usize,
    pub blob_max_bytes: usize,
    pub background: Rgb<u8>,
}

impl AppState {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let blob = cfg
            .blob_endpoint
            .clone()
            .map(|endpoint| BlobStore::new(endpoint, cfg.blob_token.clone()));

        Self {
            local: FsStore::new(cfg.storage_dir.clone(), cfg.public_base.clone()),
            blob,
            max_bytes: cfg.max_bytes,
            blob_max_bytes: cfg.blob_max_bytes,
            background: cfg.background,
        }
    }
}
