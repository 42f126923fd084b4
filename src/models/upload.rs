//! Wire types for the photo upload API.

use serde::Serialize;

/// Declared MIME types accepted at the upload boundary.
///
/// Anything outside this allow-list is rejected with 415 before any image
/// bytes are inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

impl ImageKind {
    /// Map a declared MIME type onto the allow-list.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            "image/webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }
}

/// Response body for a stored upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Public URL (blob backend) or server-relative path (local backend).
    pub url: String,
    /// Truncated SHA-256 of the stored bytes.
    pub hash: String,
    /// Stored object size in bytes.
    pub bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_covers_the_three_raster_types() {
        assert_eq!(ImageKind::from_mime("image/jpeg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_mime("image/png"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_mime("image/webp"), Some(ImageKind::Webp));
    }

    #[test]
    fn anything_else_is_rejected() {
        assert_eq!(ImageKind::from_mime("image/gif"), None);
        assert_eq!(ImageKind::from_mime("application/pdf"), None);
        assert_eq!(ImageKind::from_mime(""), None);
    }
}
