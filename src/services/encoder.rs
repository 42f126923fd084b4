//! Size-budgeted JPEG encoder.
//!
//! Takes an arbitrary decodable image and produces a JPEG that fits a hard
//! byte budget, trading quality first and geometry second. The search is a
//! fixed grid, not a binary search: candidates are tried in a documented
//! order (descending quality within descending scale) and the first one
//! under budget wins, so the result is the highest quality at the least
//! downscale that fits. A fixed low-quality, fixed-width fallback guarantees
//! the encoder always returns *something*, even over budget.

use image::{
    DynamicImage, ImageError, Rgb, RgbImage, RgbaImage,
    codecs::jpeg::JpegEncoder,
    imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;

/// Quality for the single-pass attempt that covers most uploads.
pub const INITIAL_QUALITY: u8 = 85;

/// Inner search axis, tried in order within each scale tier.
const QUALITY_STEPS: [u8; 12] = [80, 75, 70, 65, 60, 55, 50, 45, 40, 35, 30, 25];

/// Outer search axis, largest tier first.
const SCALE_STEPS: [f64; 6] = [1.0, 0.9, 0.8, 0.7, 0.6, 0.5];

/// Fallback geometry and quality when the whole grid misses the budget.
pub const FALLBACK_WIDTH: u32 = 1024;
pub const FALLBACK_QUALITY: u8 = 60;

#[derive(Debug, Error)]
pub enum EncodeError {
    /// The input bytes do not decode as an image. Raised before any
    /// encoding work starts.
    #[error("input does not decode as an image: {0}")]
    InvalidImage(#[source] ImageError),
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] ImageError),
}

/// Final product of a budgeted encode.
///
/// `data.len() <= max_bytes` holds whenever the search grid allows it; a
/// fallback result may exceed the budget and callers decide whether that is
/// worth a warning. It is never an error.
#[derive(Debug)]
pub struct EncodedResult {
    pub data: Vec<u8>,
    /// JPEG quality of the accepted attempt (0-100).
    pub quality: u8,
    /// Linear scale factor of the accepted attempt relative to the input.
    pub scale: f64,
}

impl EncodedResult {
    /// Whether the encoded payload met the requested budget.
    pub fn fits(&self, max_bytes: usize) -> bool {
        self.data.len() <= max_bytes
    }
}

/// Re-encode `input` as a JPEG of at most `max_bytes`, if the search space
/// allows it.
///
/// Transparent inputs are flattened onto `background` first; JPEG has no
/// alpha channel. Deterministic, CPU-bound, and free of I/O, so concurrent
/// calls share nothing.
pub fn encode_to_budget(
    input: &[u8],
    max_bytes: usize,
    background: Rgb<u8>,
) -> Result<EncodedResult, EncodeError> {
    let decoded = image::load_from_memory(input).map_err(EncodeError::InvalidImage)?;
    let base = prepare(decoded, background);
    run_search(&base, max_bytes, encode_jpeg)
}

/// Flatten alpha-bearing images onto `background`; convert the rest to RGB
/// directly.
fn prepare(decoded: DynamicImage, background: Rgb<u8>) -> RgbImage {
    if decoded.color().has_alpha() {
        flatten(&decoded.to_rgba8(), background)
    } else {
        decoded.to_rgb8()
    }
}

/// Composite a transparent image onto an opaque background color.
fn flatten(source: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    let mut out = RgbImage::new(source.width(), source.height());
    for (dst, src) in out.pixels_mut().zip(source.pixels()) {
        let alpha = src[3] as u16;
        for channel in 0..3 {
            let fg = src[channel] as u16;
            let bg = background[channel] as u16;
            dst[channel] = ((fg * alpha + bg * (255 - alpha)) / 255) as u8;
        }
    }
    out
}

/// The budgeted search itself, generic over the encode primitive so tests
/// can count calls and dictate candidate sizes.
fn run_search<E>(base: &RgbImage, max_bytes: usize, mut encode: E) -> Result<EncodedResult, EncodeError>
where
    E: FnMut(&RgbImage, u8) -> Result<Vec<u8>, EncodeError>,
{
    // Single high-quality pass first; most uploads already fit.
    let first = encode(base, INITIAL_QUALITY)?;
    if first.len() <= max_bytes {
        return Ok(EncodedResult {
            data: first,
            quality: INITIAL_QUALITY,
            scale: 1.0,
        });
    }

    let (width, height) = base.dimensions();
    for &scale in &SCALE_STEPS {
        let tier;
        let current: &RgbImage = if scale < 1.0 {
            let (w, h) = scaled_dims(width, height, scale);
            tier = imageops::resize(base, w, h, FilterType::Lanczos3);
            &tier
        } else {
            base
        };
        for &quality in &QUALITY_STEPS {
            let data = encode(current, quality)?;
            if data.len() <= max_bytes {
                debug!(scale, quality, bytes = data.len(), "grid search met budget");
                return Ok(EncodedResult { data, quality, scale });
            }
        }
    }

    // Grid exhausted. Hard floor: fixed width, fixed quality, returned even
    // when still over budget so the caller always gets an image.
    let (w, h) = fallback_dims(width, height);
    let floor = imageops::resize(base, w, h, FilterType::Lanczos3);
    let data = encode(&floor, FALLBACK_QUALITY)?;
    debug!(bytes = data.len(), max_bytes, "grid exhausted, using fallback encode");
    Ok(EncodedResult {
        data,
        quality: FALLBACK_QUALITY,
        scale: w as f64 / width as f64,
    })
}

/// Apply a fractional scale to pixel dimensions: round down, floor at 1 px.
fn scaled_dims(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let w = ((width as f64 * scale) as u32).max(1);
    let h = ((height as f64 * scale) as u32).max(1);
    (w, h)
}

/// Fallback geometry: pin the width, keep the aspect ratio.
fn fallback_dims(width: u32, height: u32) -> (u32, u32) {
    let h = ((height as u64 * FALLBACK_WIDTH as u64) / width as u64).max(1) as u32;
    (FALLBACK_WIDTH, h)
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    /// Deterministic candidate size for stubbed encodes: linear in pixel
    /// count and quality, so sizes shrink along both search axes.
    fn stub_len(img: &RgbImage, quality: u8) -> usize {
        img.width() as usize * img.height() as usize * quality as usize / 8
    }

    #[test]
    fn first_pass_fit_encodes_exactly_once() {
        let base = gradient(64, 64);
        let mut calls = 0;
        let result = run_search(&base, usize::MAX, |img, q| {
            calls += 1;
            Ok(vec![0u8; stub_len(img, q)])
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(result.quality, INITIAL_QUALITY);
        assert_eq!(result.scale, 1.0);
    }

    #[test]
    fn quality_degrades_before_downscaling() {
        // 100x100 stub sizes at scale 1.0: q85=106250, q80=100000,
        // q75=93750, q70=87500. A budget of 90000 must land on q70 at full
        // scale, after exactly first pass + three grid attempts.
        let base = gradient(100, 100);
        let mut calls = 0;
        let result = run_search(&base, 90_000, |img, q| {
            calls += 1;
            Ok(vec![0u8; stub_len(img, q)])
        })
        .unwrap();
        assert_eq!(result.scale, 1.0);
        assert_eq!(result.quality, 70);
        assert_eq!(calls, 4);
    }

    #[test]
    fn downscales_after_exhausting_a_quality_tier() {
        // Budget below every scale-1.0 candidate (min is q25 = 31250) but
        // reachable in the 0.9 tier: 90x90 at q25 = 25312.
        let base = gradient(100, 100);
        let mut attempts = Vec::new();
        let result = run_search(&base, 30_000, |img, q| {
            attempts.push((img.width(), q));
            Ok(vec![0u8; stub_len(img, q)])
        })
        .unwrap();
        assert_eq!(result.quality, 25);
        assert!((result.scale - 0.9).abs() < f64::EPSILON);
        // First pass, full 1.0 tier, full 0.9 tier.
        assert_eq!(attempts.len(), 1 + 12 + 12);
        assert_eq!(*attempts.last().unwrap(), (90, 25));
    }

    #[test]
    fn exhausted_grid_returns_the_fallback_unconditionally() {
        let base = gradient(50, 40);
        let mut attempts = Vec::new();
        let result = run_search(&base, 1, |img, q| {
            attempts.push((img.width(), img.height(), q));
            Ok(vec![0u8; 10])
        })
        .unwrap();
        assert_eq!(result.quality, FALLBACK_QUALITY);
        assert!(!result.fits(1));
        // First pass + 6 tiers x 12 qualities + the fallback itself.
        assert_eq!(attempts.len(), 1 + 6 * 12 + 1);
        // Width pinned to 1024, height follows the aspect ratio: 40*1024/50.
        assert_eq!(*attempts.last().unwrap(), (1024, 819, FALLBACK_QUALITY));
    }

    #[test]
    fn flatten_blends_against_background() {
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        rgba.put_pixel(1, 0, Rgba([0, 0, 0, 51]));
        let flat = flatten(&rgba, Rgb([255, 255, 255]));
        // Opaque pixels are untouched; 20% black over white is 80% white.
        assert_eq!(flat.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(flat.get_pixel(1, 0), &Rgb([204, 204, 204]));
    }

    #[test]
    fn opaque_input_skips_flattening() {
        let base = gradient(4, 4);
        let prepared = prepare(DynamicImage::ImageRgb8(base.clone()), Rgb([0, 0, 0]));
        assert_eq!(prepared, base);
    }

    #[test]
    fn scaled_dims_round_down_with_a_one_pixel_floor() {
        assert_eq!(scaled_dims(100, 60, 0.5), (50, 30));
        assert_eq!(scaled_dims(3, 3, 0.7), (2, 2));
        assert_eq!(scaled_dims(1, 1, 0.5), (1, 1));
    }

    #[test]
    fn invalid_bytes_fail_before_any_encoding() {
        let err = encode_to_budget(b"definitely not an image", 1024, Rgb([255, 255, 255]))
            .unwrap_err();
        assert!(matches!(err, EncodeError::InvalidImage(_)));
    }

    #[test]
    fn real_encode_produces_jpeg_within_a_generous_budget() {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(gradient(32, 32))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let result = encode_to_budget(&png, 1 << 20, Rgb([255, 255, 255])).unwrap();
        assert!(result.fits(1 << 20));
        assert_eq!(result.quality, INITIAL_QUALITY);
        assert_eq!(image::guess_format(&result.data).unwrap(), ImageFormat::Jpeg);
    }
}
