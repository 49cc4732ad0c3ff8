use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageReader, Limits};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crux_core::capability::Operation;
use crate::{
    AppError, ErrorKind, MAX_COMPRESSED_BYTES, MAX_DECODE_DIMENSION, MAX_IMAGE_ALLOC,
    MAX_INPUT_IMAGE_BYTES, MAX_PROCESSED_DIMENSION,
};

const MAX_DOWNSCALE_ROUNDS: usize = 12;
const MIN_DIMENSION: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ImageError {
    #[error("input bytes empty")]
    EmptyInput,

    #[error("input too large: {size} bytes, max {max_size}")]
    InputTooLarge { size: usize, max_size: usize },

    #[error("invalid data URI: {reason}")]
    InvalidDataUri { reason: String },

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("failed to decode image: {reason}")]
    Decode { reason: String },

    #[error("jpeg encoding failed: width={width}, height={height}, reason={reason}")]
    Encode {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("could not get image under {max_bytes} bytes")]
    CannotFit { max_bytes: usize },

    #[error("compression worker failed")]
    WorkerFailed,

    #[error("service overloaded, try again later")]
    Overloaded,
}

impl ImageError {
    /// Every failure reads the same to the user: try another photo.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        "Image processing failed. Please retake or choose another photo."
    }
}

impl From<ImageError> for AppError {
    fn from(e: ImageError) -> Self {
        AppError::new(ErrorKind::ImageProcessing, e.user_message()).with_internal(e.to_string())
    }
}

/// A captured or uploaded photo, before compression.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    DataUri(String),
}

impl ImageSource {
    /// The encoded image bytes, unwrapping a base64 `data:` URI if needed.
    pub fn into_bytes(self) -> Result<Vec<u8>, ImageError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::DataUri(uri) => decode_data_uri(&uri),
        }
    }
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::DataUri(u) => write!(f, "DataUri({} chars)", u.len()),
        }
    }
}

/// Inline form of compressed output, for previews.
#[must_use]
pub fn jpeg_data_uri(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", CompressedImage::MIME_TYPE, BASE64.encode(bytes))
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>, ImageError> {
    let invalid = |reason: &str| ImageError::InvalidDataUri {
        reason: reason.to_string(),
    };

    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| invalid("missing data: prefix"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("missing comma"))?;
    if !header.ends_with(";base64") {
        return Err(invalid("only base64 payloads are supported"));
    }

    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(payload.as_bytes())
        .map_err(|e| invalid(&e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionLimits {
    pub max_output_bytes: usize,
    pub max_dimension: u32,
    pub initial_quality: u8,
    pub min_quality: u8,
    pub quality_step: u8,
    pub max_input_bytes: usize,
    pub max_decode_dimension: u32,
    pub max_alloc_bytes: u64,
}

impl Default for CompressionLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: MAX_COMPRESSED_BYTES,
            max_dimension: MAX_PROCESSED_DIMENSION,
            initial_quality: 85,
            min_quality: 40,
            quality_step: 15,
            max_input_bytes: MAX_INPUT_IMAGE_BYTES,
            max_decode_dimension: MAX_DECODE_DIMENSION,
            max_alloc_bytes: MAX_IMAGE_ALLOC,
        }
    }
}

impl CompressionLimits {
    /// Qualities to try, best first, always ending at `min_quality`.
    #[must_use]
    pub fn quality_ladder(&self) -> Vec<u8> {
        let min = self.min_quality.clamp(1, 100);
        let mut q = self.initial_quality.clamp(min, 100);
        let step = self.quality_step.max(1);
        let mut ladder = vec![q];
        while q > min {
            q = q.saturating_sub(step).max(min);
            ladder.push(q);
        }
        ladder
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedImage {
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub original_size: usize,
    /// BLAKE3 of the compressed bytes; identifies the photo across retries.
    pub fingerprint: String,
}

impl CompressedImage {
    pub const MIME_TYPE: &'static str = "image/jpeg";
}

impl std::fmt::Debug for CompressedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedImage")
            .field("len", &self.bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("quality", &self.quality)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressOperation {
    pub source: ImageSource,
    pub limits: CompressionLimits,
}

pub type CompressResult = Result<CompressedImage, ImageError>;

impl Operation for CompressOperation {
    type Output = CompressResult;
}

/// Largest size within `max` on both sides with the same aspect ratio.
/// Never upscales.
#[must_use]
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = f64::from(max) / f64::from(width.max(height));
    (scale_dim(width, scale), scale_dim(height, scale))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_dim(dim: u32, scale: f64) -> u32 {
    ((f64::from(dim) * scale).round() as u32).max(1)
}

fn decode_image(limits: &CompressionLimits, raw: &[u8]) -> Result<DynamicImage, ImageError> {
    if raw.is_empty() {
        return Err(ImageError::EmptyInput);
    }
    if raw.len() > limits.max_input_bytes {
        return Err(ImageError::InputTooLarge {
            size: raw.len(),
            max_size: limits.max_input_bytes,
        });
    }

    let mut reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode {
            reason: e.to_string(),
        })?;

    if reader.format().is_none() {
        return Err(ImageError::UnsupportedFormat);
    }

    let mut decode_limits = Limits::default();
    decode_limits.max_image_width = Some(limits.max_decode_dimension);
    decode_limits.max_image_height = Some(limits.max_decode_dimension);
    decode_limits.max_alloc = Some(limits.max_alloc_bytes);
    reader.limits(decode_limits);

    reader.decode().map_err(|e| ImageError::Decode {
        reason: e.to_string(),
    })
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| ImageError::Encode {
            width,
            height,
            reason: e.to_string(),
        })?;

    Ok(buffer)
}

/// Decodes, downsizes and re-encodes as JPEG until the result fits
/// `max_output_bytes`: first by lowering quality, then by shrinking.
pub fn compress(source: ImageSource, limits: &CompressionLimits) -> Result<CompressedImage, ImageError> {
    let raw = source.into_bytes()?;
    let original_size = raw.len();
    let img = decode_image(limits, &raw)?;
    drop(raw);

    let (w, h) = img.dimensions();
    let (tw, th) = fit_within(w, h, limits.max_dimension);
    let mut current = if (tw, th) == (w, h) {
        img
    } else {
        img.resize_exact(tw, th, FilterType::Triangle)
    };

    let ladder = limits.quality_ladder();
    for round in 0..=MAX_DOWNSCALE_ROUNDS {
        let (cw, ch) = current.dimensions();
        for &quality in &ladder {
            let bytes = encode_jpeg(&current, quality)?;
            if bytes.len() <= limits.max_output_bytes {
                debug!(
                    width = cw,
                    height = ch,
                    quality,
                    size = bytes.len(),
                    round,
                    "image compressed"
                );
                let fingerprint = blake3::hash(&bytes).to_hex().to_string();
                return Ok(CompressedImage {
                    bytes,
                    width: cw,
                    height: ch,
                    quality,
                    original_size,
                    fingerprint,
                });
            }
        }

        if cw <= MIN_DIMENSION || ch <= MIN_DIMENSION {
            break;
        }
        let nw = scale_dim(cw, 0.8);
        let nh = scale_dim(ch, 0.8);
        current = current.resize_exact(nw, nh, FilterType::Triangle);
    }

    Err(ImageError::CannotFit {
        max_bytes: limits.max_output_bytes,
    })
}

/// Runs compression off the async threads, a bounded number at a time.
pub struct ImageCompressor {
    semaphore: Arc<Semaphore>,
}

impl ImageCompressor {
    #[must_use]
    pub fn new(max_concurrent_ops: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_ops.max(1))),
        }
    }

    #[instrument(skip(self, operation))]
    pub async fn run(&self, operation: CompressOperation) -> Result<CompressedImage, ImageError> {
        let start = Instant::now();
        let _permit = self
            .semaphore
            .try_acquire()
            .map_err(|_| ImageError::Overloaded)?;

        let CompressOperation { source, limits } = operation;
        let result = tokio::task::spawn_blocking(move || compress(source, &limits))
            .await
            .map_err(|_| ImageError::WorkerFailed)?;

        match &result {
            Ok(image) => debug!(
                elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                size = image.bytes.len(),
                "compression finished"
            ),
            Err(e) => warn!(error = %e, "compression failed"),
        }
        result
    }
}

impl Default for ImageCompressor {
    fn default() -> Self {
        Self::new(2)
    }
}
