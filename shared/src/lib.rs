// lib.rs - Grievance submission core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod api;
pub mod app;
pub mod capabilities;
pub mod category;
pub mod classification;
pub mod config;
pub mod duplicates;
pub mod event;
pub mod geolocation;
pub mod image_processing;
pub mod model;
pub mod offline_store;
pub mod retry;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod tracking;
pub mod wizard;

#[cfg(all(feature = "shell", not(target_arch = "wasm32")))]
pub mod shell;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use event::Event;
pub use model::{Model, ViewModel};

pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const DRAFT_TTL_MS: u64 = 24 * 60 * 60 * 1000;
pub const AUTOSAVE_DEBOUNCE_MS: u64 = 2_000;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.40;
pub const MAX_COMPRESSED_BYTES: usize = 1_000_000;
pub const MAX_PROCESSED_DIMENSION: u32 = 1920;
pub const MAX_INPUT_IMAGE_BYTES: usize = 20 * 1024 * 1024;
pub const MAX_DECODE_DIMENSION: u32 = 12_000;
pub const MAX_IMAGE_ALLOC: u64 = 512 * 1024 * 1024;
pub const MAX_QUEUED_COMPLAINTS: usize = 200;
pub const GEOLOCATION_TIMEOUT: Duration = Duration::from_secs(20);
pub const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DUPLICATE_CHECK_TIMEOUT: Duration = Duration::from_secs(15);
pub const GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);
pub const CREATE_COMPLAINT_TIMEOUT: Duration = Duration::from_secs(60);
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
pub const MAX_USER_RETRY_ATTEMPTS: u32 = 3;
pub const BASE_RETRY_DELAY_MS: u64 = 1000;
pub const MAX_RETRY_DELAY_MS: u64 = 60000;
pub const JITTER_MAX_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Storage,
    Serialization,
    Deserialization,
    ImageProcessing,
    Classification,
    Location,
    LocationPermissionDenied,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::ImageProcessing => "IMAGE_PROCESSING_ERROR",
            Self::Classification => "CLASSIFICATION_ERROR",
            Self::Location => "LOCATION_ERROR",
            Self::LocationPermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network
            | Self::Timeout
            | Self::Conflict
            | Self::RateLimited
            | Self::Storage
            | Self::Classification
            | Self::Location => ErrorSeverity::Transient,

            Self::Serialization | Self::Deserialization | Self::Internal | Self::InvalidState => {
                ErrorSeverity::Fatal
            }

            Self::Validation
            | Self::NotFound
            | Self::ImageProcessing
            | Self::LocationPermissionDenied
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::RateLimited
                | Self::Storage
                | Self::Conflict
                | Self::Classification
                | Self::Location
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Validation | ErrorKind::Classification => self.message.clone(),
            ErrorKind::NotFound => "The requested complaint could not be found.".into(),
            ErrorKind::Conflict => {
                "A similar complaint already exists nearby. Please review it before submitting."
                    .into()
            }
            ErrorKind::RateLimited => "Too many requests. Please wait a moment and try again.".into(),
            ErrorKind::Storage => {
                "Unable to save data locally. Please free up some storage space.".into()
            }
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::ImageProcessing => {
                "Image processing failed. Please retake or choose another photo.".into()
            }
            ErrorKind::Location => {
                "Unable to determine your location. Please check your GPS settings.".into()
            }
            ErrorKind::LocationPermissionDenied => {
                "Location access is required. Please enable location permissions in Settings."
                    .into()
            }
            ErrorKind::InvalidState => "Something went wrong. Please start again.".into(),
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }

    /// Builds an error from a non-2xx response, taking the server's
    /// `message` (or FastAPI's `detail`) when the body carries one.
    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            400 | 422 => ErrorKind::Validation,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            408 | 504 => ErrorKind::Timeout,
            500..=599 => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        };

        let message = body
            .and_then(server_message)
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        Self::new(kind, message).with_context("http_status", status.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Extracts a human-readable message from an error body, if the server sent one.
#[must_use]
pub fn server_message(body: &[u8]) -> Option<String> {
    let parsed: ApiErrorResponse = serde_json::from_slice(body).ok()?;
    let detail = parsed.detail.and_then(|d| match d {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    });
    parsed
        .message
        .or(detail)
        .or(parsed.error)
        .filter(|m| !m.trim().is_empty())
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

impl From<CoordinateError> for AppError {
    fn from(e: CoordinateError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("value too long ({len} > {max} characters)")]
    TooLong { len: usize, max: usize },
    #[error("value cannot be empty")]
    Empty,
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedCoordinate {
    lat: f64,
    lon: f64,
}

impl ValidatedCoordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lon(self) -> f64 {
        self.lon
    }
}

impl TryFrom<(f64, f64)> for ValidatedCoordinate {
    type Error = CoordinateError;

    fn try_from((lat, lon): (f64, f64)) -> Result<Self, Self::Error> {
        Self::new(lat, lon)
    }
}

#[must_use]
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "Unknown".to_string();
    }

    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else if meters < 10_000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{:.0} km", meters / 1000.0)
    }
}

#[must_use]
pub fn format_time_ago(timestamp_ms: u64, now_ms: u64) -> String {
    if timestamp_ms > now_ms {
        let future_diff_secs = (timestamp_ms - now_ms) / 1000;
        return if future_diff_secs < 60 {
            "Just now".into()
        } else {
            "Upcoming".into()
        };
    }

    let diff_secs = (now_ms - timestamp_ms) / 1000;

    if diff_secs < 5 {
        return "Just now".into();
    }
    if diff_secs < 60 {
        return format!("{diff_secs}s ago");
    }

    let diff_mins = diff_secs / 60;
    if diff_mins < 60 {
        return format!("{diff_mins}m ago");
    }

    let diff_hours = diff_mins / 60;
    if diff_hours < 24 {
        return format!("{diff_hours}h ago");
    }

    let diff_days = diff_hours / 24;
    if diff_days < 7 {
        return format!("{diff_days}d ago");
    }
    if diff_days < 30 {
        return format!("{}w ago", diff_days / 7);
    }
    if diff_days < 365 {
        return format!("{}mo ago", diff_days / 30);
    }

    format!("{}y ago", diff_days / 365)
}

/// Explicit timestamp unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub const fn add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

impl From<chrono::DateTime<chrono::Utc>> for UnixTimeMs {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Self(u64::try_from(value.timestamp_millis()).unwrap_or(0))
    }
}

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(ComplaintId);
typed_id!(OfflineId);
typed_id!(SessionId);

// --- Bounded text ---

/// Text bounded by a character count (not bytes: descriptions are typed
/// in any script).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub struct BoundedText<const MAX: usize>(String);

impl<const MAX: usize> TryFrom<String> for BoundedText<MAX> {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<const MAX: usize> From<BoundedText<MAX>> for String {
    fn from(value: BoundedText<MAX>) -> Self {
        value.0
    }
}

impl<const MAX: usize> BoundedText<MAX> {
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        let len = s.chars().count();
        if len > MAX {
            return Err(ValidationError::TooLong { len, max: MAX });
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        MAX.saturating_sub(self.0.chars().count())
    }
}

pub type Description = BoundedText<MAX_DESCRIPTION_CHARS>;

#[cfg(test)]
mod tests {
    use super::*;

    mod coordinate_tests {
        use super::*;

        #[test]
        fn test_valid_coordinates() {
            assert!(ValidatedCoordinate::new(0.0, 0.0).is_ok());
            assert!(ValidatedCoordinate::new(90.0, 180.0).is_ok());
            assert!(ValidatedCoordinate::new(-90.0, -180.0).is_ok());
            assert!(ValidatedCoordinate::new(28.6139, 77.2090).is_ok());
        }

        #[test]
        fn test_invalid_coordinates() {
            assert!(matches!(
                ValidatedCoordinate::new(91.0, 0.0),
                Err(CoordinateError::LatitudeOutOfRange(_))
            ));
            assert!(matches!(
                ValidatedCoordinate::new(0.0, -181.0),
                Err(CoordinateError::LongitudeOutOfRange(_))
            ));
            assert!(matches!(
                ValidatedCoordinate::new(f64::NAN, 0.0),
                Err(CoordinateError::NonFinite)
            ));
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn test_format_distance() {
            assert_eq!(format_distance(12.0), "12 m");
            assert_eq!(format_distance(999.0), "999 m");
            assert_eq!(format_distance(1500.0), "1.5 km");
            assert_eq!(format_distance(15_000.0), "15 km");
            assert_eq!(format_distance(f64::NAN), "Unknown");
            assert_eq!(format_distance(-1.0), "Unknown");
        }

        #[test]
        fn test_format_time_ago() {
            assert_eq!(format_time_ago(1000, 1000), "Just now");
            assert_eq!(format_time_ago(0, 10_000), "10s ago");
            assert_eq!(format_time_ago(0, 300_000), "5m ago");
            assert_eq!(format_time_ago(0, 7_200_000), "2h ago");
            assert_eq!(format_time_ago(0, 172_800_000), "2d ago");
            assert_eq!(format_time_ago(120_000, 1000), "Upcoming");
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn test_from_http_status_uses_server_message() {
            let body = br#"{"success":false,"message":"Category is required"}"#;
            let err = AppError::from_http_status(400, Some(body));
            assert_eq!(err.kind, ErrorKind::Validation);
            assert_eq!(err.message, "Category is required");
            assert_eq!(err.context.get("http_status").map(String::as_str), Some("400"));
        }

        #[test]
        fn test_from_http_status_reads_fastapi_detail() {
            let body = br#"{"detail":"Model not loaded yet."}"#;
            let err = AppError::from_http_status(503, Some(body));
            assert_eq!(err.kind, ErrorKind::Internal);
            assert_eq!(err.message, "Model not loaded yet.");
        }

        #[test]
        fn test_from_http_status_generic_fallback() {
            let err = AppError::from_http_status(502, Some(b"<html>bad gateway</html>"));
            assert_eq!(err.message, "HTTP error: 502");
        }

        #[test]
        fn test_retryability() {
            assert!(AppError::new(ErrorKind::Network, "x").is_retryable());
            assert!(!AppError::new(ErrorKind::Validation, "x").is_retryable());
            assert!(!AppError::new(ErrorKind::Internal, "x").is_retryable());
        }
    }

    mod text_tests {
        use super::*;

        #[test]
        fn test_description_counts_characters() {
            let text = "é".repeat(MAX_DESCRIPTION_CHARS);
            let d = Description::new(text).unwrap();
            assert_eq!(d.remaining(), 0);
            assert!(Description::new("x".repeat(MAX_DESCRIPTION_CHARS + 1)).is_err());
        }

        #[test]
        fn test_bounded_text_validates_on_deserialize() {
            let ok: Description = serde_json::from_str("\"broken lamp\"").unwrap();
            assert_eq!(ok.as_str(), "broken lamp");
            let long = format!("\"{}\"", "x".repeat(MAX_DESCRIPTION_CHARS + 1));
            assert!(serde_json::from_str::<Description>(&long).is_err());
        }

        #[test]
        fn test_typed_ids_generate_unique() {
            assert_ne!(OfflineId::generate(), OfflineId::generate());
            assert_eq!(ComplaintId::new("GRV-1").to_string(), "GRV-1");
        }
    }
}
