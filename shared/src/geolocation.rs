use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use thiserror::Error;

use crux_core::capability::Operation;
use crate::{
    AppError, CoordinateError, ErrorKind, UnixTimeMs, ValidatedCoordinate, GEOLOCATION_TIMEOUT,
};

/// A position reported by the device. Coordinates are always in range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    coordinate: ValidatedCoordinate,
    accuracy_m: f64,
    timestamp: UnixTimeMs,
}

impl GeoFix {
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy_m: f64,
        timestamp: UnixTimeMs,
    ) -> Result<Self, CoordinateError> {
        if !accuracy_m.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        Ok(Self {
            coordinate: ValidatedCoordinate::new(latitude, longitude)?,
            accuracy_m: accuracy_m.max(0.0),
            timestamp,
        })
    }

    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.coordinate.lat()
    }

    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.coordinate.lon()
    }

    #[must_use]
    pub const fn accuracy_m(&self) -> f64 {
        self.accuracy_m
    }

    #[must_use]
    pub const fn timestamp(&self) -> UnixTimeMs {
        self.timestamp
    }

    #[must_use]
    pub const fn coordinate(&self) -> ValidatedCoordinate {
        self.coordinate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeoError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("location request timed out")]
    Timeout,
}

impl GeoError {
    /// Normalizes the W3C `GeolocationPositionError.code`.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::PermissionDenied,
            3 => Self::Timeout,
            _ => Self::PositionUnavailable,
        }
    }

    /// Normalizes the string codes different platforms report.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let key: String = name
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "permissiondenied" | "denied" | "notallowed" | "notallowederror" => {
                Self::PermissionDenied
            }
            "timeout" | "timedout" => Self::Timeout,
            _ => Self::PositionUnavailable,
        }
    }

    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission-denied",
            Self::PositionUnavailable => "position-unavailable",
            Self::Timeout => "timeout",
        }
    }

    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Location access is blocked. Allow location for this site in your settings, then retry."
            }
            Self::PositionUnavailable => {
                "Your position is unavailable right now. Move to an open area and retry."
            }
            Self::Timeout => "Finding your location took too long. Please retry.",
        }
    }

    /// Permission problems need a settings change before a retry can work.
    #[must_use]
    pub const fn needs_settings_change(self) -> bool {
        matches!(self, Self::PermissionDenied)
    }
}

impl From<GeoError> for AppError {
    fn from(e: GeoError) -> Self {
        let kind = match e {
            GeoError::PermissionDenied => ErrorKind::LocationPermissionDenied,
            GeoError::PositionUnavailable | GeoError::Timeout => ErrorKind::Location,
        };
        AppError::new(kind, e.user_message()).with_context("geo_error", e.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationOptions {
    pub high_accuracy: bool,
    pub timeout_ms: u64,
    pub maximum_age_ms: u64,
}

impl Default for GeolocationOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: u64::try_from(GEOLOCATION_TIMEOUT.as_millis()).unwrap_or(20_000),
            maximum_age_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeolocationOperation {
    pub options: GeolocationOptions,
}

pub type GeoResult = Result<GeoFix, GeoError>;

impl Operation for GeolocationOperation {
    type Output = GeoResult;
}

pub const GEOCODE_CACHE_CAPACITY: usize = 64;

/// Reverse-geocoding results keyed by coordinates rounded to 4 decimals
/// (about 11 m), so jitter between fixes doesn't cost a round trip.
pub struct GeocodeCache {
    entries: LruCache<(i64, i64), String>,
}

impl GeocodeCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn key(fix: &GeoFix) -> (i64, i64) {
        (
            (fix.latitude() * 10_000.0).round() as i64,
            (fix.longitude() * 10_000.0).round() as i64,
        )
    }

    pub fn get(&mut self, fix: &GeoFix) -> Option<String> {
        self.entries.get(&Self::key(fix)).cloned()
    }

    pub fn insert(&mut self, fix: &GeoFix, address: String) {
        self.entries.put(Self::key(fix), address);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for GeocodeCache {
    fn default() -> Self {
        Self::new(GEOCODE_CACHE_CAPACITY)
    }
}

impl fmt::Debug for GeocodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocodeCache")
            .field("len", &self.entries.len())
            .field("cap", &self.entries.cap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lon: f64) -> GeoFix {
        GeoFix::new(lat, lon, 12.0, UnixTimeMs(1_000)).unwrap()
    }

    #[test]
    fn test_fix_rejects_invalid_coordinates() {
        assert!(GeoFix::new(95.0, 0.0, 5.0, UnixTimeMs(0)).is_err());
        assert!(GeoFix::new(0.0, 0.0, f64::INFINITY, UnixTimeMs(0)).is_err());
        let clamped = GeoFix::new(0.0, 0.0, -3.0, UnixTimeMs(0)).unwrap();
        assert!(clamped.accuracy_m().abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_normalization() {
        assert_eq!(GeoError::from_code(1), GeoError::PermissionDenied);
        assert_eq!(GeoError::from_code(2), GeoError::PositionUnavailable);
        assert_eq!(GeoError::from_code(3), GeoError::Timeout);
        assert_eq!(GeoError::from_code(42), GeoError::PositionUnavailable);
        assert_eq!(GeoError::from_name("PERMISSION_DENIED"), GeoError::PermissionDenied);
        assert_eq!(GeoError::from_name("NotAllowedError"), GeoError::PermissionDenied);
        assert_eq!(GeoError::from_name("timeout"), GeoError::Timeout);
        assert_eq!(GeoError::from_name("kCLErrorLocationUnknown"), GeoError::PositionUnavailable);
    }

    #[test]
    fn test_error_serializes_as_kebab_code() {
        let json = serde_json::to_string(&GeoError::PermissionDenied).unwrap();
        assert_eq!(json, "\"permission-denied\"");
        assert_eq!(GeoError::PositionUnavailable.code(), "position-unavailable");
        assert!(GeoError::PermissionDenied.needs_settings_change());
        assert!(!GeoError::Timeout.needs_settings_change());
    }

    #[test]
    fn test_default_timeout_is_twenty_seconds() {
        assert_eq!(GeolocationOptions::default().timeout_ms, 20_000);
    }

    #[test]
    fn test_cache_rounds_to_four_decimals() {
        let mut cache = GeocodeCache::new(2);
        cache.insert(&fix(28.613_91, 77.209_01), "Janpath, New Delhi".into());
        assert_eq!(
            cache.get(&fix(28.613_94, 77.208_99)).as_deref(),
            Some("Janpath, New Delhi")
        );
        assert!(cache.get(&fix(28.6150, 77.2090)).is_none());
    }

    #[test]
    fn test_cache_evicts_least_recent() {
        let mut cache = GeocodeCache::new(1);
        cache.insert(&fix(1.0, 1.0), "a".into());
        cache.insert(&fix(2.0, 2.0), "b".into());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fix(1.0, 1.0)).is_none());
    }
}
