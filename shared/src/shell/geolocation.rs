use tracing::debug;

use crate::geolocation::{GeoError, GeoFix, GeolocationOptions};
use crate::UnixTimeMs;

/// Where the shell gets a position from. A terminal has no GPS, so the CLI
/// takes coordinates as arguments.
pub trait GeolocationProvider {
    fn locate(&self, options: &GeolocationOptions) -> Result<GeoFix, GeoError>;
}

/// Always reports the same place, stamped with the time of the request.
pub struct FixedLocation {
    fix: GeoFix,
}

impl FixedLocation {
    #[must_use]
    pub const fn new(fix: GeoFix) -> Self {
        Self { fix }
    }
}

impl GeolocationProvider for FixedLocation {
    fn locate(&self, options: &GeolocationOptions) -> Result<GeoFix, GeoError> {
        debug!(high_accuracy = options.high_accuracy, "fixed location");
        GeoFix::new(
            self.fix.latitude(),
            self.fix.longitude(),
            self.fix.accuracy_m(),
            UnixTimeMs::now(),
        )
        .map_err(|_| GeoError::PositionUnavailable)
    }
}

/// No position available, for the given reason.
pub struct NoLocation {
    error: GeoError,
}

impl NoLocation {
    #[must_use]
    pub const fn new(error: GeoError) -> Self {
        Self { error }
    }
}

impl GeolocationProvider for NoLocation {
    fn locate(&self, _options: &GeolocationOptions) -> Result<GeoFix, GeoError> {
        Err(self.error)
    }
}
