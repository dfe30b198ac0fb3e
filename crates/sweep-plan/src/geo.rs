use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Launch point the local sweep frame is anchored to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Origin {
    pub lat: f64,
    pub lon: f64,
}

impl Origin {
    /// Project a local offset (meters east/north of the origin) to lat/lon.
    // Equirectangular about the origin; good enough for sweep-sized areas.
    pub fn offset(&self, east_m: f64, north_m: f64) -> (f64, f64) {
        let lat = self.lat + (north_m / EARTH_RADIUS_M).to_degrees();
        let lon = self.lon
            + (east_m / (EARTH_RADIUS_M * self.lat.to_radians().cos())).to_degrees();
        (lat, lon)
    }
}
