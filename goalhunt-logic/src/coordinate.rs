use std::fmt;

use serde::{Deserialize, Serialize};

/// A "part" of a coordinate, in degrees
pub type CoordinateComponent = f64;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    #[error("latitude {0} is outside of [-90, 90]")]
    Latitude(CoordinateComponent),
    #[error("longitude {0} is outside of [-180, 180]")]
    Longitude(CoordinateComponent),
}

/// A point on the Earth's surface. Always within range, both components are set together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    lat: CoordinateComponent,
    lng: CoordinateComponent,
}

/// Unchecked shape of a coordinate as it arrives over the wire
#[derive(Deserialize)]
struct RawCoordinate {
    lat: CoordinateComponent,
    lng: CoordinateComponent,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.lat, raw.lng)
    }
}

impl Coordinate {
    pub fn new(lat: CoordinateComponent, lng: CoordinateComponent) -> Result<Self, CoordinateError> {
        // NaN fails both range checks
        if !(-90.0..=90.0).contains(&lat) {
            Err(CoordinateError::Latitude(lat))
        } else if !(-180.0..=180.0).contains(&lng) {
            Err(CoordinateError::Longitude(lng))
        } else {
            Ok(Self { lat, lng })
        }
    }

    pub fn lat(&self) -> CoordinateComponent {
        self.lat
    }

    pub fn lng(&self) -> CoordinateComponent {
        self.lng
    }

    /// Great-circle distance to `other` in meters (haversine)
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lng)
    }
}
