// src/models/geo.rs
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Great-circle distance using the haversine formula.
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        let lat1_rad = self.latitude.to_radians();
        let lat2_rad = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }

    pub fn is_within_km(&self, other: &Coordinate, radius_km: f64) -> bool {
        self.distance_km(other) <= radius_km
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Latitude/longitude bounding box the service operates in.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ServiceRegion {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl ServiceRegion {
    pub fn contains(&self, point: &Coordinate) -> bool {
        point.is_finite()
            && (self.min_latitude..=self.max_latitude).contains(&point.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude)
    }
}

impl Default for ServiceRegion {
    // Island of Jamaica
    fn default() -> Self {
        Self {
            min_latitude: 17.70,
            max_latitude: 18.55,
            min_longitude: -78.40,
            max_longitude: -76.15,
        }
    }
}
