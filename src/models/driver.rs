// src/models/driver.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geo::Coordinate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DriverAvailability {
    Offline,   // Not taking rides
    Available, // Idle, can be matched
    EnRoute,   // Heading to a pickup
    OnTrip,    // Rider onboard
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Vehicle {
    pub make_model: String,   // e.g. "Toyota Corolla"
    pub plate_number: String, // e.g. "JA 1234"
    pub color: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    pub rating: f32, // Average rating (0-5)
    pub vehicle: Vehicle,
    pub location: Option<Coordinate>,
    pub availability: DriverAvailability,
    pub current_ride_id: Option<String>,
    pub idle_since: Option<DateTime<Utc>>, // Set while available
    pub last_ping_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn register(registration: DriverRegistration, at: DateTime<Utc>) -> Self {
        Self {
            id: registration.id,
            name: registration.name,
            phone_number: registration.phone_number,
            rating: registration.rating.unwrap_or(5.0),
            vehicle: registration.vehicle,
            location: registration.location,
            availability: DriverAvailability::Offline,
            current_ride_id: None,
            idle_since: None,
            last_ping_at: registration.location.map(|_| at),
            created_at: at,
            updated_at: at,
        }
    }

    /// available ⇒ no ride; en_route/on_trip ⇒ ride set.
    pub fn is_consistent(&self) -> bool {
        match self.availability {
            DriverAvailability::Available | DriverAvailability::Offline => {
                self.current_ride_id.is_none()
            }
            DriverAvailability::EnRoute | DriverAvailability::OnTrip => {
                self.current_ride_id.is_some()
            }
        }
    }

    pub fn is_matchable(&self) -> bool {
        self.availability == DriverAvailability::Available
            && self.current_ride_id.is_none()
            && self.location.is_some()
    }

    pub fn is_serving(&self, ride_id: &str) -> bool {
        self.current_ride_id.as_deref() == Some(ride_id)
    }

    pub fn assign(&mut self, ride_id: &str, at: DateTime<Utc>) {
        self.availability = DriverAvailability::EnRoute;
        self.current_ride_id = Some(ride_id.to_string());
        self.idle_since = None;
        self.updated_at = at;
    }

    pub fn start_trip(&mut self, at: DateTime<Utc>) {
        self.availability = DriverAvailability::OnTrip;
        self.updated_at = at;
    }

    pub fn release(&mut self, at: DateTime<Utc>) {
        self.availability = DriverAvailability::Available;
        self.current_ride_id = None;
        self.idle_since = Some(at);
        self.updated_at = at;
    }

    pub fn go_offline(&mut self, at: DateTime<Utc>) {
        self.availability = DriverAvailability::Offline;
        self.idle_since = None;
        self.updated_at = at;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverRegistration {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    pub vehicle: Vehicle,
    pub location: Option<Coordinate>,
    pub rating: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverLocationUpdate {
    pub location: Coordinate,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverAvailabilityUpdate {
    pub availability: DriverAvailability,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverResponse {
    pub id: String,
    pub name: String,
    pub rating: f32,
    pub vehicle: Vehicle,
    pub location: Option<Coordinate>,
    pub availability: DriverAvailability,
    pub current_ride_id: Option<String>,
    pub idle_since: Option<DateTime<Utc>>,
    pub version: u64,
}

impl DriverResponse {
    pub fn from_driver(driver: Driver, version: u64) -> Self {
        Self {
            id: driver.id,
            name: driver.name,
            rating: driver.rating,
            vehicle: driver.vehicle,
            location: driver.location,
            availability: driver.availability,
            current_ride_id: driver.current_ride_id,
            idle_since: driver.idle_since,
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn registration() -> DriverRegistration {
        DriverRegistration {
            id: "drv-marcus".to_string(),
            name: "Marcus Brown".to_string(),
            phone_number: "+1876-555-0123".to_string(),
            vehicle: Vehicle {
                make_model: "Toyota Corolla".to_string(),
                plate_number: "JA 1234".to_string(),
                color: None,
            },
            location: Some(Coordinate::new(18.0123, -76.7967)),
            rating: Some(4.8),
        }
    }

    #[test]
    fn availability_and_ride_assignment_stay_consistent() {
        let t0 = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
        let mut driver = Driver::register(registration(), t0);
        assert_eq!(driver.availability, DriverAvailability::Offline);
        assert!(driver.is_consistent());
        assert!(!driver.is_matchable());

        driver.release(t0);
        assert!(driver.is_matchable());
        assert_eq!(driver.idle_since, Some(t0));

        driver.assign("rid-1", t0);
        assert!(driver.is_consistent());
        assert!(driver.is_serving("rid-1"));
        assert!(!driver.is_matchable());

        driver.start_trip(t0);
        assert_eq!(driver.availability, DriverAvailability::OnTrip);
        assert!(driver.is_consistent());

        driver.release(t0);
        assert!(driver.is_consistent());
        assert_eq!(driver.current_ride_id, None);
    }
}
