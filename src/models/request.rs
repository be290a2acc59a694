// src/models/request.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geo::Coordinate;
use super::ride::RideState;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideType {
    Standard, // JamRide: affordable rides
    Premium,  // JamLux: premium comfort
    Shared,   // JamShare: share & save
}

impl RideType {
    pub const ALL: [RideType; 3] = [RideType::Standard, RideType::Premium, RideType::Shared];

    pub fn display_name(&self) -> &'static str {
        match self {
            RideType::Standard => "JamRide",
            RideType::Premium => "JamLux",
            RideType::Shared => "JamShare",
        }
    }
}

/// A rider's ask for a trip. Immutable once accepted, except for the
/// status and assignment fields.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideRequest {
    pub id: String,
    pub rider_id: String,
    pub pickup: Coordinate,
    pub destination: Coordinate,
    pub ride_type: RideType,
    pub requested_at: DateTime<Utc>,
    pub status: RideState,
    pub ride_id: String,
    pub driver_id: Option<String>,
}

impl RideRequest {
    /// How long this request has been waiting at `now`.
    pub fn waited(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.requested_at)
    }
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideRequestBody {
    pub rider_id: String,
    pub pickup: Coordinate,
    pub destination: Coordinate,
    pub ride_type: RideType,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FareEstimateRequest {
    pub pickup: Coordinate,
    pub destination: Coordinate,
    pub ride_type: RideType,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FareEstimateResponse {
    pub ride_type: RideType,
    pub display_name: String,
    pub amount: u64,
    pub currency: String,
    pub distance_km: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ride_type_uses_snake_case_on_the_wire() {
        assert_eq!(serde_json::to_string(&RideType::Premium).unwrap(), "\"premium\"");
        let parsed: RideType = serde_json::from_str("\"shared\"").unwrap();
        assert_eq!(parsed, RideType::Shared);
        assert!(serde_json::from_str::<RideType>("\"luxury\"").is_err());
    }
}
