// src/models/rider.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-rider claim on the single active ride a rider may hold. Written
/// under compare-and-swap before a ride is created; a stale pointer to a
/// finished or missing ride counts as free.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RiderSlot {
    pub rider_id: String,
    pub ride_id: String,
    pub claimed_at: DateTime<Utc>,
}
