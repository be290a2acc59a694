// src/models/ride.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::request::RideRequest;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideState {
    Requested, // Accepted into the queue, waiting for a driver
    Matched,   // Driver assigned, heading to pickup
    Arriving,  // Driver inside the pickup geofence
    Onboard,   // Rider confirmed boarding, fare locked
    Completed,
    Cancelled,
}

impl RideState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideState::Completed | RideState::Cancelled)
    }

    /// States in which a driver is bound to the ride.
    pub fn holds_driver(&self) -> bool {
        matches!(self, RideState::Matched | RideState::Arriving | RideState::Onboard)
    }

    /// The transition table. `None` means the event is not allowed here.
    pub fn next(&self, event: &RideEvent) -> Option<RideState> {
        match (self, event) {
            (state, _) if state.is_terminal() => None,
            (_, RideEvent::Cancel { .. }) => Some(RideState::Cancelled),
            (RideState::Requested, RideEvent::Matched { .. }) => Some(RideState::Matched),
            (RideState::Matched, RideEvent::DriverArrived) => Some(RideState::Arriving),
            (RideState::Arriving, RideEvent::RiderBoarded) => Some(RideState::Onboard),
            (RideState::Onboard, RideEvent::TripEnded { .. }) => Some(RideState::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for RideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RideState::Requested => "requested",
            RideState::Matched => "matched",
            RideState::Arriving => "arriving",
            RideState::Onboard => "onboard",
            RideState::Completed => "completed",
            RideState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum CancellationReason {
    RiderRequested,
    DriverRequested,
    NoDriverTimeout,
    Other(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Rider(String),
    Driver(String),
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Rider(id) => write!(f, "rider:{}", id),
            Actor::Driver(id) => write!(f, "driver:{}", id),
            Actor::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RideEvent {
    Matched { driver_id: String },
    DriverArrived,
    RiderBoarded,
    TripEnded { manual: bool },
    Cancel { reason: CancellationReason },
}

impl RideEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RideEvent::Matched { .. } => "match",
            RideEvent::DriverArrived => "driver_arrives",
            RideEvent::RiderBoarded => "rider_boards",
            RideEvent::TripEnded { .. } => "trip_ends",
            RideEvent::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Fare {
    pub estimated: u64,
    pub final_amount: Option<u64>,
    pub currency: String,
    pub locked: bool,
}

impl Fare {
    pub fn estimate(amount: u64, currency: impl Into<String>) -> Self {
        Self {
            estimated: amount,
            final_amount: None,
            currency: currency.into(),
            locked: false,
        }
    }

    /// The amount the rider is charged: final if settled, else the estimate.
    pub fn amount(&self) -> u64 {
        self.final_amount.unwrap_or(self.estimated)
    }
}

/// One append-only entry of a ride's transition log.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TransitionRecord {
    pub state: RideState,
    pub at: DateTime<Utc>,
    pub actor: Actor,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RideTimestamps {
    pub requested_at: Option<DateTime<Utc>>,
    pub matched_at: Option<DateTime<Utc>>,
    pub arriving_at: Option<DateTime<Utc>>,
    pub onboard_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Ride {
    pub id: String,
    pub request: RideRequest,
    pub driver_id: Option<String>,
    pub fare: Fare,
    pub state: RideState,
    pub timestamps: RideTimestamps,
    pub cancellation_reason: Option<CancellationReason>,
    history: Vec<TransitionRecord>,
}

/// Rejected transition: the event is not in the table for `state`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRejected {
    pub state: RideState,
    pub event: &'static str,
}

impl Ride {
    pub fn new(request: RideRequest, fare: Fare) -> Self {
        let at = request.requested_at;
        let actor = Actor::Rider(request.rider_id.clone());
        Self {
            id: request.ride_id.clone(),
            request,
            driver_id: None,
            fare,
            state: RideState::Requested,
            timestamps: RideTimestamps {
                requested_at: Some(at),
                ..Default::default()
            },
            cancellation_reason: None,
            history: vec![TransitionRecord {
                state: RideState::Requested,
                at,
                actor,
            }],
        }
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn rider_id(&self) -> &str {
        &self.request.rider_id
    }

    /// Applies `event`, updating state, assignment, fare and the log.
    /// Leaves the ride untouched when the transition is not allowed.
    pub fn apply(
        &mut self,
        event: &RideEvent,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<RideState, TransitionRejected> {
        let next = self.state.next(event).ok_or(TransitionRejected {
            state: self.state,
            event: event.name(),
        })?;

        match event {
            RideEvent::Matched { driver_id } => {
                self.driver_id = Some(driver_id.clone());
                self.request.driver_id = Some(driver_id.clone());
                self.timestamps.matched_at = Some(at);
            }
            RideEvent::DriverArrived => self.timestamps.arriving_at = Some(at),
            RideEvent::RiderBoarded => {
                self.fare.locked = true;
                self.timestamps.onboard_at = Some(at);
            }
            RideEvent::TripEnded { .. } => {
                self.fare.final_amount = Some(self.fare.estimated);
                self.timestamps.completed_at = Some(at);
            }
            RideEvent::Cancel { reason } => {
                self.cancellation_reason = Some(reason.clone());
                self.timestamps.cancelled_at = Some(at);
            }
        }

        self.state = next;
        self.request.status = next;
        self.history.push(TransitionRecord {
            state: next,
            at,
            actor,
        });
        Ok(next)
    }

    /// True when the logged states form a path through the transition table.
    pub fn history_is_valid(&self) -> bool {
        let mut states = self.history.iter().map(|record| record.state);
        let Some(first) = states.next() else {
            return false;
        };
        if first != RideState::Requested {
            return false;
        }
        let mut current = first;
        for state in states {
            let allowed = match state {
                RideState::Cancelled => !current.is_terminal(),
                RideState::Matched => current == RideState::Requested,
                RideState::Arriving => current == RideState::Matched,
                RideState::Onboard => current == RideState::Arriving,
                RideState::Completed => current == RideState::Onboard,
                RideState::Requested => false,
            };
            if !allowed {
                return false;
            }
            current = state;
        }
        current == self.state
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideResponse {
    pub id: String,
    pub rider_id: String,
    pub request: RideRequest,
    pub driver_id: Option<String>,
    pub state: RideState,
    pub fare: Fare,
    pub timestamps: RideTimestamps,
    pub cancellation_reason: Option<CancellationReason>,
    pub history: Vec<TransitionRecord>,
    pub version: u64,
}

impl RideResponse {
    pub fn from_ride(ride: Ride, version: u64) -> Self {
        Self {
            id: ride.id,
            rider_id: ride.request.rider_id.clone(),
            request: ride.request,
            driver_id: ride.driver_id,
            state: ride.state,
            fare: ride.fare,
            timestamps: ride.timestamps,
            cancellation_reason: ride.cancellation_reason,
            history: ride.history,
            version,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideHistoryEntry {
    pub ride_id: String,
    pub ride_type: super::request::RideType,
    pub state: RideState,
    pub fare: u64,
    pub currency: String,
    pub requested_at: DateTime<Utc>,
    pub driver_id: Option<String>,
}

impl From<&Ride> for RideHistoryEntry {
    fn from(ride: &Ride) -> Self {
        Self {
            ride_id: ride.id.clone(),
            ride_type: ride.request.ride_type,
            state: ride.state,
            fare: ride.fare.amount(),
            currency: ride.fare.currency.clone(),
            requested_at: ride.request.requested_at,
            driver_id: ride.driver_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CancelRideBody {
    pub actor: Actor,
    pub reason: CancellationReason,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverArrivalBody {
    pub driver_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardingBody {
    pub rider_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TripCompletionBody {
    pub driver_id: String,
    #[serde(default)]
    pub manual: bool,
}
