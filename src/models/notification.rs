// src/models/notification.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ride::CancellationReason;

/// Events the core publishes to rider and driver clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RideNotification {
    RideMatched {
        ride_id: String,
        rider_id: String,
        driver_id: String,
        fare: u64,
    },
    DriverArriving {
        ride_id: String,
        rider_id: String,
        driver_id: String,
    },
    EtaUpdated {
        ride_id: String,
        rider_id: String,
        driver_id: String,
        eta_minutes: u32,
    },
    RideCompleted {
        ride_id: String,
        rider_id: String,
        driver_id: String,
        fare: u64,
    },
    RideCancelled {
        ride_id: String,
        rider_id: String,
        driver_id: Option<String>,
        reason: CancellationReason,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Rider(String),
    Driver(String),
}

impl RideNotification {
    pub fn ride_id(&self) -> &str {
        match self {
            RideNotification::RideMatched { ride_id, .. }
            | RideNotification::DriverArriving { ride_id, .. }
            | RideNotification::EtaUpdated { ride_id, .. }
            | RideNotification::RideCompleted { ride_id, .. }
            | RideNotification::RideCancelled { ride_id, .. } => ride_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RideNotification::RideMatched { .. } => "ride_matched",
            RideNotification::DriverArriving { .. } => "driver_arriving",
            RideNotification::EtaUpdated { .. } => "eta_updated",
            RideNotification::RideCompleted { .. } => "ride_completed",
            RideNotification::RideCancelled { .. } => "ride_cancelled",
        }
    }

    /// Who should hear about this event.
    pub fn recipients(&self) -> Vec<Recipient> {
        match self {
            RideNotification::RideMatched {
                rider_id, driver_id, ..
            }
            | RideNotification::RideCompleted {
                rider_id, driver_id, ..
            } => vec![
                Recipient::Rider(rider_id.clone()),
                Recipient::Driver(driver_id.clone()),
            ],
            RideNotification::DriverArriving { rider_id, .. }
            | RideNotification::EtaUpdated { rider_id, .. } => {
                vec![Recipient::Rider(rider_id.clone())]
            }
            RideNotification::RideCancelled {
                rider_id, driver_id, ..
            } => {
                let mut recipients = vec![Recipient::Rider(rider_id.clone())];
                if let Some(driver_id) = driver_id {
                    recipients.push(Recipient::Driver(driver_id.clone()));
                }
                recipients
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NotificationEnvelope {
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RideNotification,
}
