// src/services/ride_service.rs
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        driver::Driver,
        geo::Coordinate,
        notification::RideNotification,
        request::{FareEstimateRequest, FareEstimateResponse, RideRequest, RideRequestBody},
        ride::{
            Actor, CancellationReason, Fare, Ride, RideEvent, RideHistoryEntry, RideResponse,
            RideState,
        },
        rider::RiderSlot,
    },
    services::{
        fare_service::FareEstimator,
        matching_service::{MatchOutcome, MatchingEngine},
        notification_service::EventPublisher,
        queue_service::RideRequestQueue,
        store_service::{CasOutcome, EntityStore, StoreKeys, Versioned},
    },
    utils::{
        Clock,
        id_generator::{generate_request_id, generate_ride_id},
    },
};

// Urban average used for ETAs
const AVERAGE_SPEED_KMH: f64 = 30.0;

/// Minutes to cover `distance_km` at urban speed, rounded up, at least 1.
pub fn eta_minutes(distance_km: f64) -> u32 {
    (distance_km * 60.0 / AVERAGE_SPEED_KMH).ceil().max(1.0) as u32
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a ride may sit in `requested` before it is cancelled.
    pub request_timeout: Duration,
    pub pickup_geofence_km: f64,
    pub dropoff_geofence_km: f64,
    pub transition_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::minutes(5),
            pickup_geofence_km: 0.2,
            dropoff_geofence_km: 0.3,
            transition_attempts: 3,
        }
    }
}

#[async_trait]
pub trait RideOperations: Send + Sync {
    async fn estimate_fare(&self, request: FareEstimateRequest) -> DispatchResult<FareEstimateResponse>;
    async fn request_ride(&self, body: RideRequestBody) -> DispatchResult<RideResponse>;
    async fn cancel_ride(
        &self,
        ride_id: &str,
        actor: Actor,
        reason: CancellationReason,
    ) -> DispatchResult<RideResponse>;
    async fn get_ride_status(&self, ride_id: &str) -> DispatchResult<RideResponse>;
    async fn driver_arrived(&self, ride_id: &str, driver_id: &str) -> DispatchResult<RideResponse>;
    async fn rider_boarded(&self, ride_id: &str, rider_id: &str) -> DispatchResult<RideResponse>;
    async fn complete_trip(
        &self,
        ride_id: &str,
        driver_id: &str,
        manual: bool,
    ) -> DispatchResult<RideResponse>;
    async fn ride_history(&self, rider_id: &str) -> DispatchResult<Vec<RideHistoryEntry>>;
}

pub struct RideService {
    store: EntityStore,
    queue: Arc<RideRequestQueue>,
    fares: FareEstimator,
    matching: Arc<MatchingEngine>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl RideService {
    pub fn new(
        store: EntityStore,
        queue: Arc<RideRequestQueue>,
        fares: FareEstimator,
        matching: Arc<MatchingEngine>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            queue,
            fares,
            matching,
            publisher,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Applies `event` under the ride's version check, re-reading on
    /// conflict. `guard` runs against the latest ride on every attempt.
    async fn transition<G>(
        &self,
        ride_id: &str,
        event: RideEvent,
        actor: Actor,
        attempts: u32,
        guard: G,
    ) -> DispatchResult<Versioned<Ride>>
    where
        G: Fn(&Ride) -> DispatchResult<()> + Send + Sync,
    {
        let now = self.clock.now();
        let result = self
            .store
            .update::<Ride, _>(ride_id, attempts, |ride| {
                if ride.state.next(&event).is_none() {
                    return Err(DispatchError::InvalidTransition {
                        ride_id: ride_id.to_string(),
                        state: ride.state,
                        event: event.name().to_string(),
                    });
                }
                guard(ride)?;
                ride.apply(&event, actor.clone(), now)
                    .map_err(|rejected| DispatchError::InvalidTransition {
                        ride_id: ride_id.to_string(),
                        state: rejected.state,
                        event: rejected.event.to_string(),
                    })?;
                Ok(true)
            })
            .await;

        match result {
            Ok(Some(ride)) => {
                tracing::info!(
                    "Ride {} -> {} ({} by {})",
                    ride_id,
                    ride.data.state,
                    event.name(),
                    actor
                );
                Ok(ride)
            }
            Ok(None) => Err(DispatchError::ride_not_found(ride_id)),
            Err(e @ DispatchError::InvalidTransition { .. }) => {
                tracing::warn!("Rejected transition by {}: {}", actor, e);
                Err(e)
            }
            Err(e @ DispatchError::GuardRejected { .. }) => {
                tracing::debug!("{}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn load_ride(&self, ride_id: &str) -> DispatchResult<Versioned<Ride>> {
        self.store
            .get::<Ride>(ride_id)
            .await?
            .ok_or_else(|| DispatchError::ride_not_found(ride_id))
    }

    async fn load_driver(&self, driver_id: &str) -> DispatchResult<Versioned<Driver>> {
        self.store
            .get::<Driver>(driver_id)
            .await?
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))
    }

    async fn rider_rides(&self, rider_id: &str) -> DispatchResult<Vec<Versioned<Ride>>> {
        self.store
            .load_indexed::<Ride>(&StoreKeys::rides_by_rider(rider_id))
            .await
    }

    /// Points the rider's slot at `ride`, which must already be stored.
    /// Fails with DuplicateRequest while the slot names a ride in progress
    /// or another request for the same rider commits first.
    async fn claim_rider_slot(&self, ride: &Ride) -> DispatchResult<()> {
        let rider_id = ride.rider_id();
        let expected_version = match self.store.get::<RiderSlot>(rider_id).await? {
            Some(slot) => {
                let held = self.store.get::<Ride>(&slot.data.ride_id).await?;
                if held.is_some_and(|held| !held.data.state.is_terminal()) {
                    return Err(DispatchError::DuplicateRequest(rider_id.to_string()));
                }
                slot.version
            }
            None => 0,
        };

        let slot = RiderSlot {
            rider_id: rider_id.to_string(),
            ride_id: ride.id.clone(),
            claimed_at: ride.request.requested_at,
        };
        match self.store.commit(&slot, expected_version).await? {
            CasOutcome::Committed { .. } => Ok(()),
            CasOutcome::Conflict { .. } => Err(DispatchError::DuplicateRequest(rider_id.to_string())),
        }
    }

    // The requested index only steers queue recovery, so a failed removal is logged.
    async fn retire_requested(&self, ride_id: &str) {
        if let Err(e) = self
            .store
            .remove_from_index(&StoreKeys::requested_rides(), ride_id)
            .await
        {
            tracing::warn!("Failed to drop ride {} from the requested index: {}", ride_id, e);
        }
    }

    // Retires a ride that never made it into the queue.
    async fn discard(&self, ride: &Ride) {
        let now = self.clock.now();
        let reason = CancellationReason::Other("duplicate request".to_string());
        let result = self
            .store
            .update::<Ride, _>(&ride.id, self.config.transition_attempts, |ride| {
                Ok(ride
                    .apply(&RideEvent::Cancel { reason: reason.clone() }, Actor::System, now)
                    .is_ok())
            })
            .await;
        if let Err(e) = result {
            tracing::error!("Failed to discard duplicate ride {}: {}", ride.id, e);
        }
        self.retire_requested(&ride.id).await;
    }

    /// Rebuilds the pending queue from rides stored in `requested`, so a
    /// restart neither strands them nor blocks their riders.
    pub async fn recover_queue(&self) -> DispatchResult<usize> {
        let mut recovered = 0;
        for ride in self
            .store
            .load_indexed::<Ride>(&StoreKeys::requested_rides())
            .await?
        {
            if ride.data.state != RideState::Requested {
                self.retire_requested(&ride.data.id).await;
                continue;
            }
            match self.queue.enqueue(ride.data.request.clone()).await {
                Ok(()) => recovered += 1,
                Err(e) => tracing::warn!("Could not requeue ride {}: {}", ride.data.id, e),
            }
        }
        if recovered > 0 {
            tracing::info!("Recovered {} waiting ride requests", recovered);
        }
        Ok(recovered)
    }

    async fn set_driver_on_trip(&self, driver_id: &str, ride_id: &str) -> DispatchResult<()> {
        let now = self.clock.now();
        self.store
            .update::<Driver, _>(driver_id, self.config.transition_attempts, |driver| {
                if !driver.is_serving(ride_id) {
                    return Ok(false);
                }
                driver.start_trip(now);
                Ok(true)
            })
            .await?;
        Ok(())
    }

    /// Cancels a ride still waiting for a driver. `false` when it has
    /// moved on (matched or already cancelled) in the meantime.
    pub async fn expire_request(&self, request: &RideRequest) -> DispatchResult<bool> {
        let result = self
            .transition(
                &request.ride_id,
                RideEvent::Cancel {
                    reason: CancellationReason::NoDriverTimeout,
                },
                Actor::System,
                self.config.transition_attempts,
                |ride| {
                    if ride.state == RideState::Requested {
                        Ok(())
                    } else {
                        Err(DispatchError::GuardRejected {
                            ride_id: ride.id.clone(),
                            event: "cancel".to_string(),
                            reason: "ride already has a driver".to_string(),
                        })
                    }
                },
            )
            .await;

        // Storage trouble leaves the request queued for the next sweep.
        let ride = match result {
            Ok(ride) => ride,
            Err(DispatchError::GuardRejected { .. } | DispatchError::InvalidTransition { .. }) => {
                self.queue.remove(&request.id).await;
                self.retire_requested(&request.ride_id).await;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.queue.remove(&request.id).await;
        self.retire_requested(&ride.data.id).await;

        tracing::info!(
            "Ride {} timed out after waiting {}s without a driver",
            ride.data.id,
            request.waited(self.clock.now()).num_seconds()
        );
        self.publisher
            .publish(RideNotification::RideCancelled {
                ride_id: ride.data.id.clone(),
                rider_id: ride.data.rider_id().to_string(),
                driver_id: None,
                reason: CancellationReason::NoDriverTimeout,
            })
            .await;
        Ok(true)
    }

    /// Reacts to a location ping from a driver bound to a ride: arrives
    /// automatically inside the pickup geofence, otherwise sends an ETA.
    pub async fn track_driver(&self, driver: &Driver) -> DispatchResult<()> {
        let (Some(ride_id), Some(location)) = (driver.current_ride_id.as_deref(), driver.location)
        else {
            return Ok(());
        };
        let Some(ride) = self.store.get::<Ride>(ride_id).await? else {
            tracing::warn!("Driver {} points at missing ride {}", driver.id, ride_id);
            return Ok(());
        };
        if ride.data.state != RideState::Matched {
            return Ok(());
        }

        let distance_km = location.distance_km(&ride.data.request.pickup);
        if distance_km <= self.config.pickup_geofence_km {
            match self.driver_arrived(ride_id, &driver.id).await {
                Ok(_) => Ok(()),
                // Raced with an explicit arrival or a cancel.
                Err(e) if e.category() == crate::errors::ErrorCategory::Conflict => {
                    tracing::debug!("Automatic arrival skipped for ride {}: {}", ride_id, e);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        } else {
            self.publisher
                .publish(RideNotification::EtaUpdated {
                    ride_id: ride_id.to_string(),
                    rider_id: ride.data.rider_id().to_string(),
                    driver_id: driver.id.clone(),
                    eta_minutes: eta_minutes(distance_km),
                })
                .await;
            Ok(())
        }
    }
}

fn ensure_assigned(ride: &Ride, driver_id: &str, event: &str) -> DispatchResult<()> {
    if ride.driver_id.as_deref() == Some(driver_id) {
        Ok(())
    } else {
        Err(DispatchError::GuardRejected {
            ride_id: ride.id.clone(),
            event: event.to_string(),
            reason: format!("driver {} is not assigned to this ride", driver_id),
        })
    }
}

fn ensure_within(
    ride: &Ride,
    event: &str,
    location: Option<Coordinate>,
    target: &Coordinate,
    radius_km: f64,
) -> DispatchResult<()> {
    match location {
        Some(location) if location.is_within_km(target, radius_km) => Ok(()),
        Some(location) => Err(DispatchError::GuardRejected {
            ride_id: ride.id.clone(),
            event: event.to_string(),
            reason: format!(
                "driver is {:.2} km away, must be within {} km",
                location.distance_km(target),
                radius_km
            ),
        }),
        None => Err(DispatchError::GuardRejected {
            ride_id: ride.id.clone(),
            event: event.to_string(),
            reason: "driver has not reported a location".to_string(),
        }),
    }
}

fn ensure_participant(ride: &Ride, actor: &Actor) -> DispatchResult<()> {
    let allowed = match actor {
        Actor::Rider(rider_id) => ride.rider_id() == rider_id,
        Actor::Driver(driver_id) => ride.driver_id.as_deref() == Some(driver_id.as_str()),
        Actor::System => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(DispatchError::GuardRejected {
            ride_id: ride.id.clone(),
            event: "cancel".to_string(),
            reason: format!("{} is not part of this ride", actor),
        })
    }
}

#[async_trait]
impl RideOperations for RideService {
    async fn estimate_fare(&self, request: FareEstimateRequest) -> DispatchResult<FareEstimateResponse> {
        tracing::debug!("Estimating {:?} fare", request.ride_type);
        self.fares
            .quote(&request.pickup, &request.destination, request.ride_type)
    }

    async fn request_ride(&self, body: RideRequestBody) -> DispatchResult<RideResponse> {
        if body.rider_id.trim().is_empty() {
            return Err(DispatchError::validation_error("rider_id", "must not be empty"));
        }
        let amount = self
            .fares
            .estimate(&body.pickup, &body.destination, body.ride_type)?;
        let now = self.clock.now();
        let request = RideRequest {
            id: generate_request_id(now),
            rider_id: body.rider_id,
            pickup: body.pickup,
            destination: body.destination,
            ride_type: body.ride_type,
            requested_at: now,
            status: RideState::Requested,
            ride_id: generate_ride_id(now),
            driver_id: None,
        };
        let ride = Ride::new(request.clone(), Fare::estimate(amount, self.fares.currency()));
        if self.store.create(&ride).await?.is_none() {
            return Err(DispatchError::Storage(format!("ride id {} already in use", ride.id)));
        }

        if let Err(e) = self.claim_rider_slot(&ride).await {
            self.discard(&ride).await;
            return Err(e);
        }
        self.store
            .add_to_index(&StoreKeys::requested_rides(), &ride.id)
            .await?;
        // A cancelled predecessor may still be on its way out of the queue.
        if let Err(e) = self.queue.enqueue(request.clone()).await {
            self.discard(&ride).await;
            return Err(e);
        }
        self.store
            .add_to_index(&StoreKeys::rides_by_rider(&request.rider_id), &ride.id)
            .await?;
        tracing::info!(
            "Ride {} requested by rider {} ({}, {} {})",
            ride.id,
            request.rider_id,
            request.ride_type.display_name(),
            amount,
            self.fares.currency()
        );

        match self.matching.match_request(&request.id).await {
            Ok(MatchOutcome::Matched { .. }) => {}
            Ok(MatchOutcome::NoDriversAvailable { radius_km }) => {
                tracing::info!(
                    "Ride {} waiting for a driver, none within {} km",
                    ride.id,
                    radius_km
                );
            }
            // The request is accepted either way; the periodic sweep retries.
            Err(e) => {
                tracing::warn!("Initial match for ride {} failed: {}", ride.id, e);
            }
        }

        self.get_ride_status(&ride.id).await
    }

    async fn cancel_ride(
        &self,
        ride_id: &str,
        actor: Actor,
        reason: CancellationReason,
    ) -> DispatchResult<RideResponse> {
        // One extra attempt so a cancel racing forward progress still lands.
        let attempts = self.config.transition_attempts + 1;
        let ride = self
            .transition(
                ride_id,
                RideEvent::Cancel {
                    reason: reason.clone(),
                },
                actor.clone(),
                attempts,
                |ride| ensure_participant(ride, &actor),
            )
            .await?;

        self.queue.remove(&ride.data.request.id).await;
        self.retire_requested(&ride.data.id).await;
        if let Some(driver_id) = &ride.data.driver_id {
            self.matching.release_driver(driver_id, ride_id).await?;
        }

        self.publisher
            .publish(RideNotification::RideCancelled {
                ride_id: ride.data.id.clone(),
                rider_id: ride.data.rider_id().to_string(),
                driver_id: ride.data.driver_id.clone(),
                reason,
            })
            .await;
        Ok(RideResponse::from_ride(ride.data, ride.version))
    }

    async fn get_ride_status(&self, ride_id: &str) -> DispatchResult<RideResponse> {
        tracing::debug!("Getting ride: {}", ride_id);
        let ride = self.load_ride(ride_id).await?;
        Ok(RideResponse::from_ride(ride.data, ride.version))
    }

    async fn driver_arrived(&self, ride_id: &str, driver_id: &str) -> DispatchResult<RideResponse> {
        let driver = self.load_driver(driver_id).await?;
        let location = driver.data.location;
        let geofence_km = self.config.pickup_geofence_km;

        let ride = self
            .transition(
                ride_id,
                RideEvent::DriverArrived,
                Actor::Driver(driver_id.to_string()),
                self.config.transition_attempts,
                |ride| {
                    ensure_assigned(ride, driver_id, "driver_arrives")?;
                    ensure_within(ride, "driver_arrives", location, &ride.request.pickup, geofence_km)
                },
            )
            .await?;

        self.publisher
            .publish(RideNotification::DriverArriving {
                ride_id: ride.data.id.clone(),
                rider_id: ride.data.rider_id().to_string(),
                driver_id: driver_id.to_string(),
            })
            .await;
        Ok(RideResponse::from_ride(ride.data, ride.version))
    }

    async fn rider_boarded(&self, ride_id: &str, rider_id: &str) -> DispatchResult<RideResponse> {
        let ride = self
            .transition(
                ride_id,
                RideEvent::RiderBoarded,
                Actor::Rider(rider_id.to_string()),
                self.config.transition_attempts,
                |ride| {
                    if ride.rider_id() == rider_id {
                        Ok(())
                    } else {
                        Err(DispatchError::GuardRejected {
                            ride_id: ride.id.clone(),
                            event: "rider_boards".to_string(),
                            reason: format!("rider {} did not request this ride", rider_id),
                        })
                    }
                },
            )
            .await?;

        // The rider is aboard either way; a stale driver status heals on release.
        if let Some(driver_id) = &ride.data.driver_id {
            if let Err(e) = self.set_driver_on_trip(driver_id, ride_id).await {
                tracing::error!("Driver {} not marked on trip for ride {}: {}", driver_id, ride_id, e);
            }
        }
        tracing::info!("Fare for ride {} locked at {}", ride_id, ride.data.fare.estimated);
        Ok(RideResponse::from_ride(ride.data, ride.version))
    }

    async fn complete_trip(
        &self,
        ride_id: &str,
        driver_id: &str,
        manual: bool,
    ) -> DispatchResult<RideResponse> {
        let location = self.load_driver(driver_id).await?.data.location;
        let geofence_km = self.config.dropoff_geofence_km;

        let ride = self
            .transition(
                ride_id,
                RideEvent::TripEnded { manual },
                Actor::Driver(driver_id.to_string()),
                self.config.transition_attempts,
                |ride| {
                    ensure_assigned(ride, driver_id, "trip_ends")?;
                    if manual {
                        return Ok(());
                    }
                    ensure_within(ride, "trip_ends", location, &ride.request.destination, geofence_km)
                },
            )
            .await?;

        self.matching.release_driver(driver_id, ride_id).await?;
        let fare = ride.data.fare.amount();
        self.publisher
            .publish(RideNotification::RideCompleted {
                ride_id: ride.data.id.clone(),
                rider_id: ride.data.rider_id().to_string(),
                driver_id: driver_id.to_string(),
                fare,
            })
            .await;
        Ok(RideResponse::from_ride(ride.data, ride.version))
    }

    async fn ride_history(&self, rider_id: &str) -> DispatchResult<Vec<RideHistoryEntry>> {
        tracing::debug!("Getting ride history for rider: {}", rider_id);
        let mut rides = self.rider_rides(rider_id).await?;
        rides.sort_by(|a, b| {
            b.data
                .request
                .requested_at
                .cmp(&a.data.request.requested_at)
                .then_with(|| b.data.id.cmp(&a.data.id))
        });
        Ok(rides.iter().map(|ride| RideHistoryEntry::from(&ride.data)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::request::RideType,
        services::notification_service::MemoryNotifier,
        state::{AppConfig, AppState},
        utils::ManualClock,
    };
    use chrono::{TimeZone, Utc};

    fn rider_body(rider_id: &str) -> RideRequestBody {
        RideRequestBody {
            rider_id: rider_id.to_string(),
            pickup: Coordinate::new(18.0, -76.8),
            destination: Coordinate::new(18.045, -76.8),
            ride_type: RideType::Standard,
        }
    }

    #[tokio::test]
    async fn a_claimed_slot_turns_away_the_riders_next_request() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 7, 30, 0).unwrap()));
        let state = AppState::with_components(
            AppConfig::default(),
            EntityStore::memory(),
            clock.clone(),
            Arc::new(MemoryNotifier::new()),
        );
        let rides = &state.ride_service;

        // First request has claimed the slot but is neither queued nor indexed yet.
        let now = clock.now();
        let body = rider_body("rider-7");
        let first = Ride::new(
            RideRequest {
                id: generate_request_id(now),
                rider_id: body.rider_id.clone(),
                pickup: body.pickup,
                destination: body.destination,
                ride_type: body.ride_type,
                requested_at: now,
                status: RideState::Requested,
                ride_id: generate_ride_id(now),
                driver_id: None,
            },
            Fare::estimate(500, "JMD"),
        );
        rides.store.create(&first).await.unwrap();
        rides.claim_rider_slot(&first).await.unwrap();

        let second = rides.request_ride(rider_body("rider-7")).await;
        assert!(matches!(second, Err(DispatchError::DuplicateRequest(_))));
        assert!(!rides.queue.has_pending("rider-7").await);
        assert!(rides.ride_history("rider-7").await.unwrap().is_empty());

        // Once the first ride ends the slot is free again.
        rides
            .store
            .update::<Ride, _>(&first.id, 3, |ride| {
                Ok(ride
                    .apply(
                        &RideEvent::Cancel { reason: CancellationReason::RiderRequested },
                        Actor::System,
                        now,
                    )
                    .is_ok())
            })
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));
        let third = rides.request_ride(rider_body("rider-7")).await.unwrap();
        assert_eq!(third.state, RideState::Requested);
    }

    #[test]
    fn eta_rounds_up_with_a_one_minute_floor() {
        assert_eq!(eta_minutes(0.0), 1);
        assert_eq!(eta_minutes(0.1), 1);
        assert_eq!(eta_minutes(5.0), 10);
        assert_eq!(eta_minutes(5.1), 11);
    }

    #[test]
    fn lifecycle_defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.request_timeout, Duration::minutes(5));
        assert_eq!(config.transition_attempts, 3);
    }
}
