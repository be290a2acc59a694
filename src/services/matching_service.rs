// src/services/matching_service.rs
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        driver::Driver,
        geo::Coordinate,
        notification::RideNotification,
        ride::{Actor, Ride, RideEvent},
    },
    services::{
        notification_service::EventPublisher,
        queue_service::RideRequestQueue,
        store_service::{CasOutcome, EntityStore, StoreKeys, Versioned},
    },
    utils::Clock,
};

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub start_radius_km: f64,
    pub max_radius_km: f64,
    /// Extra attempts after an optimistic conflict on the driver.
    pub conflict_retries: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            start_radius_km: 2.0,
            max_radius_km: 10.0,
            conflict_retries: 1,
        }
    }
}

impl MatchingConfig {
    /// Search radii, doubling from the start radius and capped: 2, 4, 8, 10.
    pub fn radius_steps(&self) -> Vec<f64> {
        let mut steps = Vec::new();
        let mut radius = self.start_radius_km;
        loop {
            steps.push(radius.min(self.max_radius_km));
            if radius >= self.max_radius_km {
                break;
            }
            radius *= 2.0;
        }
        steps
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if !(self.start_radius_km > 0.0 && self.start_radius_km <= self.max_radius_km) {
            return Err(DispatchError::Configuration(format!(
                "match radius must satisfy 0 < start ({}) <= max ({})",
                self.start_radius_km, self.max_radius_km
            )));
        }
        Ok(())
    }
}

/// An available driver within reach of a pickup.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverCandidate {
    pub driver_id: String,
    /// Version the driver was read at; the match commits against it.
    pub version: u64,
    pub distance_km: f64,
    pub idle_since: Option<DateTime<Utc>>,
}

impl DriverCandidate {
    fn from_driver(driver: &Versioned<Driver>, distance_km: f64) -> Self {
        Self {
            driver_id: driver.data.id.clone(),
            version: driver.version,
            distance_km,
            idle_since: driver.data.idle_since,
        }
    }
}

/// Strategy for choosing among available drivers.
pub trait MatchingAlgorithm: Send + Sync {
    /// Matchable drivers within `radius_km` of `pickup`, best first.
    fn rank(
        &self,
        pickup: &Coordinate,
        drivers: &[Versioned<Driver>],
        radius_km: f64,
    ) -> Vec<DriverCandidate>;

    fn find_match(
        &self,
        pickup: &Coordinate,
        drivers: &[Versioned<Driver>],
        radius_km: f64,
    ) -> Option<DriverCandidate> {
        self.rank(pickup, drivers, radius_km).into_iter().next()
    }
}

/// Closest driver first, then the one idle the longest, then the lowest id.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestIdleDriver;

impl NearestIdleDriver {
    fn compare(a: &DriverCandidate, b: &DriverCandidate) -> Ordering {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| match (a.idle_since, b.idle_since) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.driver_id.cmp(&b.driver_id))
    }
}

impl MatchingAlgorithm for NearestIdleDriver {
    fn rank(
        &self,
        pickup: &Coordinate,
        drivers: &[Versioned<Driver>],
        radius_km: f64,
    ) -> Vec<DriverCandidate> {
        let mut candidates: Vec<DriverCandidate> = drivers
            .iter()
            .filter(|driver| driver.data.is_matchable())
            .filter_map(|driver| {
                let distance_km = driver.data.location?.distance_km(pickup);
                (distance_km <= radius_km).then(|| DriverCandidate::from_driver(driver, distance_km))
            })
            .collect();
        candidates.sort_by(Self::compare);
        candidates
    }
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched {
        ride: Versioned<Ride>,
        distance_km: f64,
    },
    /// Nothing within the largest radius. The request stays queued.
    NoDriversAvailable { radius_km: f64 },
}

/// Result of one periodic pass over the queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RescanReport {
    pub matched: usize,
    pub unmatched: usize,
    pub conflicts: usize,
    /// Requests left queued after a storage error.
    pub failed: usize,
}

enum Commit {
    Done(Versioned<Ride>),
    // Driver changed under us; the request is back in the queue.
    DriverTaken,
}

/// Pairs queued requests with available drivers. A match claims the
/// request, moves the driver to en route and the ride to matched, each
/// step guarded by a version check and undone if a later step fails.
pub struct MatchingEngine {
    store: EntityStore,
    queue: Arc<RideRequestQueue>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    config: MatchingConfig,
    algorithm: Arc<dyn MatchingAlgorithm>,
    transition_attempts: u32,
}

impl MatchingEngine {
    pub fn new(
        store: EntityStore,
        queue: Arc<RideRequestQueue>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            store,
            queue,
            publisher,
            clock,
            config,
            algorithm: Arc::new(NearestIdleDriver),
            transition_attempts: 3,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Arc<dyn MatchingAlgorithm>) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Finds a driver for a queued request.
    pub async fn match_request(&self, request_id: &str) -> DispatchResult<MatchOutcome> {
        let Some(request) = self.queue.get(request_id).await else {
            tracing::debug!("Request {} left the queue before matching", request_id);
            return Err(DispatchError::MatchConflict);
        };

        for attempt in 0..=self.config.conflict_retries {
            let drivers = self.available_drivers().await?;
            let Some(candidate) = self.select_driver(&request.pickup, &drivers) else {
                tracing::info!(
                    "No drivers within {} km of request {}",
                    self.config.max_radius_km,
                    request_id
                );
                return Ok(MatchOutcome::NoDriversAvailable {
                    radius_km: self.config.max_radius_km,
                });
            };

            match self.commit_match(request_id, &candidate).await? {
                Commit::Done(ride) => {
                    return Ok(MatchOutcome::Matched {
                        ride,
                        distance_km: candidate.distance_km,
                    });
                }
                Commit::DriverTaken => {
                    tracing::warn!(
                        "Driver {} taken while matching request {} (attempt {})",
                        candidate.driver_id,
                        request_id,
                        attempt + 1
                    );
                }
            }
        }
        Err(DispatchError::MatchConflict)
    }

    /// Finds the oldest queued request for a driver who just became available.
    pub async fn match_driver(&self, driver_id: &str) -> DispatchResult<MatchOutcome> {
        let mut driver = self
            .store
            .get::<Driver>(driver_id)
            .await?
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;

        let mut attempts_left = self.config.conflict_retries;
        for radius_km in self.config.radius_steps() {
            let Some(location) = driver.data.location.filter(|_| driver.data.is_matchable()) else {
                return Err(DispatchError::MatchConflict);
            };
            let candidates = self.queue.peek_candidates(location, radius_km).await;
            let mut pending = candidates.iter().peekable();

            while let Some(candidate) = pending.peek() {
                let offer = DriverCandidate::from_driver(&driver, candidate.distance_km);
                let request_id = candidate.request.id.clone();
                match self.commit_match(&request_id, &offer).await {
                    Ok(Commit::Done(ride)) => {
                        return Ok(MatchOutcome::Matched {
                            ride,
                            distance_km: offer.distance_km,
                        });
                    }
                    Ok(Commit::DriverTaken) => {
                        if attempts_left == 0 {
                            return Err(DispatchError::MatchConflict);
                        }
                        attempts_left -= 1;
                        driver = self
                            .store
                            .get::<Driver>(driver_id)
                            .await?
                            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;
                        if !driver.data.is_matchable() {
                            return Err(DispatchError::MatchConflict);
                        }
                    }
                    // Stale snapshot: someone else took or cancelled it.
                    Err(DispatchError::MatchConflict) => {
                        pending.next();
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::debug!("No queued requests near driver {}", driver_id);
        Ok(MatchOutcome::NoDriversAvailable {
            radius_km: self.config.max_radius_km,
        })
    }

    /// Retries every queued request, oldest first.
    pub async fn rescan(&self) -> DispatchResult<RescanReport> {
        let mut report = RescanReport::default();
        for request in self.queue.pending().await {
            match self.match_request(&request.id).await {
                Ok(MatchOutcome::Matched { .. }) => report.matched += 1,
                Ok(MatchOutcome::NoDriversAvailable { .. }) => report.unmatched += 1,
                Err(e) if e.is_retryable() => {
                    tracing::debug!("Rescan skipped request {}: {}", request.id, e);
                    report.conflicts += 1;
                }
                Err(e) => {
                    tracing::error!("Rescan failed for request {}: {}", request.id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Frees `driver_id` if it is still bound to `ride_id`.
    pub async fn release_driver(&self, driver_id: &str, ride_id: &str) -> DispatchResult<()> {
        let now = self.clock.now();
        let released = self
            .store
            .update::<Driver, _>(driver_id, self.transition_attempts, |driver| {
                if !driver.is_serving(ride_id) {
                    return Ok(false);
                }
                driver.release(now);
                Ok(true)
            })
            .await?;
        if released.is_none() {
            tracing::warn!("Driver {} vanished before release from ride {}", driver_id, ride_id);
        } else {
            tracing::debug!("Driver {} released from ride {}", driver_id, ride_id);
        }
        Ok(())
    }

    async fn available_drivers(&self) -> DispatchResult<Vec<Versioned<Driver>>> {
        let drivers = self
            .store
            .load_indexed::<Driver>(&StoreKeys::all_drivers())
            .await?;
        Ok(drivers
            .into_iter()
            .filter(|driver| driver.data.is_matchable())
            .collect())
    }

    fn select_driver(
        &self,
        pickup: &Coordinate,
        drivers: &[Versioned<Driver>],
    ) -> Option<DriverCandidate> {
        self.config
            .radius_steps()
            .into_iter()
            .find_map(|radius_km| self.algorithm.find_match(pickup, drivers, radius_km))
    }

    async fn commit_match(
        &self,
        request_id: &str,
        candidate: &DriverCandidate,
    ) -> DispatchResult<Commit> {
        let Some(claimed) = self.queue.claim(request_id).await else {
            return Err(DispatchError::MatchConflict);
        };
        let ride_id = claimed.request.ride_id.clone();
        let now = self.clock.now();

        match self.reserve_driver(candidate, &ride_id, now).await {
            Ok(true) => {}
            Ok(false) => {
                self.queue.restore(claimed).await;
                return Ok(Commit::DriverTaken);
            }
            Err(e) => {
                self.queue.restore(claimed).await;
                return Err(e);
            }
        }

        let driver_id = candidate.driver_id.as_str();
        match self.bind_ride(&ride_id, driver_id, now).await {
            Ok(Some(ride)) => {
                tracing::info!(
                    "Matched ride {} with driver {} ({:.2} km away)",
                    ride_id,
                    driver_id,
                    candidate.distance_km
                );
                if let Err(e) = self
                    .store
                    .remove_from_index(&StoreKeys::requested_rides(), &ride_id)
                    .await
                {
                    tracing::warn!("Failed to drop ride {} from the requested index: {}", ride_id, e);
                }
                self.publisher
                    .publish(RideNotification::RideMatched {
                        ride_id: ride_id.clone(),
                        rider_id: ride.data.rider_id().to_string(),
                        driver_id: driver_id.to_string(),
                        fare: ride.data.fare.estimated,
                    })
                    .await;
                Ok(Commit::Done(ride))
            }
            Ok(None) => {
                // Cancelled while we held the driver.
                tracing::info!("Ride {} cancelled during matching, releasing driver {}", ride_id, driver_id);
                self.release_driver(driver_id, &ride_id).await?;
                Err(DispatchError::MatchConflict)
            }
            Err(e) => {
                self.release_driver(driver_id, &ride_id).await?;
                self.queue.restore(claimed).await;
                Err(e)
            }
        }
    }

    /// Moves the driver to en route if it is unchanged since ranking.
    async fn reserve_driver(
        &self,
        candidate: &DriverCandidate,
        ride_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        let Some(mut driver) = self.store.get::<Driver>(&candidate.driver_id).await? else {
            return Ok(false);
        };
        if driver.version != candidate.version || !driver.data.is_matchable() {
            return Ok(false);
        }
        driver.data.assign(ride_id, now);
        Ok(matches!(
            self.store.commit(&driver.data, driver.version).await?,
            CasOutcome::Committed { .. }
        ))
    }

    /// `None` when the ride has left `requested` (cancelled).
    async fn bind_ride(
        &self,
        ride_id: &str,
        driver_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<Versioned<Ride>>> {
        let event = RideEvent::Matched {
            driver_id: driver_id.to_string(),
        };
        let mut rejected = false;
        let ride = self
            .store
            .update::<Ride, _>(ride_id, self.transition_attempts, |ride| {
                rejected = ride.apply(&event, Actor::System, now).is_err();
                Ok(!rejected)
            })
            .await?;
        match ride {
            Some(ride) if !rejected => Ok(Some(ride)),
            Some(_) => Ok(None),
            None => Err(DispatchError::ride_not_found(ride_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::driver::{DriverRegistration, Vehicle};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
    }

    fn pickup() -> Coordinate {
        Coordinate::new(18.0, -76.8)
    }

    fn driver(id: &str, km_north: f64, idle_since: DateTime<Utc>) -> Versioned<Driver> {
        let mut driver = Driver::register(
            DriverRegistration {
                id: id.to_string(),
                name: id.to_string(),
                phone_number: "+1876-555-0100".to_string(),
                vehicle: Vehicle {
                    make_model: "Nissan Note".to_string(),
                    plate_number: "PA 0001".to_string(),
                    color: None,
                },
                location: Some(Coordinate::new(18.0 + km_north / 111.195, -76.8)),
                rating: None,
            },
            t0(),
        );
        driver.release(idle_since);
        Versioned {
            version: 1,
            data: driver,
        }
    }

    #[test]
    fn radius_doubles_up_to_the_cap() {
        assert_eq!(MatchingConfig::default().radius_steps(), vec![2.0, 4.0, 8.0, 10.0]);
        let config = MatchingConfig {
            start_radius_km: 5.0,
            max_radius_km: 5.0,
            ..Default::default()
        };
        assert_eq!(config.radius_steps(), vec![5.0]);
        assert!(MatchingConfig {
            start_radius_km: 0.0,
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn nearest_driver_wins() {
        let drivers = vec![driver("drv-b", 1.8, t0()), driver("drv-a", 1.5, t0())];
        let best = NearestIdleDriver.find_match(&pickup(), &drivers, 2.0).unwrap();
        assert_eq!(best.driver_id, "drv-a");
    }

    #[test]
    fn ties_break_on_idle_time_then_id() {
        let drivers = vec![
            driver("drv-3", 1.0, t0()),
            driver("drv-2", 1.0, t0() - Duration::minutes(10)),
            driver("drv-1", 1.0, t0()),
        ];
        let ranked: Vec<_> = NearestIdleDriver
            .rank(&pickup(), &drivers, 2.0)
            .into_iter()
            .map(|c| c.driver_id)
            .collect();
        assert_eq!(ranked, vec!["drv-2", "drv-1", "drv-3"]);
    }

    #[test]
    fn unavailable_and_distant_drivers_are_skipped() {
        let mut busy = driver("drv-busy", 0.1, t0());
        busy.data.assign("rid-x", t0());
        let drivers = vec![busy, driver("drv-far", 3.0, t0())];
        assert!(NearestIdleDriver.find_match(&pickup(), &drivers, 2.0).is_none());
        assert_eq!(
            NearestIdleDriver.find_match(&pickup(), &drivers, 4.0).unwrap().driver_id,
            "drv-far"
        );
    }
}
