// src/services/driver_service.rs
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult, ValidationError},
    models::{
        driver::{Driver, DriverAvailability, DriverRegistration, DriverResponse},
        geo::{Coordinate, ServiceRegion},
    },
    services::{
        matching_service::{MatchOutcome, MatchingEngine},
        ride_service::RideService,
        store_service::{EntityStore, StoreKeys},
    },
    utils::Clock,
};

#[async_trait]
pub trait DriverOperations: Send + Sync {
    async fn register_driver(&self, registration: DriverRegistration) -> DispatchResult<DriverResponse>;
    async fn get_driver(&self, driver_id: &str) -> DispatchResult<DriverResponse>;
    async fn update_driver_location(
        &self,
        driver_id: &str,
        location: Coordinate,
    ) -> DispatchResult<DriverResponse>;
    async fn set_driver_availability(
        &self,
        driver_id: &str,
        availability: DriverAvailability,
    ) -> DispatchResult<DriverResponse>;
}

pub struct DriverService {
    store: EntityStore,
    rides: Arc<RideService>,
    matching: Arc<MatchingEngine>,
    clock: Arc<dyn Clock>,
    region: ServiceRegion,
    update_attempts: u32,
}

impl DriverService {
    pub fn new(
        store: EntityStore,
        rides: Arc<RideService>,
        matching: Arc<MatchingEngine>,
        clock: Arc<dyn Clock>,
        region: ServiceRegion,
    ) -> Self {
        let update_attempts = rides.config().transition_attempts;
        Self {
            store,
            rides,
            matching,
            clock,
            region,
            update_attempts,
        }
    }

    fn check_location(&self, location: &Coordinate) -> DispatchResult<()> {
        if self.region.contains(location) {
            Ok(())
        } else {
            Err(DispatchError::InvalidLocation {
                latitude: location.latitude,
                longitude: location.longitude,
            })
        }
    }

    fn validate_registration(&self, registration: &DriverRegistration) -> DispatchResult<()> {
        let mut errors = Vec::new();
        if registration.id.trim().is_empty() {
            errors.push(ValidationError {
                field: "id".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if registration.name.trim().is_empty() {
            errors.push(ValidationError {
                field: "name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if registration.vehicle.plate_number.trim().is_empty() {
            errors.push(ValidationError {
                field: "vehicle.plate_number".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if let Some(rating) = registration.rating {
            if !(0.0..=5.0).contains(&rating) {
                errors.push(ValidationError {
                    field: "rating".to_string(),
                    message: "must be between 0 and 5".to_string(),
                });
            }
        }
        if !errors.is_empty() {
            return Err(DispatchError::ValidationFailed(errors));
        }
        if let Some(location) = &registration.location {
            self.check_location(location)?;
        }
        Ok(())
    }

    async fn offer_work(&self, driver_id: &str) {
        match self.matching.match_driver(driver_id).await {
            Ok(MatchOutcome::Matched { ride, .. }) => {
                tracing::info!("Driver {} picked up waiting ride {}", driver_id, ride.data.id);
            }
            Ok(MatchOutcome::NoDriversAvailable { .. }) => {
                tracing::debug!("No waiting riders near driver {}", driver_id);
            }
            Err(e) => {
                tracing::warn!("Matching for driver {} failed: {}", driver_id, e);
            }
        }
    }
}

#[async_trait]
impl DriverOperations for DriverService {
    async fn register_driver(&self, registration: DriverRegistration) -> DispatchResult<DriverResponse> {
        tracing::info!("Registering driver: {}", registration.id);
        self.validate_registration(&registration)?;

        let driver = Driver::register(registration, self.clock.now());
        let Some(version) = self.store.create(&driver).await? else {
            return Err(DispatchError::DriverAlreadyRegistered(driver.id));
        };
        self.store
            .add_to_index(&StoreKeys::all_drivers(), &driver.id)
            .await?;

        tracing::info!(
            "Driver registered: {} ({}, {})",
            driver.id,
            driver.vehicle.make_model,
            driver.vehicle.plate_number
        );
        Ok(DriverResponse::from_driver(driver, version))
    }

    async fn get_driver(&self, driver_id: &str) -> DispatchResult<DriverResponse> {
        tracing::debug!("Getting driver: {}", driver_id);
        let driver = self
            .store
            .get::<Driver>(driver_id)
            .await?
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;
        Ok(DriverResponse::from_driver(driver.data, driver.version))
    }

    async fn update_driver_location(
        &self,
        driver_id: &str,
        location: Coordinate,
    ) -> DispatchResult<DriverResponse> {
        self.check_location(&location)?;
        let now = self.clock.now();

        let driver = self
            .store
            .update::<Driver, _>(driver_id, self.update_attempts, |driver| {
                driver.location = Some(location);
                driver.last_ping_at = Some(now);
                driver.updated_at = now;
                Ok(true)
            })
            .await?
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;
        tracing::debug!(
            "Driver {} at ({:.5}, {:.5})",
            driver_id,
            location.latitude,
            location.longitude
        );

        if driver.data.current_ride_id.is_some() {
            self.rides.track_driver(&driver.data).await?;
            return self.get_driver(driver_id).await;
        }
        Ok(DriverResponse::from_driver(driver.data, driver.version))
    }

    async fn set_driver_availability(
        &self,
        driver_id: &str,
        availability: DriverAvailability,
    ) -> DispatchResult<DriverResponse> {
        if !matches!(
            availability,
            DriverAvailability::Available | DriverAvailability::Offline
        ) {
            return Err(DispatchError::validation_error(
                "availability",
                "only offline or available can be set directly",
            ));
        }
        let now = self.clock.now();
        let mut changed = false;

        let driver = self
            .store
            .update::<Driver, _>(driver_id, self.update_attempts, |driver| {
                if driver.current_ride_id.is_some() {
                    return Err(DispatchError::ActiveRideConflict(driver.id.clone()));
                }
                changed = driver.availability != availability;
                if !changed {
                    return Ok(false);
                }
                match availability {
                    DriverAvailability::Available => driver.release(now),
                    _ => driver.go_offline(now),
                }
                Ok(true)
            })
            .await?
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;

        if !changed {
            return Ok(DriverResponse::from_driver(driver.data, driver.version));
        }
        tracing::info!("Driver {} is now {:?}", driver_id, availability);

        if availability == DriverAvailability::Available {
            self.offer_work(driver_id).await;
            return self.get_driver(driver_id).await;
        }
        Ok(DriverResponse::from_driver(driver.data, driver.version))
    }
}
