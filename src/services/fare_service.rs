// src/services/fare_service.rs
use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        geo::{Coordinate, ServiceRegion},
        request::{FareEstimateResponse, RideType},
    },
};

const BASIS_POINTS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct FareConfig {
    /// Base rate in whole currency units.
    pub base_rate: u64,
    pub currency: String,
    /// Multipliers in basis points (10_000 = 1.0).
    pub standard_multiplier_bps: u64,
    pub premium_multiplier_bps: u64,
    pub shared_multiplier_bps: u64,
    pub service_region: ServiceRegion,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base_rate: 800, // JMD
            currency: "JMD".to_string(),
            standard_multiplier_bps: 10_000,
            premium_multiplier_bps: 15_000,
            shared_multiplier_bps: 7_500,
            service_region: ServiceRegion::default(),
        }
    }
}

impl FareConfig {
    pub fn multiplier_bps(&self, ride_type: RideType) -> u64 {
        match ride_type {
            RideType::Standard => self.standard_multiplier_bps,
            RideType::Premium => self.premium_multiplier_bps,
            RideType::Shared => self.shared_multiplier_bps,
        }
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if self.base_rate == 0 {
            return Err(DispatchError::Configuration(
                "base rate must be positive".to_string(),
            ));
        }
        for ride_type in RideType::ALL {
            if self.multiplier_bps(ride_type) == 0 {
                return Err(DispatchError::Configuration(format!(
                    "multiplier for {:?} must be positive",
                    ride_type
                )));
            }
        }
        Ok(())
    }
}

/// Pure fare calculation: same inputs, same amount, no side effects.
#[derive(Debug, Clone)]
pub struct FareEstimator {
    config: FareConfig,
}

impl FareEstimator {
    pub fn new(config: FareConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FareConfig {
        &self.config
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    /// Rejects points outside the service region and zero-length routes.
    pub fn validate_route(&self, pickup: &Coordinate, destination: &Coordinate) -> DispatchResult<()> {
        for point in [pickup, destination] {
            if !self.config.service_region.contains(point) {
                return Err(DispatchError::InvalidLocation {
                    latitude: point.latitude,
                    longitude: point.longitude,
                });
            }
        }
        if pickup == destination {
            return Err(DispatchError::DegenerateRoute);
        }
        Ok(())
    }

    /// `base_rate * multiplier`, rounded half-up to a whole amount.
    pub fn estimate(
        &self,
        pickup: &Coordinate,
        destination: &Coordinate,
        ride_type: RideType,
    ) -> DispatchResult<u64> {
        self.validate_route(pickup, destination)?;
        let scaled = self.config.base_rate * self.config.multiplier_bps(ride_type);
        Ok((scaled + BASIS_POINTS / 2) / BASIS_POINTS)
    }

    pub fn quote(
        &self,
        pickup: &Coordinate,
        destination: &Coordinate,
        ride_type: RideType,
    ) -> DispatchResult<FareEstimateResponse> {
        let amount = self.estimate(pickup, destination, ride_type)?;
        Ok(FareEstimateResponse {
            ride_type,
            display_name: ride_type.display_name().to_string(),
            amount,
            currency: self.config.currency.clone(),
            distance_km: pickup.distance_km(destination),
        })
    }
}
