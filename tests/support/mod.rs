#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};

use ride_orchestrator::{
    AppConfig, AppState,
    models::{
        driver::{DriverAvailability, DriverRegistration, DriverResponse, Vehicle},
        geo::Coordinate,
        notification::RideNotification,
        request::{RideRequestBody, RideType},
        ride::{RideResponse, RideState},
    },
    services::{
        driver_service::DriverOperations,
        notification_service::MemoryNotifier,
        store_service::{
            CasOutcome, EntityStore, MemoryStore, RecordStore, StoreError, StoreKey, StoredRecord,
        },
    },
    utils::ManualClock,
};

pub struct Harness {
    pub state: AppState,
    pub store: EntityStore,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<MemoryNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self::with_store(config, EntityStore::memory())
    }

    pub fn with_store(config: AppConfig, store: EntityStore) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let notifier = Arc::new(MemoryNotifier::new());
        let state =
            AppState::with_components(config, store.clone(), clock.clone(), notifier.clone());
        Self {
            state,
            store,
            clock,
            notifier,
        }
    }

    /// A fresh process over the same store: in-memory queue state is lost
    /// and rebuilt from what was persisted.
    pub async fn restart(self) -> Self {
        let state = AppState::with_components(
            self.state.config.clone(),
            self.store.clone(),
            self.clock.clone(),
            self.notifier.clone(),
        );
        state
            .ride_service
            .recover_queue()
            .await
            .expect("queue recovers");
        Self { state, ..self }
    }

    /// Registers a driver at `location` and puts them on shift.
    pub async fn online_driver(&self, id: &str, location: Coordinate) -> DriverResponse {
        self.offline_driver(id, location).await;
        self.state
            .driver_service
            .set_driver_availability(id, DriverAvailability::Available)
            .await
            .expect("driver goes available")
    }

    pub async fn offline_driver(&self, id: &str, location: Coordinate) -> DriverResponse {
        self.state
            .driver_service
            .register_driver(registration(id, location))
            .await
            .expect("driver registers")
    }

    pub async fn driver(&self, id: &str) -> DriverResponse {
        self.state
            .driver_service
            .get_driver(id)
            .await
            .expect("driver exists")
    }

    pub fn events_for(&self, ride: &RideResponse) -> Vec<RideNotification> {
        self.notifier.events_for(&ride.id)
    }

    pub fn cancellations_for(&self, ride: &RideResponse) -> usize {
        self.events_for(ride)
            .iter()
            .filter(|event| matches!(event, RideNotification::RideCancelled { .. }))
            .count()
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 7, 30, 0).unwrap()
}

/// Downtown Kingston, inside the service region.
pub fn pickup() -> Coordinate {
    Coordinate::new(18.0, -76.8)
}

/// A point `km` due north of `origin` (one degree of latitude is ~111.195 km).
pub fn north_of(origin: Coordinate, km: f64) -> Coordinate {
    Coordinate::new(origin.latitude + km / 111.195, origin.longitude)
}

pub fn registration(id: &str, location: Coordinate) -> DriverRegistration {
    DriverRegistration {
        id: id.to_string(),
        name: format!("Driver {}", id),
        phone_number: "+1876-555-0199".to_string(),
        vehicle: Vehicle {
            make_model: "Toyota Axio".to_string(),
            plate_number: "PB 4521".to_string(),
            color: Some("silver".to_string()),
        },
        location: Some(location),
        rating: Some(4.9),
    }
}

pub fn ride_body(rider_id: &str, from: Coordinate, ride_type: RideType) -> RideRequestBody {
    RideRequestBody {
        rider_id: rider_id.to_string(),
        pickup: from,
        destination: north_of(from, 5.0),
        ride_type,
    }
}

pub fn states(ride: &RideResponse) -> Vec<RideState> {
    ride.history.iter().map(|record| record.state).collect()
}

/// Memory store whose writes fail while the key contains the configured fragment.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fragment: Option<&str>) {
        *self.failing.lock().unwrap() = fragment.map(str::to_string);
    }

    fn check(&self, key: &StoreKey) -> Result<(), StoreError> {
        match self.failing.lock().unwrap().as_deref() {
            Some(fragment) if key.to_string().contains(fragment) => Err(
                StoreError::ConnectionError(format!("write to {} refused", key)),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredRecord>, StoreError> {
        self.inner.get(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected_version: u64,
        json: String,
    ) -> Result<CasOutcome, StoreError> {
        self.check(key)?;
        self.inner.compare_and_swap(key, expected_version, json).await
    }

    async fn add_to_index(&self, index: &StoreKey, member: &str) -> Result<(), StoreError> {
        self.check(index)?;
        self.inner.add_to_index(index, member).await
    }

    async fn remove_from_index(&self, index: &StoreKey, member: &str) -> Result<(), StoreError> {
        self.check(index)?;
        self.inner.remove_from_index(index, member).await
    }

    async fn index_members(&self, index: &StoreKey) -> Result<Vec<String>, StoreError> {
        self.inner.index_members(index).await
    }
}
