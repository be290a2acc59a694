// src/state.rs
use std::env;
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    services::{
        driver_service::DriverService,
        fare_service::{FareConfig, FareEstimator},
        matching_service::{MatchingConfig, MatchingEngine},
        notification_service::{
            BroadcastNotifier, EventPublisher, FanoutNotifier, LogNotifier, NotificationDispatcher,
            WebhookConfig, WebhookNotifier,
        },
        queue_service::RideRequestQueue,
        ride_service::{LifecycleConfig, RideService},
        store_service::{EntityStore, StoreConfig},
        sweeper_service::{RideSweeper, SweeperConfig},
    },
    utils::{Clock, SystemClock},
};

pub struct AppState {
    pub ride_service: Arc<RideService>,
    pub driver_service: Arc<DriverService>,
    pub matching_engine: Arc<MatchingEngine>,
    pub sweeper: Arc<RideSweeper>,
    pub events: Arc<BroadcastNotifier>,
    pub config: AppConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub store: StoreConfig,
    pub webhook: Option<WebhookConfig>,
    pub fare: FareConfig,
    pub matching: MatchingConfig,
    pub lifecycle: LifecycleConfig,
    pub sweeper: SweeperConfig,
    /// Events buffered per SSE subscriber before it starts lagging.
    pub event_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            store: StoreConfig::default(),
            webhook: None,
            fare: FareConfig::default(),
            matching: MatchingConfig::default(),
            lifecycle: LifecycleConfig::default(),
            sweeper: SweeperConfig::default(),
            event_buffer: 256,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> DispatchResult<T> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            DispatchError::Configuration(format!("{} has an invalid value: {:?}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> DispatchResult<Self> {
        let defaults = Self::default();

        let webhook = env_optional("NOTIFY_WEBHOOK_URL").map(|url| WebhookConfig {
            auth_token: env_optional("NOTIFY_WEBHOOK_TOKEN"),
            ..WebhookConfig::new(url)
        });

        let fare = FareConfig {
            base_rate: env_parse("BASE_RATE", defaults.fare.base_rate)?,
            currency: env_parse("CURRENCY", defaults.fare.currency.clone())?,
            ..defaults.fare
        };
        let matching = MatchingConfig {
            start_radius_km: env_parse("MATCH_START_RADIUS_KM", defaults.matching.start_radius_km)?,
            max_radius_km: env_parse("MATCH_MAX_RADIUS_KM", defaults.matching.max_radius_km)?,
            ..defaults.matching
        };
        let lifecycle = LifecycleConfig {
            request_timeout: chrono::Duration::seconds(env_parse(
                "REQUEST_TIMEOUT_SECS",
                defaults.lifecycle.request_timeout.num_seconds(),
            )?),
            pickup_geofence_km: env_parse("PICKUP_GEOFENCE_KM", defaults.lifecycle.pickup_geofence_km)?,
            dropoff_geofence_km: env_parse(
                "DROPOFF_GEOFENCE_KM",
                defaults.lifecycle.dropoff_geofence_km,
            )?,
            ..defaults.lifecycle
        };
        let sweeper = SweeperConfig {
            interval: std::time::Duration::from_secs(env_parse(
                "SWEEP_INTERVAL_SECS",
                defaults.sweeper.interval.as_secs(),
            )?),
        };

        let config = Self {
            bind_addr: env_parse("BIND_ADDR", defaults.bind_addr)?,
            store: StoreConfig {
                redis_url: env_optional("REDIS_URL"),
            },
            webhook,
            fare,
            matching,
            lifecycle,
            sweeper,
            event_buffer: defaults.event_buffer,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DispatchResult<()> {
        self.fare.validate()?;
        self.matching.validate()?;
        if self.lifecycle.request_timeout <= chrono::Duration::zero() {
            return Err(DispatchError::Configuration(
                "REQUEST_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        if self.sweeper.interval.is_zero() {
            return Err(DispatchError::Configuration(
                "SWEEP_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl AppState {
    pub async fn new(config: AppConfig) -> DispatchResult<Self> {
        let store = EntityStore::connect(&config.store).await?;

        let dispatcher: Arc<dyn NotificationDispatcher> = match &config.webhook {
            Some(webhook) => Arc::new(WebhookNotifier::new(webhook.clone())?),
            None => {
                tracing::warn!("NOTIFY_WEBHOOK_URL not set, notifications are only logged");
                Arc::new(LogNotifier)
            }
        };

        let state = Self::with_components(config, store, Arc::new(SystemClock), dispatcher);
        state.ride_service.recover_queue().await?;
        Ok(state)
    }

    /// Wires the services over an explicit store, clock and outbound dispatcher.
    /// Events also go to the in-process stream behind `events`.
    pub fn with_components(
        config: AppConfig,
        store: EntityStore,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let events = Arc::new(BroadcastNotifier::new(config.event_buffer));
        let stream: Arc<dyn NotificationDispatcher> = events.clone();
        let fanout = Arc::new(FanoutNotifier::new(vec![stream, dispatcher]));
        let publisher = EventPublisher::new(fanout, clock.clone());
        let queue = Arc::new(RideRequestQueue::new());

        let matching_engine = Arc::new(MatchingEngine::new(
            store.clone(),
            queue.clone(),
            publisher.clone(),
            clock.clone(),
            config.matching.clone(),
        ));
        let ride_service = Arc::new(RideService::new(
            store.clone(),
            queue.clone(),
            FareEstimator::new(config.fare.clone()),
            matching_engine.clone(),
            publisher,
            clock.clone(),
            config.lifecycle.clone(),
        ));
        let driver_service = Arc::new(DriverService::new(
            store,
            ride_service.clone(),
            matching_engine.clone(),
            clock.clone(),
            config.fare.service_region,
        ));
        let sweeper = Arc::new(RideSweeper::new(
            ride_service.clone(),
            matching_engine.clone(),
            queue,
            clock,
        ));

        Self {
            ride_service,
            driver_service,
            matching_engine,
            sweeper,
            events,
            config,
        }
    }
}
