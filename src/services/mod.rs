pub mod driver_service;
pub mod fare_service;
pub mod matching_service;
pub mod notification_service;
pub mod queue_service;
pub mod ride_service;
pub mod store_service;
pub mod sweeper_service;

pub use driver_service::{DriverOperations, DriverService};
pub use fare_service::{FareConfig, FareEstimator};
pub use matching_service::{MatchOutcome, MatchingConfig, MatchingEngine};
pub use notification_service::{EventPublisher, NotificationDispatcher};
pub use queue_service::RideRequestQueue;
pub use ride_service::{LifecycleConfig, RideOperations, RideService};
pub use store_service::{EntityStore, StoreConfig};
pub use sweeper_service::{RideSweeper, SweeperConfig};
