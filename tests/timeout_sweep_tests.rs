mod support;

use chrono::Duration;
use ride_orchestrator::{
    AppConfig, DispatchError,
    models::{
        driver::DriverAvailability,
        notification::RideNotification,
        request::RideType,
        ride::{CancellationReason, RideState},
    },
    services::{
        driver_service::DriverOperations, ride_service::RideOperations,
        store_service::EntityStore,
    },
};

use support::{FlakyStore, Harness, north_of, pickup, ride_body};

#[tokio::test]
async fn unmatched_request_times_out_once() {
    let h = Harness::new();
    let ride = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(5) + Duration::seconds(1));
    let report = h.state.sweeper.run_once().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.rescan.matched + report.rescan.unmatched, 0);

    let expired = h.state.ride_service.get_ride_status(&ride.id).await.unwrap();
    assert_eq!(expired.state, RideState::Cancelled);
    assert_eq!(
        expired.cancellation_reason,
        Some(CancellationReason::NoDriverTimeout)
    );
    assert!(h.events_for(&ride).iter().any(|event| matches!(
        event,
        RideNotification::RideCancelled {
            driver_id: None,
            reason: CancellationReason::NoDriverTimeout,
            ..
        }
    )));

    let again = h.state.sweeper.run_once().await.unwrap();
    assert_eq!(again.expired, 0);
    assert_eq!(h.cancellations_for(&ride), 1);
}

#[tokio::test]
async fn young_requests_survive_the_sweep() {
    let h = Harness::new();
    let ride = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(4));
    let report = h.state.sweeper.run_once().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(report.rescan.unmatched, 1);
    assert_eq!(
        h.state.ride_service.get_ride_status(&ride.id).await.unwrap().state,
        RideState::Requested
    );
}

#[tokio::test]
async fn the_timeout_boundary_is_inclusive() {
    let h = Harness::new();
    let ride = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(5) - Duration::seconds(1));
    assert_eq!(h.state.sweeper.run_once().await.unwrap().expired, 0);
    h.clock.advance(Duration::seconds(1));
    assert_eq!(h.state.sweeper.run_once().await.unwrap().expired, 1);
    assert_eq!(
        h.state.ride_service.get_ride_status(&ride.id).await.unwrap().state,
        RideState::Cancelled
    );
}

#[tokio::test]
async fn expired_rides_are_not_handed_to_late_drivers() {
    let h = Harness::new();
    let ride = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(6));
    h.state.sweeper.run_once().await.unwrap();

    h.online_driver("drv-late", north_of(pickup(), 0.4)).await;
    let driver = h.driver("drv-late").await;
    assert_eq!(driver.availability, DriverAvailability::Available);
    assert_eq!(driver.current_ride_id, None);
    assert_eq!(
        h.state.ride_service.get_ride_status(&ride.id).await.unwrap().state,
        RideState::Cancelled
    );

    // The rider can ask again straight away.
    h.state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();
}

#[tokio::test]
async fn matched_rides_are_left_alone_by_the_sweep() {
    let h = Harness::new();
    h.online_driver("drv-1", north_of(pickup(), 0.8)).await;
    let ride = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();
    assert_eq!(ride.state, RideState::Matched);

    h.clock.advance(Duration::minutes(30));
    let report = h.state.sweeper.run_once().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(
        h.state.ride_service.get_ride_status(&ride.id).await.unwrap().state,
        RideState::Matched
    );
    assert_eq!(h.cancellations_for(&ride), 0);
}

#[tokio::test]
async fn sweep_rescans_what_is_still_waiting() {
    let h = Harness::new();
    h.online_driver("drv-1", north_of(pickup(), 15.0)).await;
    let ride = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();
    assert_eq!(ride.state, RideState::Requested);

    h.clock.advance(Duration::minutes(2));
    h.state
        .driver_service
        .update_driver_location("drv-1", north_of(pickup(), 1.0))
        .await
        .unwrap();

    let report = h.state.sweeper.run_once().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(report.rescan.matched, 1);
    let matched = h.state.ride_service.get_ride_status(&ride.id).await.unwrap();
    assert_eq!(matched.state, RideState::Matched);
    assert_eq!(matched.driver_id.as_deref(), Some("drv-1"));
}

#[tokio::test]
async fn timeout_follows_configuration() {
    let mut config = AppConfig::default();
    config.lifecycle.request_timeout = Duration::seconds(45);
    let h = Harness::with_config(config);
    let ride = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(50));
    assert_eq!(h.state.sweeper.run_once().await.unwrap().expired, 1);
    assert_eq!(h.cancellations_for(&ride), 1);
}

#[tokio::test]
async fn one_stuck_ride_does_not_stop_the_sweep() {
    let flaky = FlakyStore::new();
    let h = Harness::with_store(AppConfig::default(), EntityStore::new(flaky.clone()));
    let stuck = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(10));
    let other = h
        .state
        .ride_service
        .request_ride(ride_body("rider-2", pickup(), RideType::Standard))
        .await
        .unwrap();

    flaky.set_failing(Some(&format!("ride:id:{}", stuck.id)));
    h.clock.advance(Duration::minutes(6));
    let report = h.state.sweeper.run_once().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(
        h.state.ride_service.get_ride_status(&other.id).await.unwrap().state,
        RideState::Cancelled
    );
    assert_eq!(
        h.state.ride_service.get_ride_status(&stuck.id).await.unwrap().state,
        RideState::Requested
    );
    assert_eq!(h.cancellations_for(&stuck), 0);

    // Still queued, so the next sweep finishes the job.
    flaky.set_failing(None);
    let retry = h.state.sweeper.run_once().await.unwrap();
    assert_eq!(retry.expired, 1);
    assert_eq!(retry.failed, 0);
    let expired = h.state.ride_service.get_ride_status(&stuck.id).await.unwrap();
    assert_eq!(expired.state, RideState::Cancelled);
    assert_eq!(
        expired.cancellation_reason,
        Some(CancellationReason::NoDriverTimeout)
    );
    assert_eq!(h.cancellations_for(&stuck), 1);
}

#[tokio::test]
async fn waiting_rides_outlive_a_restart() {
    let h = Harness::new();
    let ride = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();

    let h = h.restart().await;
    let again = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await;
    assert!(matches!(again, Err(DispatchError::DuplicateRequest(_))));

    h.clock.advance(Duration::minutes(5) + Duration::seconds(1));
    let report = h.state.sweeper.run_once().await.unwrap();
    assert_eq!(report.expired, 1);
    let expired = h.state.ride_service.get_ride_status(&ride.id).await.unwrap();
    assert_eq!(expired.state, RideState::Cancelled);
    assert_eq!(
        expired.cancellation_reason,
        Some(CancellationReason::NoDriverTimeout)
    );

    // Nothing left pinning the rider.
    h.state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();
}

#[tokio::test]
async fn drivers_pick_up_rides_recovered_after_a_restart() {
    let h = Harness::new();
    let ride = h
        .state
        .ride_service
        .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
        .await
        .unwrap();
    assert_eq!(ride.state, RideState::Requested);

    let h = h.restart().await;
    h.online_driver("drv-1", north_of(pickup(), 0.5)).await;
    let matched = h.state.ride_service.get_ride_status(&ride.id).await.unwrap();
    assert_eq!(matched.state, RideState::Matched);
    assert_eq!(matched.driver_id.as_deref(), Some("drv-1"));

    // Matched rides are not queued again by a later restart.
    let h = h.restart().await;
    h.clock.advance(Duration::minutes(10));
    assert_eq!(h.state.sweeper.run_once().await.unwrap().expired, 0);
    assert_eq!(
        h.state.ride_service.get_ride_status(&ride.id).await.unwrap().state,
        RideState::Matched
    );
}
