mod support;

use std::collections::HashSet;
use std::sync::Arc;

use ride_orchestrator::{
    DispatchError,
    models::{
        driver::DriverAvailability,
        request::RideType,
        ride::{Actor, CancellationReason, RideState},
    },
    services::{driver_service::DriverOperations, ride_service::RideOperations},
};

use support::{Harness, north_of, pickup, ride_body};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_requests_admit_exactly_one() {
    let h = Harness::new();
    let rides = h.state.ride_service.clone();

    let attempts: Vec<_> = (0..2)
        .map(|i| {
            let rides = rides.clone();
            tokio::spawn(async move {
                let ride_type = if i == 0 { RideType::Standard } else { RideType::Premium };
                rides.request_ride(ride_body("rider-dup", pickup(), ride_type)).await
            })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let accepted = results.iter().filter(|result| result.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|result| matches!(result, Err(DispatchError::DuplicateRequest(_))))
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 1);

    let history = rides.ride_history("rider-dup").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, RideState::Requested);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_driver_is_never_double_booked() {
    let h = Harness::new();
    h.online_driver("drv-only", pickup()).await;
    let rides = h.state.ride_service.clone();

    let requests: Vec<_> = (0..6)
        .map(|i| {
            let rides = rides.clone();
            tokio::spawn(async move {
                rides
                    .request_ride(ride_body(
                        &format!("rider-{}", i),
                        north_of(pickup(), 0.1 * i as f64 + 0.1),
                        RideType::Standard,
                    ))
                    .await
            })
        })
        .collect();
    let responses: Vec<_> = futures::future::join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let mut holding = Vec::new();
    for response in &responses {
        let ride = rides.get_ride_status(&response.id).await.unwrap();
        if ride.state.holds_driver() {
            holding.push(ride);
        }
    }
    assert_eq!(holding.len(), 1);
    assert_eq!(holding[0].driver_id.as_deref(), Some("drv-only"));

    let driver = h.driver("drv-only").await;
    assert_eq!(driver.availability, DriverAvailability::EnRoute);
    assert_eq!(driver.current_ride_id.as_deref(), Some(holding[0].id.as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drivers_coming_online_together_take_distinct_rides() {
    let h = Harness::new();
    let rides = h.state.ride_service.clone();
    let drivers = h.state.driver_service.clone();

    let mut ride_ids = Vec::new();
    for i in 0..4 {
        let ride = rides
            .request_ride(ride_body(
                &format!("rider-{}", i),
                north_of(pickup(), 0.2 * i as f64),
                RideType::Standard,
            ))
            .await
            .unwrap();
        ride_ids.push(ride.id);
        h.clock.advance(chrono::Duration::seconds(5));
    }
    for i in 0..4 {
        h.offline_driver(&format!("drv-{}", i), pickup()).await;
    }

    let shifts: Vec<_> = (0..4)
        .map(|i| {
            let drivers = drivers.clone();
            tokio::spawn(async move {
                drivers
                    .set_driver_availability(&format!("drv-{}", i), DriverAvailability::Available)
                    .await
            })
        })
        .collect();
    for joined in futures::future::join_all(shifts).await {
        joined.unwrap().unwrap();
    }

    let mut assigned = HashSet::new();
    for ride_id in &ride_ids {
        let ride = rides.get_ride_status(ride_id).await.unwrap();
        assert_eq!(ride.state, RideState::Matched);
        let driver_id = ride.driver_id.clone().unwrap();
        assert!(assigned.insert(driver_id.clone()), "{} booked twice", driver_id);
        assert_eq!(
            h.driver(&driver_id).await.current_ride_id.as_deref(),
            Some(ride_id.as_str())
        );
    }
    assert_eq!(assigned.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_wins_a_race_with_arrival() {
    for round in 0..10 {
        let h = Harness::new();
        let driver_id = format!("drv-{}", round);
        h.online_driver(&driver_id, pickup()).await;
        let rides = h.state.ride_service.clone();
        let ride = rides
            .request_ride(ride_body("rider-1", pickup(), RideType::Standard))
            .await
            .unwrap();
        assert_eq!(ride.state, RideState::Matched);

        let arrive = {
            let rides = rides.clone();
            let ride_id = ride.id.clone();
            let driver_id = driver_id.clone();
            tokio::spawn(async move { rides.driver_arrived(&ride_id, &driver_id).await })
        };
        let cancel = {
            let rides = rides.clone();
            let ride_id = ride.id.clone();
            tokio::spawn(async move {
                rides
                    .cancel_ride(
                        &ride_id,
                        Actor::Rider("rider-1".into()),
                        CancellationReason::RiderRequested,
                    )
                    .await
            })
        };
        let (arrived, cancelled) = futures::future::join(arrive, cancel).await;
        cancelled.unwrap().unwrap();
        if let Err(e) = arrived.unwrap() {
            assert!(matches!(e, DispatchError::InvalidTransition { .. }));
        }

        let ride = rides.get_ride_status(&ride.id).await.unwrap();
        assert_eq!(ride.state, RideState::Cancelled);
        let driver = h.driver(&driver_id).await;
        assert_eq!(driver.availability, DriverAvailability::Available);
        assert_eq!(driver.current_ride_id, None);
        assert_eq!(h.cancellations_for(&ride), 1);
    }
}

#[tokio::test]
async fn services_are_shareable_across_tasks() {
    fn assert_send_sync<T: Send + Sync>(_: &T) {}
    let h = Harness::new();
    assert_send_sync(&h.state.ride_service);
    assert_send_sync(&h.state.driver_service);
    let _: Arc<_> = h.state.sweeper.clone();
}
