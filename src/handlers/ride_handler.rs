// src/handlers/ride_handler.rs
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        request::{FareEstimateRequest, FareEstimateResponse, RideRequestBody},
        ride::{
            BoardingBody, CancelRideBody, DriverArrivalBody, RideHistoryEntry, RideResponse,
            TripCompletionBody,
        },
    },
    services::ride_service::RideOperations,
    state::AppState,
    utils::id_generator::{IdGenerator, IdType},
};

// Malformed ids cannot name a ride, so they read as not found.
fn check_ride_id(ride_id: &str) -> DispatchResult<()> {
    if IdGenerator::validate_id(ride_id, Some(IdType::Ride)) {
        Ok(())
    } else {
        tracing::warn!("Invalid ride ID format: {}", ride_id);
        Err(DispatchError::ride_not_found(ride_id))
    }
}

pub async fn estimate_fare(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FareEstimateRequest>,
) -> DispatchResult<Json<FareEstimateResponse>> {
    Ok(Json(state.ride_service.estimate_fare(body).await?))
}

pub async fn request_ride(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RideRequestBody>,
) -> DispatchResult<(StatusCode, Json<RideResponse>)> {
    let ride = state.ride_service.request_ride(body).await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

pub async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
) -> DispatchResult<Json<RideResponse>> {
    check_ride_id(&ride_id)?;
    Ok(Json(state.ride_service.get_ride_status(&ride_id).await?))
}

pub async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Json(body): Json<CancelRideBody>,
) -> DispatchResult<Json<RideResponse>> {
    check_ride_id(&ride_id)?;
    let ride = state
        .ride_service
        .cancel_ride(&ride_id, body.actor, body.reason)
        .await?;
    Ok(Json(ride))
}

pub async fn driver_arrived(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Json(body): Json<DriverArrivalBody>,
) -> DispatchResult<Json<RideResponse>> {
    check_ride_id(&ride_id)?;
    Ok(Json(
        state
            .ride_service
            .driver_arrived(&ride_id, &body.driver_id)
            .await?,
    ))
}

pub async fn rider_boarded(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Json(body): Json<BoardingBody>,
) -> DispatchResult<Json<RideResponse>> {
    check_ride_id(&ride_id)?;
    Ok(Json(
        state
            .ride_service
            .rider_boarded(&ride_id, &body.rider_id)
            .await?,
    ))
}

pub async fn complete_trip(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    Json(body): Json<TripCompletionBody>,
) -> DispatchResult<Json<RideResponse>> {
    check_ride_id(&ride_id)?;
    Ok(Json(
        state
            .ride_service
            .complete_trip(&ride_id, &body.driver_id, body.manual)
            .await?,
    ))
}

pub async fn ride_history(
    State(state): State<Arc<AppState>>,
    Path(rider_id): Path<String>,
) -> DispatchResult<Json<Vec<RideHistoryEntry>>> {
    Ok(Json(state.ride_service.ride_history(&rider_id).await?))
}
