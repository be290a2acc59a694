// src/handlers/driver_handler.rs
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::{
    errors::DispatchResult,
    models::driver::{
        DriverAvailabilityUpdate, DriverLocationUpdate, DriverRegistration, DriverResponse,
    },
    services::driver_service::DriverOperations,
    state::AppState,
};

pub async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<DriverRegistration>,
) -> DispatchResult<(StatusCode, Json<DriverResponse>)> {
    let driver = state.driver_service.register_driver(registration).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

pub async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> DispatchResult<Json<DriverResponse>> {
    Ok(Json(state.driver_service.get_driver(&driver_id).await?))
}

pub async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Json(update): Json<DriverLocationUpdate>,
) -> DispatchResult<Json<DriverResponse>> {
    Ok(Json(
        state
            .driver_service
            .update_driver_location(&driver_id, update.location)
            .await?,
    ))
}

pub async fn set_availability(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Json(update): Json<DriverAvailabilityUpdate>,
) -> DispatchResult<Json<DriverResponse>> {
    Ok(Json(
        state
            .driver_service
            .set_driver_availability(&driver_id, update.availability)
            .await?,
    ))
}
