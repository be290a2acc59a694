pub mod driver_handler;
pub mod event_handler;
pub mod ride_handler;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post, put},
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/fares/estimate", post(ride_handler::estimate_fare))
        .route("/rides", post(ride_handler::request_ride))
        .route("/rides/:ride_id", get(ride_handler::get_ride))
        .route("/rides/:ride_id/cancel", post(ride_handler::cancel_ride))
        .route("/rides/:ride_id/arrive", post(ride_handler::driver_arrived))
        .route("/rides/:ride_id/board", post(ride_handler::rider_boarded))
        .route("/rides/:ride_id/complete", post(ride_handler::complete_trip))
        .route("/riders/:rider_id/rides", get(ride_handler::ride_history))
        .route("/drivers", post(driver_handler::register_driver))
        .route("/drivers/:driver_id", get(driver_handler::get_driver))
        .route("/drivers/:driver_id/location", put(driver_handler::update_location))
        .route("/drivers/:driver_id/availability", put(driver_handler::set_availability))
        .route("/events", get(event_handler::stream_events))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "currency": state.config.fare.currency,
    }))
}
