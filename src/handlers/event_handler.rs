// src/handlers/event_handler.rs
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::{models::notification::NotificationEnvelope, state::AppState};

#[derive(Debug, Deserialize)]
pub struct EventFilter {
    /// Only stream events for this ride.
    pub ride_id: Option<String>,
}

fn to_sse(envelope: &NotificationEnvelope) -> Event {
    let event = Event::default()
        .event(envelope.event.kind())
        .id(envelope.id.clone());
    match event.json_data(envelope) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!("Failed to encode event {}: {}", envelope.id, e);
            Event::default().comment("encoding error")
        }
    }
}

/// Live feed of ride notifications as Server-Sent Events.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe();
    tracing::debug!("Event stream opened (ride filter: {:?})", filter.ride_id);

    let events = stream::unfold(
        (receiver, filter.ride_id),
        |(mut receiver, ride_id)| async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => {
                        if ride_id
                            .as_deref()
                            .is_some_and(|wanted| wanted != envelope.event.ride_id())
                        {
                            continue;
                        }
                        let event = to_sse(&envelope);
                        return Some((Ok(event), (receiver, ride_id)));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event stream lagged, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    );

    Sse::new(events).keep_alive(KeepAlive::default())
}
