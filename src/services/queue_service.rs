// src/services/queue_service.rs
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{geo::Coordinate, request::RideRequest},
};

/// Wait-time ordering key. `seq` breaks ties between identical timestamps.
type QueueKey = (DateTime<Utc>, u64);

#[derive(Debug, Clone)]
pub struct QueuedRequest {
    key: QueueKey,
    pub request: RideRequest,
}

#[derive(Debug, Default)]
struct QueueState {
    order: BTreeMap<QueueKey, String>,
    entries: HashMap<String, QueuedRequest>,
    pending_riders: HashMap<String, String>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, queued: QueuedRequest) {
        self.order.insert(queued.key, queued.request.id.clone());
        self.pending_riders
            .insert(queued.request.rider_id.clone(), queued.request.id.clone());
        self.entries.insert(queued.request.id.clone(), queued);
    }

    fn take(&mut self, request_id: &str) -> Option<QueuedRequest> {
        let queued = self.entries.remove(request_id)?;
        self.order.remove(&queued.key);
        if self.pending_riders.get(&queued.request.rider_id).map(String::as_str) == Some(request_id) {
            self.pending_riders.remove(&queued.request.rider_id);
        }
        Some(queued)
    }

    fn snapshot(&self) -> Arc<[RideRequest]> {
        self.order
            .values()
            .filter_map(|id| self.entries.get(id))
            .map(|queued| queued.request.clone())
            .collect()
    }
}

/// Pending ride requests awaiting a driver, oldest first.
#[derive(Debug, Default)]
pub struct RideRequestQueue {
    state: RwLock<QueueState>,
}

impl RideRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with DuplicateRequest if the rider already has a pending request.
    pub async fn enqueue(&self, request: RideRequest) -> DispatchResult<()> {
        let mut state = self.state.write().await;
        if state.pending_riders.contains_key(&request.rider_id)
            || state.entries.contains_key(&request.id)
        {
            return Err(DispatchError::DuplicateRequest(request.rider_id));
        }
        let key = (request.requested_at, state.next_seq);
        state.next_seq += 1;
        tracing::debug!("Queued request {} for rider {}", request.id, request.rider_id);
        state.insert(QueuedRequest { key, request });
        Ok(())
    }

    /// Takes a request out of the queue for matching. `None` if it is gone.
    pub async fn claim(&self, request_id: &str) -> Option<QueuedRequest> {
        self.state.write().await.take(request_id)
    }

    /// Puts a claimed request back at its original position.
    pub async fn restore(&self, queued: QueuedRequest) {
        let mut state = self.state.write().await;
        if state.entries.contains_key(&queued.request.id) {
            return;
        }
        tracing::debug!("Restored request {} to the queue", queued.request.id);
        state.insert(queued);
    }

    /// Idempotent: removing an absent request is a no-op.
    pub async fn remove(&self, request_id: &str) -> bool {
        let removed = self.state.write().await.take(request_id).is_some();
        if removed {
            tracing::debug!("Removed request {} from the queue", request_id);
        }
        removed
    }

    /// Snapshot of pending requests within `radius_km` of `origin`.
    /// The snapshot may go stale; a vanished request surfaces as a
    /// MatchConflict when claimed.
    pub async fn peek_candidates(&self, origin: Coordinate, radius_km: f64) -> Candidates {
        let snapshot = self.state.read().await.snapshot();
        Candidates {
            snapshot,
            origin,
            radius_km,
        }
    }

    pub async fn get(&self, request_id: &str) -> Option<RideRequest> {
        let state = self.state.read().await;
        state.entries.get(request_id).map(|queued| queued.request.clone())
    }

    pub async fn has_pending(&self, rider_id: &str) -> bool {
        self.state.read().await.pending_riders.contains_key(rider_id)
    }

    /// All pending requests, oldest first.
    pub async fn pending(&self) -> Vec<RideRequest> {
        self.state.read().await.snapshot().to_vec()
    }

    /// Requests queued at or before `cutoff`, oldest first.
    pub async fn requested_before(&self, cutoff: DateTime<Utc>) -> Vec<RideRequest> {
        let state = self.state.read().await;
        state
            .order
            .range(..=(cutoff, u64::MAX))
            .filter_map(|(_, id)| state.entries.get(id))
            .map(|queued| queued.request.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub request: &'a RideRequest,
    pub distance_km: f64,
}

/// Finite, restartable view over a queue snapshot. Filtering by distance
/// happens lazily as the sequence is walked.
#[derive(Debug, Clone)]
pub struct Candidates {
    snapshot: Arc<[RideRequest]>,
    origin: Coordinate,
    radius_km: f64,
}

impl Candidates {
    pub fn iter(&self) -> impl Iterator<Item = Candidate<'_>> + '_ {
        self.snapshot.iter().filter_map(move |request| {
            let distance_km = self.origin.distance_km(&request.pickup);
            (distance_km <= self.radius_km).then_some(Candidate {
                request,
                distance_km,
            })
        })
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }
}
