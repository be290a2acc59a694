// src/services/sweeper_service.rs
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{
    errors::DispatchResult,
    services::{
        matching_service::{MatchingEngine, RescanReport},
        queue_service::RideRequestQueue,
        ride_service::RideService,
    },
    utils::Clock,
};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Expiries that hit a storage error; those requests stay queued.
    pub failed: usize,
    pub rescan: RescanReport,
}

/// Periodic housekeeping: times out rides nobody picked up, then retries
/// matching for whatever is still queued.
pub struct RideSweeper {
    rides: Arc<RideService>,
    matching: Arc<MatchingEngine>,
    queue: Arc<RideRequestQueue>,
    clock: Arc<dyn Clock>,
}

impl RideSweeper {
    pub fn new(
        rides: Arc<RideService>,
        matching: Arc<MatchingEngine>,
        queue: Arc<RideRequestQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rides,
            matching,
            queue,
            clock,
        }
    }

    pub async fn run_once(&self) -> DispatchResult<SweepReport> {
        let cutoff = self.clock.now() - self.rides.config().request_timeout;
        let mut report = SweepReport::default();

        for request in self.queue.requested_before(cutoff).await {
            match self.rides.expire_request(&request).await {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Could not expire ride {}: {}", request.ride_id, e);
                    report.failed += 1;
                }
            }
        }
        report.rescan = self.matching.rescan().await?;
        Ok(report)
    }

    pub fn spawn(self: Arc<Self>, config: SweeperConfig) -> JoinHandle<()> {
        tracing::info!("Starting ride sweeper every {:?}", config.interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report.failed + report.rescan.failed > 0 => {
                        tracing::warn!(
                            "Sweep expired {} rides, matched {}, {} failures left queued",
                            report.expired,
                            report.rescan.matched,
                            report.failed + report.rescan.failed
                        );
                    }
                    Ok(report) if report.expired > 0 || report.rescan.matched > 0 => {
                        tracing::info!(
                            "Sweep expired {} rides, matched {}, {} still waiting",
                            report.expired,
                            report.rescan.matched,
                            report.rescan.unmatched
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Sweep failed: {}", e),
                }
            }
        })
    }
}
