// src/services/notification_service.rs
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::notification::{NotificationEnvelope, RideNotification},
    utils::{Clock, id_generator::generate_event_id},
};

/// Outbound side channel. Delivery is best effort: a failed publish is
/// logged by the caller and never rolls back the transition that caused it.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn publish(&self, envelope: &NotificationEnvelope) -> DispatchResult<()>;
}

#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
}

impl NotificationMessage {
    pub fn for_event(event: &RideNotification) -> Self {
        let (title, body) = match event {
            RideNotification::RideMatched { fare, .. } => (
                "Driver found!".to_string(),
                format!("Your driver is on the way. Estimated fare: {}", fare),
            ),
            RideNotification::DriverArriving { .. } => (
                "Driver arriving".to_string(),
                "Your driver has reached the pickup point".to_string(),
            ),
            RideNotification::EtaUpdated { eta_minutes, .. } => (
                "Driver on the way".to_string(),
                format!("Your driver is {} min away", eta_minutes),
            ),
            RideNotification::RideCompleted { fare, .. } => (
                "Ride complete!".to_string(),
                format!("Thank you for riding with us. Fare: {}", fare),
            ),
            RideNotification::RideCancelled { .. } => (
                "Ride cancelled".to_string(),
                "Your ride has been cancelled".to_string(),
            ),
        };
        Self { title, body }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// POSTs each event, with its recipients and rendered message, to a push gateway.
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> DispatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DispatchError::Configuration(format!("webhook client: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn publish(&self, envelope: &NotificationEnvelope) -> DispatchResult<()> {
        let message = NotificationMessage::for_event(&envelope.event);
        let payload = json!({
            "event": envelope,
            "recipients": envelope.event.recipients(),
            "notification": {
                "title": message.title,
                "body": message.body,
            },
        });

        let delivery_id = uuid::Uuid::new_v4().to_string();
        let mut request = self
            .client
            .post(&self.config.url)
            .header("X-Delivery-Id", &delivery_id)
            .json(&payload);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DispatchError::Notification(format!(
                "webhook returned {}: {}",
                status, error_text
            )));
        }

        tracing::debug!("Delivered {} ({}) for ride {}", envelope.event.kind(), delivery_id, envelope.event.ride_id());
        Ok(())
    }
}

// Used when no push gateway is configured
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn publish(&self, envelope: &NotificationEnvelope) -> DispatchResult<()> {
        let message = NotificationMessage::for_event(&envelope.event);
        tracing::info!(
            "[NOTIFY] {} for ride {}: {} - {}",
            envelope.event.kind(),
            envelope.event.ride_id(),
            message.title,
            message.body
        );
        Ok(())
    }
}

/// Fans events out to in-process subscribers (the SSE stream).
pub struct BroadcastNotifier {
    sender: broadcast::Sender<NotificationEnvelope>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEnvelope> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationDispatcher for BroadcastNotifier {
    async fn publish(&self, envelope: &NotificationEnvelope) -> DispatchResult<()> {
        // No subscribers is not a failure.
        let _ = self.sender.send(envelope.clone());
        Ok(())
    }
}

/// Publishes to every target; reports the first failure after all have run.
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn NotificationDispatcher>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Arc<dyn NotificationDispatcher>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl NotificationDispatcher for FanoutNotifier {
    async fn publish(&self, envelope: &NotificationEnvelope) -> DispatchResult<()> {
        let results =
            futures::future::join_all(self.targets.iter().map(|target| target.publish(envelope)))
                .await;
        results.into_iter().collect::<DispatchResult<Vec<()>>>().map(|_| ())
    }
}

/// Keeps every published event in memory. Can be switched to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<NotificationEnvelope>>,
    failing: AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<NotificationEnvelope> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn events_for(&self, ride_id: &str) -> Vec<RideNotification> {
        self.events()
            .into_iter()
            .filter(|envelope| envelope.event.ride_id() == ride_id)
            .map(|envelope| envelope.event)
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for MemoryNotifier {
    async fn publish(&self, envelope: &NotificationEnvelope) -> DispatchResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Notification("delivery disabled".to_string()));
        }
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(envelope.clone());
        Ok(())
    }
}

/// Stamps events and hands them to the dispatcher, swallowing failures.
#[derive(Clone)]
pub struct EventPublisher {
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl EventPublisher {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self { dispatcher, clock }
    }

    pub async fn publish(&self, event: RideNotification) {
        let occurred_at = self.clock.now();
        let envelope = NotificationEnvelope {
            id: generate_event_id(occurred_at),
            occurred_at,
            event,
        };
        if let Err(e) = self.dispatcher.publish(&envelope).await {
            tracing::warn!(
                "Dropped {} notification for ride {}: {}",
                envelope.event.kind(),
                envelope.event.ride_id(),
                e
            );
        }
    }
}
