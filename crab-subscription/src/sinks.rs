//! Outbound event sinks
//!
//! Committed events are handed to every registered [`EventSink`] after the
//! store commit succeeds. Sink failures are logged and never fail the
//! command that produced the events.
//!
//! - [`AuditLogSink`]: tenant-visible `audit_logs` rows
//! - [`NotificationSink`]: forwards notifiable events over mpsc to
//!   [`NotificationWorker`]
//! - [`MemorySink`]: keeps everything in memory (tests, local runs)

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use shared::{DaysRemaining, Subscription, SubscriptionEvent, SubscriptionEventType, SubscriptionStatus};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::db;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("sink channel full or closed")]
    ChannelClosed,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// `subscription` is the committed state the events led to
    async fn publish(
        &self,
        subscription: &Subscription,
        events: &[SubscriptionEvent],
    ) -> Result<(), SinkError>;
}

/// Human-readable actor label from event metadata (`admin:42`, `owner`, ...)
fn actor_label(metadata: &serde_json::Value) -> Option<String> {
    let actor = metadata.get("actor")?;
    let kind = actor.get("kind")?.as_str()?;
    let id = actor
        .get("admin_id")
        .or_else(|| actor.get("user_id"))
        .and_then(|v| v.as_str());
    Some(match id {
        Some(id) => format!("{kind}:{id}"),
        None => kind.to_string(),
    })
}

// ============================================================================
// Audit log
// ============================================================================

pub struct AuditLogSink {
    pool: PgPool,
}

impl AuditLogSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for AuditLogSink {
    fn name(&self) -> &'static str {
        "audit_log"
    }

    async fn publish(
        &self,
        subscription: &Subscription,
        events: &[SubscriptionEvent],
    ) -> Result<(), SinkError> {
        for event in events {
            let actor = actor_label(&event.metadata);
            db::audit::log(
                &self.pool,
                subscription.restaurant_id,
                &format!("subscription.{}", event.event_type.as_db().to_lowercase()),
                Some(&event.metadata),
                actor.as_deref(),
                event.created_at,
            )
            .await?;
        }
        Ok(())
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Payload handed to the external notification trigger
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub restaurant_id: i64,
    pub subscription_id: i64,
    pub event_type: SubscriptionEventType,
    pub status: SubscriptionStatus,
    pub days: DaysRemaining,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

/// Non-blocking: a full channel drops the notification with a warning
pub struct NotificationSink {
    tx: mpsc::Sender<Notification>,
}

impl NotificationSink {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for NotificationSink {
    fn name(&self) -> &'static str {
        "notification"
    }

    async fn publish(
        &self,
        subscription: &Subscription,
        events: &[SubscriptionEvent],
    ) -> Result<(), SinkError> {
        for event in events.iter().filter(|e| e.event_type.is_notifiable()) {
            let notification = Notification {
                restaurant_id: subscription.restaurant_id,
                subscription_id: subscription.id,
                event_type: event.event_type,
                status: subscription.status,
                days: subscription.days_remaining(event.created_at),
                metadata: event.metadata.clone(),
                created_at: event.created_at,
            };
            self.tx
                .try_send(notification)
                .map_err(|_| SinkError::ChannelClosed)?;
        }
        Ok(())
    }
}

/// Consumes notifications and hands them to the delivery trigger
pub struct NotificationWorker;

impl NotificationWorker {
    /// Runs until the channel closes
    pub async fn run(self, mut rx: mpsc::Receiver<Notification>) {
        tracing::info!("Notification worker started");

        while let Some(n) = rx.recv().await {
            tracing::info!(
                target: "crab_subscription::notify",
                restaurant_id = n.restaurant_id,
                subscription_id = n.subscription_id,
                event_type = %n.event_type,
                status = %n.status,
                trial_days_remaining = n.days.trial_days_remaining,
                paid_days_remaining = n.days.paid_days_remaining,
                grace_days_remaining = n.days.grace_days_remaining,
                at = %shared::util::format_millis(n.created_at),
                "Subscription notification"
            );
        }

        tracing::info!("Notification channel closed, worker stopping");
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SubscriptionEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SubscriptionEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<SubscriptionEventType> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(
        &self,
        _subscription: &Subscription,
        events: &[SubscriptionEvent],
    ) -> Result<(), SinkError> {
        self.events.lock().extend_from_slice(events);
        Ok(())
    }
}
