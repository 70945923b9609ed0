//! Application state

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{PgSubscriptionStore, SubscriptionStore};
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::service::{ServiceSettings, SubscriptionService};
use crate::sinks::{AuditLogSink, EventSink, Notification, NotificationSink};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pending notifications before new ones are dropped
const NOTIFICATION_BUFFER: usize = 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SubscriptionService>,
    pub reconciler: Arc<Reconciler>,
    pub store: Arc<dyn SubscriptionStore>,
}

impl AppState {
    /// Production wiring: PostgreSQL store, audit + notification sinks.
    ///
    /// Returns the notification receiver for `NotificationWorker`.
    pub async fn new(
        config: &Config,
        shutdown: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<Notification>), BoxError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_db_connections())
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");

        let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let sinks: Vec<Arc<dyn EventSink>> = vec![
            Arc::new(AuditLogSink::new(pool.clone())),
            Arc::new(NotificationSink::new(notify_tx)),
        ];

        let state = Self::build(
            Arc::new(PgSubscriptionStore::new(pool)),
            Arc::new(SystemClock),
            config.service_settings(),
            config.reconciler_settings(),
            sinks,
            shutdown,
        );
        Ok((state, notify_rx))
    }

    /// Wire service and reconciler over any store/clock
    pub fn build(
        store: Arc<dyn SubscriptionStore>,
        clock: Arc<dyn Clock>,
        service_settings: ServiceSettings,
        reconciler_settings: ReconcilerSettings,
        sinks: Vec<Arc<dyn EventSink>>,
        shutdown: CancellationToken,
    ) -> Self {
        let service = sinks.into_iter().fold(
            SubscriptionService::new(store.clone(), clock.clone(), service_settings),
            SubscriptionService::with_sink,
        );
        let service = Arc::new(service);
        let reconciler = Arc::new(Reconciler::new(
            service.clone(),
            store.clone(),
            clock,
            reconciler_settings,
            shutdown,
        ));
        Self {
            service,
            reconciler,
            store,
        }
    }
}
