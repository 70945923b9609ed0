//! PostgreSQL store

use async_trait::async_trait;
use shared::{Plan, Subscription, SubscriptionEvent, SubscriptionEventType, SubscriptionStatus};
use sqlx::PgPool;

use super::{
    Commit, CommitOutcome, FailedTick, ReconcileRun, RunLease, RunStatus, RunTrigger, StoreError,
    StoreResult, SubscriptionStore,
};

const SUBSCRIPTION_COLUMNS: &str = "id, restaurant_id, plan, status, trial_start_at, trial_end_at, \
     current_period_start_at, current_period_end_at, grace_end_at, cancel_at_period_end, \
     canceled_at, pre_suspend_status, suspended_at, version, created_at, updated_at";

const RUN_COLUMNS: &str = "id, trigger, status, started_at, lease_expires_at, finished_at, \
     processed, transitioned, failed, skipped";

#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: i64,
    restaurant_id: i64,
    plan: Option<String>,
    status: String,
    trial_start_at: Option<i64>,
    trial_end_at: Option<i64>,
    current_period_start_at: Option<i64>,
    current_period_end_at: Option<i64>,
    grace_end_at: Option<i64>,
    cancel_at_period_end: bool,
    canceled_at: Option<i64>,
    pre_suspend_status: Option<String>,
    suspended_at: Option<i64>,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

fn parse_status(s: &str) -> StoreResult<SubscriptionStatus> {
    SubscriptionStatus::from_db(s)
        .ok_or_else(|| StoreError::Serialization(format!("unknown subscription status: {s}")))
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let plan = match row.plan.as_deref() {
            Some(p) => Some(
                Plan::from_db(p)
                    .ok_or_else(|| StoreError::Serialization(format!("unknown plan: {p}")))?,
            ),
            None => None,
        };
        Ok(Subscription {
            id: row.id,
            restaurant_id: row.restaurant_id,
            plan,
            status: parse_status(&row.status)?,
            trial_start_at: row.trial_start_at,
            trial_end_at: row.trial_end_at,
            current_period_start_at: row.current_period_start_at,
            current_period_end_at: row.current_period_end_at,
            grace_end_at: row.grace_end_at,
            cancel_at_period_end: row.cancel_at_period_end,
            canceled_at: row.canceled_at,
            pre_suspend_status: row.pre_suspend_status.as_deref().map(parse_status).transpose()?,
            suspended_at: row.suspended_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    subscription_id: i64,
    event_type: String,
    metadata: serde_json::Value,
    created_at: i64,
}

impl TryFrom<EventRow> for SubscriptionEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type = SubscriptionEventType::from_db(&row.event_type).ok_or_else(|| {
            StoreError::Serialization(format!("unknown event type: {}", row.event_type))
        })?;
        Ok(SubscriptionEvent {
            id: row.id,
            subscription_id: row.subscription_id,
            event_type,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    trigger: String,
    status: String,
    started_at: i64,
    lease_expires_at: i64,
    finished_at: Option<i64>,
    processed: i64,
    transitioned: i64,
    failed: i64,
    skipped: i64,
}

impl TryFrom<RunRow> for ReconcileRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(ReconcileRun {
            id: row.id,
            trigger: RunTrigger::from_db(&row.trigger)
                .ok_or_else(|| StoreError::Serialization(format!("unknown trigger: {}", row.trigger)))?,
            status: RunStatus::from_db(&row.status)
                .ok_or_else(|| StoreError::Serialization(format!("unknown run status: {}", row.status)))?,
            started_at: row.started_at,
            lease_expires_at: row.lease_expires_at,
            finished_at: row.finished_at,
            processed: row.processed,
            transitioned: row.transitioned,
            failed: row.failed,
            skipped: row.skipped,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FailureRow {
    subscription_id: i64,
    run_id: i64,
    attempts: i32,
    last_error: String,
    failed_at: i64,
}

impl From<FailureRow> for FailedTick {
    fn from(row: FailureRow) -> Self {
        FailedTick {
            subscription_id: row.subscription_id,
            run_id: row.run_id,
            attempts: row.attempts,
            last_error: row.last_error,
            failed_at: row.failed_at,
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn create(&self, sub: &Subscription) -> StoreResult<Subscription> {
        sqlx::query(
            "INSERT INTO subscriptions (id, restaurant_id, plan, status, version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 0, $5, $5)
             ON CONFLICT (restaurant_id) DO NOTHING",
        )
        .bind(sub.id)
        .bind(sub.restaurant_id)
        .bind(sub.plan.map(|p| p.as_db()))
        .bind(sub.status.as_db())
        .bind(sub.created_at)
        .execute(&self.pool)
        .await?;

        self.find_by_restaurant(sub.restaurant_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_restaurant(&self, restaurant_id: i64) -> StoreResult<Option<Subscription>> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE restaurant_id = $1");
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(restaurant_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Subscription>> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1");
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn commit(&self, commit: Commit<'_>) -> StoreResult<CommitOutcome> {
        let next = commit.next;
        let mut tx = self.pool.begin().await?;

        // Idempotency: INSERT first, check rows_affected
        if let Some(payment_id) = commit.payment_id {
            let inserted = sqlx::query(
                "INSERT INTO processed_payments (payment_id, subscription_id, processed_at)
                 VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(payment_id)
            .bind(next.id)
            .bind(commit.now)
            .execute(&mut *tx)
            .await?;
            if inserted.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(CommitOutcome::DuplicatePayment);
            }
        }

        let sql = format!(
            "UPDATE subscriptions SET
                plan = $3, status = $4,
                trial_start_at = $5, trial_end_at = $6,
                current_period_start_at = $7, current_period_end_at = $8,
                grace_end_at = $9, cancel_at_period_end = $10, canceled_at = $11,
                pre_suspend_status = $12, suspended_at = $13,
                version = version + 1, updated_at = $14
             WHERE id = $1 AND version = $2
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(next.id)
            .bind(commit.expected_version)
            .bind(next.plan.map(|p| p.as_db()))
            .bind(next.status.as_db())
            .bind(next.trial_start_at)
            .bind(next.trial_end_at)
            .bind(next.current_period_start_at)
            .bind(next.current_period_end_at)
            .bind(next.grace_end_at)
            .bind(next.cancel_at_period_end)
            .bind(next.canceled_at)
            .bind(next.pre_suspend_status.map(|s| s.as_db()))
            .bind(next.suspended_at)
            .bind(commit.now)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(CommitOutcome::VersionMismatch);
        };

        for event in commit.events {
            sqlx::query(
                "INSERT INTO subscription_events (id, subscription_id, event_type, metadata, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(event.id)
            .bind(event.subscription_id)
            .bind(event.event_type.as_db())
            .bind(&event.metadata)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed(row.try_into()?))
    }

    async fn list_reconcilable(&self) -> StoreResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM subscriptions
             WHERE status IN ('new', 'trialing', 'active', 'grace')
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn list_events(
        &self,
        subscription_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<SubscriptionEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, subscription_id, event_type, metadata, created_at
             FROM subscription_events
             WHERE subscription_id = $1
             ORDER BY seq DESC
             LIMIT $2",
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SubscriptionEvent::try_from).collect()
    }

    async fn is_payment_processed(&self, payment_id: &str) -> StoreResult<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payment_id FROM processed_payments WHERE payment_id = $1")
                .bind(payment_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn begin_run(
        &self,
        run_id: i64,
        trigger: RunTrigger,
        now: i64,
        lease_ms: i64,
    ) -> StoreResult<RunLease> {
        let mut tx = self.pool.begin().await?;

        let abandoned = sqlx::query(
            "UPDATE reconcile_runs SET status = 'abandoned', finished_at = $1
             WHERE status = 'running' AND lease_expires_at <= $1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if abandoned.rows_affected() > 0 {
            tracing::warn!(
                count = abandoned.rows_affected(),
                "Reclaimed expired reconciliation lease"
            );
        }

        // The partial unique index admits a single 'running' row
        let inserted = sqlx::query(
            "INSERT INTO reconcile_runs (id, trigger, status, started_at, lease_expires_at)
             VALUES ($1, $2, 'running', $3, $4)
             ON CONFLICT DO NOTHING",
        )
        .bind(run_id)
        .bind(trigger.as_db())
        .bind(now)
        .bind(now + lease_ms)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let active: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM reconcile_runs WHERE status = 'running'")
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.commit().await?;
            return match active {
                Some((active_run_id,)) => Ok(RunLease::Busy { active_run_id }),
                // Lost a race with a run that already finished; treat as busy
                None => Ok(RunLease::Busy { active_run_id: 0 }),
            };
        }

        tx.commit().await?;
        Ok(RunLease::Acquired(ReconcileRun {
            id: run_id,
            trigger,
            status: RunStatus::Running,
            started_at: now,
            lease_expires_at: now + lease_ms,
            finished_at: None,
            processed: 0,
            transitioned: 0,
            failed: 0,
            skipped: 0,
        }))
    }

    async fn finish_run(&self, run: &ReconcileRun) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE reconcile_runs SET
                status = $2, finished_at = $3,
                processed = $4, transitioned = $5, failed = $6, skipped = $7
             WHERE id = $1",
        )
        .bind(run.id)
        .bind(run.status.as_db())
        .bind(run.finished_at)
        .bind(run.processed)
        .bind(run.transitioned)
        .bind(run.failed)
        .bind(run.skipped)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<ReconcileRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM reconcile_runs ORDER BY started_at DESC, id DESC LIMIT $1"
        );
        let rows: Vec<RunRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ReconcileRun::try_from).collect()
    }

    async fn record_failures(&self, failures: &[FailedTick]) -> StoreResult<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for f in failures {
            sqlx::query(
                "INSERT INTO reconcile_failures (subscription_id, run_id, attempts, last_error, failed_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (subscription_id) DO UPDATE SET
                    run_id = EXCLUDED.run_id,
                    attempts = reconcile_failures.attempts + EXCLUDED.attempts,
                    last_error = EXCLUDED.last_error,
                    failed_at = EXCLUDED.failed_at",
            )
            .bind(f.subscription_id)
            .bind(f.run_id)
            .bind(f.attempts)
            .bind(&f.last_error)
            .bind(f.failed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear_failures(&self, subscription_ids: &[i64]) -> StoreResult<()> {
        if subscription_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM reconcile_failures WHERE subscription_id = ANY($1)")
            .bind(subscription_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_failed(&self) -> StoreResult<Vec<FailedTick>> {
        let rows: Vec<FailureRow> = sqlx::query_as(
            "SELECT subscription_id, run_id, attempts, last_error, failed_at
             FROM reconcile_failures ORDER BY failed_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FailedTick::from).collect())
    }
}
