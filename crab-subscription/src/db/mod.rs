//! Subscription store
//!
//! The store is the only point of mutual exclusion: every write is a
//! compare-and-swap on `subscriptions.version`. No in-process lock guards
//! subscription state.
//!
//! - [`postgres::PgSubscriptionStore`]: production (sqlx / PostgreSQL)
//! - [`memory::MemorySubscriptionStore`]: tests and local runs

pub mod audit;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{Subscription, SubscriptionEvent};
use thiserror::Error;

pub use memory::MemorySubscriptionStore;
pub use postgres::PgSubscriptionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store operation timed out")]
    Timeout,

    #[error("record not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Commit
// ============================================================================

/// One atomic write: subscription CAS + event append (+ payment key)
#[derive(Debug, Clone, Copy)]
pub struct Commit<'a> {
    /// Desired state; `version`/`updated_at` are ignored and set by the store
    pub next: &'a Subscription,
    /// Version the caller read; the write only lands if it is still current
    pub expected_version: i64,
    pub events: &'a [SubscriptionEvent],
    /// Payment idempotency key, recorded in the same transaction
    pub payment_id: Option<&'a str>,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Stored row, with bumped version
    Committed(Subscription),
    /// Someone else wrote first; re-read and retry
    VersionMismatch,
    /// `payment_id` was already recorded; nothing written
    DuplicatePayment,
}

// ============================================================================
// Reconciliation runs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// First run after process start
    Startup,
    Scheduled,
    /// Admin-triggered via API
    Manual,
}

impl RunTrigger {
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "startup" => Some(Self::Startup),
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    /// Lease expired before the run finished (crashed worker)
    Abandoned,
}

impl RunStatus {
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

/// Run metadata and per-run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRun {
    pub id: i64,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub started_at: i64,
    pub lease_expires_at: i64,
    pub finished_at: Option<i64>,
    /// Subscriptions ticked
    pub processed: i64,
    /// Ticks that committed a state change
    pub transitioned: i64,
    /// Ticks that failed after retries (kept for the next run)
    pub failed: i64,
    /// Subscriptions that turned out terminal/suspended by the time they were read
    pub skipped: i64,
}

/// Result of trying to take the run lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunLease {
    Acquired(ReconcileRun),
    /// Another run holds an unexpired lease
    Busy { active_run_id: i64 },
}

/// A tick that failed in some run and must be retried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTick {
    pub subscription_id: i64,
    pub run_id: i64,
    /// Consecutive failed runs
    pub attempts: i32,
    pub last_error: String,
    pub failed_at: i64,
}

// ============================================================================
// Store trait
// ============================================================================

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a NEW subscription. Idempotent per restaurant: if one already
    /// exists it is returned unchanged.
    async fn create(&self, sub: &Subscription) -> StoreResult<Subscription>;

    async fn find_by_restaurant(&self, restaurant_id: i64) -> StoreResult<Option<Subscription>>;

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Subscription>>;

    /// Atomic CAS write of subscription + events
    async fn commit(&self, commit: Commit<'_>) -> StoreResult<CommitOutcome>;

    /// Ids of subscriptions the sweep must tick (non-terminal, not suspended)
    async fn list_reconcilable(&self) -> StoreResult<Vec<i64>>;

    /// Events for one subscription, most recent first
    async fn list_events(
        &self,
        subscription_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<SubscriptionEvent>>;

    async fn is_payment_processed(&self, payment_id: &str) -> StoreResult<bool>;

    /// Take the single run lease. Expired leases are marked abandoned first.
    async fn begin_run(
        &self,
        run_id: i64,
        trigger: RunTrigger,
        now: i64,
        lease_ms: i64,
    ) -> StoreResult<RunLease>;

    /// Store the final summary and release the lease
    async fn finish_run(&self, run: &ReconcileRun) -> StoreResult<()>;

    /// Most recent first
    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<ReconcileRun>>;

    /// Upsert failures; `attempts` accumulates across runs
    async fn record_failures(&self, failures: &[FailedTick]) -> StoreResult<()>;

    async fn clear_failures(&self, subscription_ids: &[i64]) -> StoreResult<()>;

    async fn list_failed(&self) -> StoreResult<Vec<FailedTick>>;
}
