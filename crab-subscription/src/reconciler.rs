//! Reconciliation scheduler
//!
//! Runs `Tick` against every non-terminal, non-suspended subscription on a
//! fixed cadence: a catch-up run at startup, then one run per interval.
//!
//! - One run at a time: the run lease lives in the store, so overlapping
//!   triggers (timer + manual, or two replicas) skip instead of double-ticking.
//! - Bounded concurrency: `buffer_unordered(concurrency)` regardless of
//!   tenant count.
//! - Partial failure: a failing subscription is retried with exponential
//!   backoff inside the run, then recorded and picked up again next run.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::db::{FailedTick, ReconcileRun, RunLease, RunStatus, RunTrigger, SubscriptionStore};
use crate::error::{ServiceError, ServiceResult};
use crate::service::{SubscriptionService, TickOutcome};

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub interval: Duration,
    pub concurrency: usize,
    /// Lease length; a run still "running" past this is considered dead
    pub lease: Duration,
    /// Attempts per subscription within one run
    pub max_tick_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            concurrency: 8,
            lease: Duration::from_secs(60 * 60),
            max_tick_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(5),
        }
    }
}

/// Result of one trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(ReconcileRun),
    /// Another run holds the lease
    Skipped { active_run_id: i64 },
}

/// Per-subscription result inside a run
enum TickResult {
    Done(TickOutcome),
    Failed { attempts: u32, error: String },
}

pub struct Reconciler {
    service: Arc<SubscriptionService>,
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
    settings: ReconcilerSettings,
    shutdown: CancellationToken,
}

impl Reconciler {
    pub fn new(
        service: Arc<SubscriptionService>,
        store: Arc<dyn SubscriptionStore>,
        clock: Arc<dyn Clock>,
        settings: ReconcilerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            store,
            clock,
            settings,
            shutdown,
        }
    }

    /// Main loop: catch-up run → periodic runs until shutdown
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            concurrency = self.settings.concurrency,
            "Reconciler started"
        );

        self.trigger(RunTrigger::Startup).await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {
                    self.trigger(RunTrigger::Scheduled).await;
                }
            }
        }

        tracing::info!("Reconciler stopped");
    }

    /// Run once, logging instead of returning errors
    async fn trigger(&self, trigger: RunTrigger) {
        if let Err(e) = self.run_once(trigger).await {
            tracing::error!(trigger = trigger.as_db(), error = %e, "Reconciliation run failed");
        }
    }

    /// One sweep over all eligible subscriptions
    pub async fn run_once(&self, trigger: RunTrigger) -> ServiceResult<RunOutcome> {
        let started_at = self.clock.now_millis();
        let lease_ms = i64::try_from(self.settings.lease.as_millis()).unwrap_or(i64::MAX);

        let lease = self
            .service
            .timed(self.store.begin_run(
                shared::util::snowflake_id(),
                trigger,
                started_at,
                lease_ms,
            ))
            .await?;
        let mut run = match lease {
            RunLease::Acquired(run) => run,
            RunLease::Busy { active_run_id } => {
                tracing::info!(
                    trigger = trigger.as_db(),
                    active_run_id,
                    "Reconciliation already running, skipping"
                );
                return Ok(RunOutcome::Skipped { active_run_id });
            }
        };

        match self.sweep(&mut run).await {
            Ok(()) => run.status = RunStatus::Completed,
            Err(e) => {
                tracing::error!(run_id = run.id, error = %e, "Reconciliation sweep aborted");
                run.status = RunStatus::Abandoned;
            }
        }
        run.finished_at = Some(self.clock.now_millis());
        self.service.timed(self.store.finish_run(&run)).await?;

        tracing::info!(
            run_id = run.id,
            trigger = trigger.as_db(),
            status = run.status.as_db(),
            processed = run.processed,
            transitioned = run.transitioned,
            failed = run.failed,
            skipped = run.skipped,
            "Reconciliation run finished"
        );
        Ok(RunOutcome::Completed(run))
    }

    async fn sweep(&self, run: &mut ReconcileRun) -> ServiceResult<()> {
        let previously_failed: HashMap<i64, FailedTick> = self
            .service
            .timed(self.store.list_failed())
            .await?
            .into_iter()
            .map(|f| (f.subscription_id, f))
            .collect();

        let mut candidates: BTreeSet<i64> = self
            .service
            .timed(self.store.list_reconcilable())
            .await?
            .into_iter()
            .collect();
        candidates.extend(previously_failed.keys().copied());

        tracing::info!(
            run_id = run.id,
            candidates = candidates.len(),
            retrying = previously_failed.len(),
            "Reconciliation sweep started"
        );

        let results: Vec<(i64, TickResult)> = stream::iter(candidates)
            .map(|id| async move { (id, self.tick_with_retry(id).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
            .take_until(self.shutdown.cancelled())
            .collect()
            .await;

        let now = self.clock.now_millis();
        let mut failures = Vec::new();
        let mut recovered = Vec::new();

        for (id, result) in results {
            match result {
                TickResult::Done(outcome) => {
                    match outcome {
                        TickOutcome::Transitioned(_) => {
                            run.processed += 1;
                            run.transitioned += 1;
                        }
                        TickOutcome::Unchanged => run.processed += 1,
                        TickOutcome::Skipped(_) | TickOutcome::Missing => run.skipped += 1,
                    }
                    if previously_failed.contains_key(&id) {
                        recovered.push(id);
                    }
                }
                TickResult::Failed { attempts, error } => {
                    run.processed += 1;
                    run.failed += 1;
                    tracing::warn!(
                        run_id = run.id,
                        subscription_id = id,
                        attempts,
                        error = %error,
                        "Tick failed, will retry next run"
                    );
                    failures.push(FailedTick {
                        subscription_id: id,
                        run_id: run.id,
                        attempts: 1,
                        last_error: error,
                        failed_at: now,
                    });
                }
            }
        }

        self.service.timed(self.store.record_failures(&failures)).await?;
        self.service.timed(self.store.clear_failures(&recovered)).await?;
        if !recovered.is_empty() {
            tracing::info!(run_id = run.id, count = recovered.len(), "Recovered previously failed ticks");
        }
        Ok(())
    }

    /// Tick one subscription, retrying transient errors with exponential
    /// backoff: `base * 2^attempt`, capped
    async fn tick_with_retry(&self, subscription_id: i64) -> TickResult {
        let max_attempts = self.settings.max_tick_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.service.tick(subscription_id).await {
                Ok(outcome) => {
                    if let TickOutcome::Transitioned(events) = &outcome {
                        tracing::debug!(subscription_id, ?events, "Tick transitioned");
                    }
                    return TickResult::Done(outcome);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt - 1);
                    tracing::debug!(
                        subscription_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Tick failed, backing off"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            return TickResult::Failed { attempts: attempt, error: e.to_string() };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    return TickResult::Failed {
                        attempts: attempt,
                        error: failure_message(&e),
                    };
                }
            }
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.settings
            .retry_base_delay
            .saturating_mul(factor)
            .min(self.settings.retry_max_delay)
    }
}

fn failure_message(e: &ServiceError) -> String {
    match e {
        ServiceError::Rejected(r) => format!("rejected: {r}"),
        other => other.to_string(),
    }
}
