//! In-memory store
//!
//! Same CAS semantics as the PostgreSQL store, behind one mutex so a commit
//! (subscription + events + payment key) is atomic. Used by tests and by
//! local runs without a database.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::{Subscription, SubscriptionEvent};

use super::{
    Commit, CommitOutcome, FailedTick, ReconcileRun, RunLease, RunStatus, RunTrigger, StoreError,
    StoreResult, SubscriptionStore,
};

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<i64, Subscription>,
    by_restaurant: HashMap<i64, i64>,
    events: Vec<SubscriptionEvent>,
    payments: HashSet<String>,
    runs: Vec<ReconcileRun>,
    failures: HashMap<i64, FailedTick>,
    /// Fault injection: remaining forced commit failures per subscription
    failing_commits: HashMap<i64, u32>,
    /// Writes that land just before the next commits, as a concurrent writer would
    interleaved: HashMap<i64, VecDeque<InterleavedWrite>>,
    /// Every call hangs, as against an unresponsive database
    stalled: bool,
}

type InterleavedWrite = Box<dyn FnOnce(&mut Subscription) + Send>;

#[derive(Clone, Default)]
pub struct MemorySubscriptionStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` commits for `subscription_id` fail with
    /// `StoreError::Unavailable`
    pub fn fail_commits(&self, subscription_id: i64, times: u32) {
        self.inner
            .lock()
            .failing_commits
            .insert(subscription_id, times);
    }

    /// Have another writer commit `write` to `subscription_id` right before
    /// the next commit, so that commit loses the version race
    pub fn interleave_commit(
        &self,
        subscription_id: i64,
        write: impl FnOnce(&mut Subscription) + Send + 'static,
    ) {
        self.inner
            .lock()
            .interleaved
            .entry(subscription_id)
            .or_default()
            .push_back(Box::new(write));
    }

    /// Lose the version race on the next `times` commits
    pub fn race_commits(&self, subscription_id: i64, times: u32) {
        for _ in 0..times {
            self.interleave_commit(subscription_id, |_| {});
        }
    }

    /// Make every later store call hang forever
    pub fn stall(&self) {
        self.inner.lock().stalled = true;
    }

    async fn stall_point(&self) {
        let stalled = self.inner.lock().stalled;
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    /// Overwrite a stored row (test setup only; bypasses CAS)
    pub fn put(&self, sub: Subscription) {
        let mut inner = self.inner.lock();
        inner.by_restaurant.insert(sub.restaurant_id, sub.id);
        inner.subscriptions.insert(sub.id, sub);
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().events.len()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn create(&self, sub: &Subscription) -> StoreResult<Subscription> {
        self.stall_point().await;
        let mut inner = self.inner.lock();
        if let Some(id) = inner.by_restaurant.get(&sub.restaurant_id)
            && let Some(existing) = inner.subscriptions.get(id)
        {
            return Ok(existing.clone());
        }
        let mut stored = sub.clone();
        stored.version = 0;
        stored.updated_at = stored.created_at;
        inner.by_restaurant.insert(stored.restaurant_id, stored.id);
        inner.subscriptions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_restaurant(&self, restaurant_id: i64) -> StoreResult<Option<Subscription>> {
        self.stall_point().await;
        let inner = self.inner.lock();
        Ok(inner
            .by_restaurant
            .get(&restaurant_id)
            .and_then(|id| inner.subscriptions.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Subscription>> {
        self.stall_point().await;
        Ok(self.inner.lock().subscriptions.get(&id).cloned())
    }

    async fn commit(&self, commit: Commit<'_>) -> StoreResult<CommitOutcome> {
        self.stall_point().await;
        let mut inner = self.inner.lock();
        let id = commit.next.id;

        if let Some(remaining) = inner.failing_commits.get_mut(&id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StoreError::Unavailable(format!(
                "injected commit failure for subscription {id}"
            )));
        }

        let interleaved = inner
            .interleaved
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        if let Some(write) = interleaved
            && let Some(row) = inner.subscriptions.get_mut(&id)
        {
            write(row);
            row.version += 1;
        }

        let Some(current) = inner.subscriptions.get(&id) else {
            return Err(StoreError::NotFound);
        };
        if current.version != commit.expected_version {
            return Ok(CommitOutcome::VersionMismatch);
        }
        if let Some(payment_id) = commit.payment_id
            && inner.payments.contains(payment_id)
        {
            return Ok(CommitOutcome::DuplicatePayment);
        }

        let mut stored = commit.next.clone();
        stored.version = commit.expected_version + 1;
        stored.updated_at = commit.now;

        if let Some(payment_id) = commit.payment_id {
            inner.payments.insert(payment_id.to_string());
        }
        inner.subscriptions.insert(id, stored.clone());
        inner.events.extend_from_slice(commit.events);
        Ok(CommitOutcome::Committed(stored))
    }

    async fn list_reconcilable(&self) -> StoreResult<Vec<i64>> {
        self.stall_point().await;
        let inner = self.inner.lock();
        let mut ids: Vec<i64> = inner
            .subscriptions
            .values()
            .filter(|s| s.status.is_reconcilable())
            .map(|s| s.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn list_events(
        &self,
        subscription_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<SubscriptionEvent>> {
        self.stall_point().await;
        let inner = self.inner.lock();
        let mut events: Vec<SubscriptionEvent> = inner
            .events
            .iter()
            .filter(|e| e.subscription_id == subscription_id)
            .cloned()
            .collect();
        // newest insertion first, same as `seq DESC`
        events.reverse();
        events.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(events)
    }

    async fn is_payment_processed(&self, payment_id: &str) -> StoreResult<bool> {
        self.stall_point().await;
        Ok(self.inner.lock().payments.contains(payment_id))
    }

    async fn begin_run(
        &self,
        run_id: i64,
        trigger: RunTrigger,
        now: i64,
        lease_ms: i64,
    ) -> StoreResult<RunLease> {
        self.stall_point().await;
        let mut inner = self.inner.lock();

        for run in inner.runs.iter_mut() {
            if run.status == RunStatus::Running && run.lease_expires_at <= now {
                tracing::warn!(run_id = run.id, "Reclaimed expired reconciliation lease");
                run.status = RunStatus::Abandoned;
                run.finished_at = Some(now);
            }
        }
        if let Some(active) = inner.runs.iter().find(|r| r.status == RunStatus::Running) {
            return Ok(RunLease::Busy {
                active_run_id: active.id,
            });
        }

        let run = ReconcileRun {
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
        };
        inner.runs.push(run.clone());
        Ok(RunLease::Acquired(run))
    }

    async fn finish_run(&self, run: &ReconcileRun) -> StoreResult<()> {
        self.stall_point().await;
        let mut inner = self.inner.lock();
        let stored = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or(StoreError::NotFound)?;
        *stored = run.clone();
        Ok(())
    }

    async fn list_runs(&self, limit: i64) -> StoreResult<Vec<ReconcileRun>> {
        self.stall_point().await;
        let inner = self.inner.lock();
        let mut runs = inner.runs.clone();
        runs.reverse();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(runs)
    }

    async fn record_failures(&self, failures: &[FailedTick]) -> StoreResult<()> {
        self.stall_point().await;
        let mut inner = self.inner.lock();
        for f in failures {
            inner
                .failures
                .entry(f.subscription_id)
                .and_modify(|existing| {
                    existing.run_id = f.run_id;
                    existing.attempts += f.attempts;
                    existing.last_error = f.last_error.clone();
                    existing.failed_at = f.failed_at;
                })
                .or_insert_with(|| f.clone());
        }
        Ok(())
    }

    async fn clear_failures(&self, subscription_ids: &[i64]) -> StoreResult<()> {
        self.stall_point().await;
        let mut inner = self.inner.lock();
        for id in subscription_ids {
            inner.failures.remove(id);
        }
        Ok(())
    }

    async fn list_failed(&self) -> StoreResult<Vec<FailedTick>> {
        self.stall_point().await;
        let inner = self.inner.lock();
        let mut failed: Vec<FailedTick> = inner.failures.values().cloned().collect();
        failed.sort_by_key(|f| (f.failed_at, f.subscription_id));
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{SubscriptionEventType, SubscriptionStatus};

    const NOW: i64 = 1_760_000_000_000;

    fn event(id: i64, subscription_id: i64, at: i64) -> SubscriptionEvent {
        SubscriptionEvent {
            id,
            subscription_id,
            event_type: SubscriptionEventType::TrialStarted,
            metadata: serde_json::json!({}),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_restaurant() {
        let store = MemorySubscriptionStore::new();
        let first = store.create(&Subscription::new(1, 10, NOW)).await.unwrap();
        let second = store
            .create(&Subscription::new(2, 10, NOW + 5))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.id, 1);
    }

    #[tokio::test]
    async fn test_commit_bumps_version_and_rejects_stale() {
        let store = MemorySubscriptionStore::new();
        let sub = store.create(&Subscription::new(1, 10, NOW)).await.unwrap();

        let mut next = sub.clone();
        next.status = SubscriptionStatus::Trialing;
        let events = [event(100, 1, NOW + 1)];
        let outcome = store
            .commit(Commit {
                next: &next,
                expected_version: 0,
                events: &events,
                payment_id: None,
                now: NOW + 1,
            })
            .await
            .unwrap();
        let CommitOutcome::Committed(stored) = outcome else {
            panic!("expected commit, got {outcome:?}");
        };
        assert_eq!(stored.version, 1);
        assert_eq!(stored.updated_at, NOW + 1);

        let stale = store
            .commit(Commit {
                next: &next,
                expected_version: 0,
                events: &events,
                payment_id: None,
                now: NOW + 2,
            })
            .await
            .unwrap();
        assert_eq!(stale, CommitOutcome::VersionMismatch);
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_payment_writes_nothing() {
        let store = MemorySubscriptionStore::new();
        let sub = store.create(&Subscription::new(1, 10, NOW)).await.unwrap();

        let first = store
            .commit(Commit {
                next: &sub,
                expected_version: 0,
                events: &[],
                payment_id: Some("pay_1"),
                now: NOW,
            })
            .await
            .unwrap();
        assert!(matches!(first, CommitOutcome::Committed(_)));

        let again = store
            .commit(Commit {
                next: &sub,
                expected_version: 1,
                events: &[],
                payment_id: Some("pay_1"),
                now: NOW,
            })
            .await
            .unwrap();
        assert_eq!(again, CommitOutcome::DuplicatePayment);
        assert!(store.is_payment_processed("pay_1").await.unwrap());
        assert_eq!(store.find_by_id(1).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_run_lease_is_exclusive_until_expiry() {
        let store = MemorySubscriptionStore::new();
        let lease = store
            .begin_run(1, RunTrigger::Scheduled, NOW, 1_000)
            .await
            .unwrap();
        assert!(matches!(lease, RunLease::Acquired(_)));

        let busy = store
            .begin_run(2, RunTrigger::Manual, NOW + 10, 1_000)
            .await
            .unwrap();
        assert_eq!(busy, RunLease::Busy { active_run_id: 1 });

        let reclaimed = store
            .begin_run(3, RunTrigger::Manual, NOW + 1_000, 1_000)
            .await
            .unwrap();
        assert!(matches!(reclaimed, RunLease::Acquired(ref r) if r.id == 3));

        let runs = store.list_runs(10).await.unwrap();
        assert_eq!(runs[0].id, 3);
        assert_eq!(runs[1].status, RunStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_failures_accumulate_attempts() {
        let store = MemorySubscriptionStore::new();
        let failure = |run_id| FailedTick {
            subscription_id: 7,
            run_id,
            attempts: 1,
            last_error: format!("boom {run_id}"),
            failed_at: NOW + run_id,
        };
        store.record_failures(&[failure(1)]).await.unwrap();
        store.record_failures(&[failure(2)]).await.unwrap();

        let failed = store.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 2);
        assert_eq!(failed[0].last_error, "boom 2");

        store.clear_failures(&[7]).await.unwrap();
        assert!(store.list_failed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let store = MemorySubscriptionStore::new();
        let sub = store.create(&Subscription::new(1, 10, NOW)).await.unwrap();
        store.fail_commits(1, 1);

        let commit = Commit {
            next: &sub,
            expected_version: 0,
            events: &[],
            payment_id: None,
            now: NOW,
        };
        assert!(matches!(
            store.commit(commit).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.commit(commit).await,
            Ok(CommitOutcome::Committed(_))
        ));
    }

    #[tokio::test]
    async fn test_interleaved_write_wins_version_race() {
        let store = MemorySubscriptionStore::new();
        let sub = store.create(&Subscription::new(1, 10, NOW)).await.unwrap();
        store.interleave_commit(1, |row| row.plan = Some(shared::Plan::Pro));

        let commit = Commit {
            next: &sub,
            expected_version: 0,
            events: &[],
            payment_id: None,
            now: NOW,
        };
        assert!(matches!(
            store.commit(commit).await,
            Ok(CommitOutcome::VersionMismatch)
        ));
        let stored = store.find_by_id(1).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.plan, Some(shared::Plan::Pro));
    }

    #[tokio::test]
    async fn test_events_listed_newest_insertion_first() {
        let store = MemorySubscriptionStore::new();
        let sub = store.create(&Subscription::new(1, 10, NOW)).await.unwrap();
        // One commit, same timestamp for every event
        let events = [event(30, 1, NOW), event(10, 1, NOW), event(20, 1, NOW)];
        store
            .commit(Commit {
                next: &sub,
                expected_version: 0,
                events: &events,
                payment_id: None,
                now: NOW,
            })
            .await
            .unwrap();

        let listed: Vec<i64> = store
            .list_events(1, 10)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(listed, vec![20, 10, 30]);
    }
}
