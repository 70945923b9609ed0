//! Subscription command service
//!
//! Every command follows the same path:
//!
//! ```text
//! load (by restaurant / by id)
//!   → lifecycle::apply(snapshot, intent, actor, now)
//!   → store.commit(CAS on version)   ── VersionMismatch → re-read, retry
//!   → dispatch committed events to sinks
//! ```
//!
//! No subscription state is cached between calls; the store version is the
//! only concurrency control.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use shared::{
    Plan, Subscription, SubscriptionEvent, SubscriptionEventType, SubscriptionStatus,
    SubscriptionView,
};

use crate::clock::Clock;
use crate::db::{Commit, CommitOutcome, StoreError, StoreResult, SubscriptionStore};
use crate::error::{ServiceError, ServiceResult};
use crate::lifecycle::{self, Actor, Intent, LifecyclePolicy, Rejection};
use crate::sinks::EventSink;

/// Upper bound on jitter between CAS retries
const COMMIT_RETRY_JITTER_MS: u64 = 20;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub policy: LifecyclePolicy,
    pub max_commit_attempts: u32,
    pub store_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            policy: LifecyclePolicy::default(),
            max_commit_attempts: 3,
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Incoming "payment approved" signal
#[derive(Debug, Clone)]
pub struct PaymentSignal {
    pub payment_id: String,
    pub restaurant_id: i64,
    pub plan: Option<Plan>,
    /// Defaults to the policy's `default_period_days`
    pub period_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    /// Payment id was already applied; nothing changed
    pub duplicate: bool,
    pub subscription: SubscriptionView,
}

/// What a scheduler tick did to one subscription
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Transitioned(Vec<SubscriptionEventType>),
    Unchanged,
    /// Terminal or suspended by the time it was read
    Skipped(SubscriptionStatus),
    /// Deleted between listing and ticking
    Missing,
}

#[derive(Clone, Copy)]
enum Target {
    Restaurant(i64),
    Subscription(i64),
}

enum Written {
    Applied {
        subscription: Subscription,
        events: Vec<SubscriptionEvent>,
    },
    DuplicatePayment(Subscription),
}

pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn EventSink>>,
    settings: ServiceSettings,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            clock,
            sinks: Vec::new(),
            settings,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.settings.policy
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Create the NEW subscription for a restaurant (idempotent)
    pub async fn onboard(&self, restaurant_id: i64) -> ServiceResult<SubscriptionView> {
        let now = self.now();
        let fresh = Subscription::new(shared::util::snowflake_id(), restaurant_id, now);
        let stored = self.timed(self.store.create(&fresh)).await?;
        if stored.id == fresh.id {
            tracing::info!(
                restaurant_id,
                subscription_id = stored.id,
                "Subscription created"
            );
        }
        Ok(stored.view(now))
    }

    pub async fn status(&self, restaurant_id: i64) -> ServiceResult<SubscriptionView> {
        let sub = self.load(Target::Restaurant(restaurant_id)).await?;
        Ok(sub.view(self.now()))
    }

    /// Audit trail, most recent first
    pub async fn events(
        &self,
        restaurant_id: i64,
        limit: i64,
    ) -> ServiceResult<Vec<SubscriptionEvent>> {
        let sub = self.load(Target::Restaurant(restaurant_id)).await?;
        let events = self
            .timed(self.store.list_events(sub.id, limit.clamp(1, 500)))
            .await?;
        Ok(events)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub async fn start_trial(
        &self,
        restaurant_id: i64,
        actor: Actor,
    ) -> ServiceResult<SubscriptionView> {
        self.execute(restaurant_id, Intent::StartTrial, actor).await
    }

    /// Additive paid days
    pub async fn grant(
        &self,
        restaurant_id: i64,
        days: u32,
        actor: Actor,
    ) -> ServiceResult<SubscriptionView> {
        self.execute(restaurant_id, Intent::GrantDays { days }, actor)
            .await
    }

    pub async fn set_trial_days(
        &self,
        restaurant_id: i64,
        days: u32,
        actor: Actor,
    ) -> ServiceResult<SubscriptionView> {
        self.execute(restaurant_id, Intent::SetTrialDays { days }, actor)
            .await
    }

    pub async fn set_paid_days(
        &self,
        restaurant_id: i64,
        days: u32,
        actor: Actor,
    ) -> ServiceResult<SubscriptionView> {
        self.execute(restaurant_id, Intent::SetPaidDays { days }, actor)
            .await
    }

    pub async fn suspend(
        &self,
        restaurant_id: i64,
        reason: Option<String>,
        actor: Actor,
    ) -> ServiceResult<SubscriptionView> {
        if let Some(reason) = reason.as_deref() {
            tracing::info!(restaurant_id, reason, "Suspend requested");
        }
        self.execute(restaurant_id, Intent::Suspend { reason }, actor)
            .await
    }

    pub async fn unsuspend(
        &self,
        restaurant_id: i64,
        actor: Actor,
    ) -> ServiceResult<SubscriptionView> {
        self.execute(restaurant_id, Intent::Unsuspend, actor).await
    }

    pub async fn cancel(
        &self,
        restaurant_id: i64,
        at_period_end: bool,
        actor: Actor,
    ) -> ServiceResult<SubscriptionView> {
        self.execute(restaurant_id, Intent::Cancel { at_period_end }, actor)
            .await
    }

    /// Apply a payment signal exactly once per `payment_id`
    pub async fn apply_payment(&self, signal: PaymentSignal) -> ServiceResult<PaymentOutcome> {
        if signal.payment_id.trim().is_empty() {
            return Err(ServiceError::Validation("payment_id is required".into()));
        }
        let target = Target::Restaurant(signal.restaurant_id);

        if self
            .timed(self.store.is_payment_processed(&signal.payment_id))
            .await?
        {
            tracing::info!(payment_id = %signal.payment_id, "Duplicate payment signal, skipping");
            let sub = self.load(target).await?;
            return Ok(PaymentOutcome {
                duplicate: true,
                subscription: sub.view(self.now()),
            });
        }

        let intent = Intent::PaymentApplied {
            plan: signal.plan,
            period_days: signal
                .period_days
                .unwrap_or(self.settings.policy.default_period_days),
            reference: Some(signal.payment_id.clone()),
        };

        match self
            .run(target, &intent, &Actor::Payment, Some(&signal.payment_id))
            .await?
        {
            Written::Applied { subscription, .. } => Ok(PaymentOutcome {
                duplicate: false,
                subscription: subscription.view(self.now()),
            }),
            Written::DuplicatePayment(subscription) => {
                tracing::info!(payment_id = %signal.payment_id, "Payment applied concurrently, skipping");
                Ok(PaymentOutcome {
                    duplicate: true,
                    subscription: subscription.view(self.now()),
                })
            }
        }
    }

    /// Scheduler entry point: re-evaluate deadlines for one subscription
    pub async fn tick(&self, subscription_id: i64) -> ServiceResult<TickOutcome> {
        let sub = match self.load(Target::Subscription(subscription_id)).await {
            Ok(sub) => sub,
            Err(ServiceError::NotFound) => return Ok(TickOutcome::Missing),
            Err(e) => return Err(e),
        };
        if !sub.status.is_reconcilable() {
            return Ok(TickOutcome::Skipped(sub.status));
        }

        match self
            .run(
                Target::Subscription(subscription_id),
                &Intent::Tick,
                &Actor::Scheduler,
                None,
            )
            .await
        {
            Ok(Written::Applied { events, .. }) if events.is_empty() => Ok(TickOutcome::Unchanged),
            Ok(Written::Applied { events, .. }) => Ok(TickOutcome::Transitioned(
                events.iter().map(|e| e.event_type).collect(),
            )),
            Ok(Written::DuplicatePayment(_)) => Ok(TickOutcome::Unchanged),
            // Canceled by a concurrent command after our first read
            Err(ServiceError::Rejected(Rejection::Terminal(status))) => {
                Ok(TickOutcome::Skipped(status))
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Core
    // ========================================================================

    async fn execute(
        &self,
        restaurant_id: i64,
        intent: Intent,
        actor: Actor,
    ) -> ServiceResult<SubscriptionView> {
        match self
            .run(Target::Restaurant(restaurant_id), &intent, &actor, None)
            .await?
        {
            Written::Applied { subscription, .. } | Written::DuplicatePayment(subscription) => {
                Ok(subscription.view(self.now()))
            }
        }
    }

    /// load → apply → CAS commit, retried on version mismatch
    async fn run(
        &self,
        target: Target,
        intent: &Intent,
        actor: &Actor,
        payment_id: Option<&str>,
    ) -> ServiceResult<Written> {
        let max_attempts = self.settings.max_commit_attempts.max(1);

        for attempt in 1..=max_attempts {
            let current = self.load(target).await?;
            let now = self.now();

            let transition = lifecycle::apply(&current, intent, actor, now, &self.settings.policy)
                .inspect_err(|rejection| {
                    tracing::debug!(
                        subscription_id = current.id,
                        intent = intent.name(),
                        status = %current.status,
                        %rejection,
                        "Intent rejected"
                    );
                })?;

            if transition.is_noop() {
                return Ok(Written::Applied {
                    subscription: current,
                    events: Vec::new(),
                });
            }

            let events: Vec<SubscriptionEvent> = transition
                .events
                .into_iter()
                .map(|draft| SubscriptionEvent {
                    id: shared::util::snowflake_id(),
                    subscription_id: current.id,
                    event_type: draft.event_type,
                    metadata: draft.metadata,
                    created_at: now,
                })
                .collect();

            let outcome = self
                .timed(self.store.commit(Commit {
                    next: &transition.subscription,
                    expected_version: current.version,
                    events: &events,
                    payment_id,
                    now,
                }))
                .await?;

            match outcome {
                CommitOutcome::Committed(stored) => {
                    tracing::info!(
                        subscription_id = stored.id,
                        restaurant_id = stored.restaurant_id,
                        intent = intent.name(),
                        from = %current.status,
                        to = %stored.status,
                        version = stored.version,
                        events = events.len(),
                        "Subscription transition committed"
                    );
                    self.dispatch(&stored, &events).await;
                    return Ok(Written::Applied {
                        subscription: stored,
                        events,
                    });
                }
                CommitOutcome::DuplicatePayment => {
                    return Ok(Written::DuplicatePayment(current));
                }
                CommitOutcome::VersionMismatch => {
                    tracing::debug!(
                        subscription_id = current.id,
                        intent = intent.name(),
                        attempt,
                        "Version conflict, retrying"
                    );
                    if attempt < max_attempts {
                        let jitter = rand::thread_rng().gen_range(0..=COMMIT_RETRY_JITTER_MS);
                        tokio::time::sleep(Duration::from_millis(jitter)).await;
                    }
                }
            }
        }

        tracing::warn!(
            intent = intent.name(),
            attempts = max_attempts,
            "Version conflict retries exhausted"
        );
        Err(ServiceError::Conflict {
            attempts: max_attempts,
        })
    }

    async fn load(&self, target: Target) -> ServiceResult<Subscription> {
        let found = match target {
            Target::Restaurant(id) => self.timed(self.store.find_by_restaurant(id)).await?,
            Target::Subscription(id) => self.timed(self.store.find_by_id(id)).await?,
        };
        found.ok_or(ServiceError::NotFound)
    }

    /// Bound a store call by `store_timeout`
    pub async fn timed<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> ServiceResult<T> {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout.into()),
        }
    }

    async fn dispatch(&self, subscription: &Subscription, events: &[SubscriptionEvent]) {
        for sink in &self.sinks {
            if let Err(e) = sink.publish(subscription, events).await {
                tracing::warn!(
                    sink = sink.name(),
                    subscription_id = subscription.id,
                    error = %e,
                    "Event sink failed"
                );
            }
        }
    }
}
