//! Transition logic
//!
//! Every function here works on a cloned snapshot; nothing is persisted.

use serde_json::{Value, json};
use shared::{DAY_MS, Plan, Subscription, SubscriptionEventType, SubscriptionStatus};

use super::intent::{Actor, EventDraft, Intent, LifecyclePolicy, Rejection, Transition};

/// Upper bound on cascaded tick steps (ACTIVE → GRACE → EXPIRED is two)
const MAX_TICK_STEPS: usize = 4;

/// Apply `intent` to `current` at time `now`.
///
/// Never touches `version` or `updated_at`; the store owns both.
pub fn apply(
    current: &Subscription,
    intent: &Intent,
    actor: &Actor,
    now: i64,
    policy: &LifecyclePolicy,
) -> Result<Transition, Rejection> {
    if current.status.is_terminal() {
        return Err(Rejection::Terminal(current.status));
    }

    let mut step = Step::new(current, actor, now);

    match intent {
        Intent::StartTrial => step.start_trial(policy.trial_days)?,
        Intent::PaymentApplied {
            plan,
            period_days,
            reference,
        } => step.payment_applied(*plan, *period_days, reference.as_deref())?,
        Intent::GrantDays { days } => step.grant_days(*days)?,
        Intent::SetTrialDays { days } => step.set_trial_days(*days)?,
        Intent::SetPaidDays { days } => step.set_paid_days(*days)?,
        Intent::Suspend { reason } => step.suspend(reason.as_deref())?,
        Intent::Unsuspend => step.unsuspend()?,
        Intent::Cancel { at_period_end } => step.cancel(*at_period_end)?,
        Intent::Tick => step.tick(policy.grace_days),
    }

    Ok(step.finish())
}

fn days_ms(days: u32) -> i64 {
    i64::from(days) * DAY_MS
}

/// Working copy plus the events emitted so far
struct Step<'a> {
    next: Subscription,
    events: Vec<EventDraft>,
    actor: &'a Actor,
    now: i64,
}

impl<'a> Step<'a> {
    fn new(current: &Subscription, actor: &'a Actor, now: i64) -> Self {
        Self {
            next: current.clone(),
            events: Vec::new(),
            actor,
            now,
        }
    }

    fn finish(self) -> Transition {
        Transition {
            subscription: self.next,
            events: self.events,
        }
    }

    /// Record an event; `actor` is merged into the metadata object
    fn emit(&mut self, event_type: SubscriptionEventType, mut metadata: Value) {
        if let Value::Object(map) = &mut metadata {
            map.insert(
                "actor".to_string(),
                serde_json::to_value(self.actor).unwrap_or(Value::Null),
            );
        }
        self.events.push(EventDraft {
            event_type,
            metadata,
        });
    }

    fn ensure_not_suspended(&self) -> Result<(), Rejection> {
        if self.next.status == SubscriptionStatus::Suspended {
            return Err(Rejection::Suspended);
        }
        Ok(())
    }

    fn ensure_days(days: u32) -> Result<(), Rejection> {
        if days == 0 {
            return Err(Rejection::InvalidDays(days));
        }
        Ok(())
    }

    // ========================================================================
    // Trial
    // ========================================================================

    fn start_trial(&mut self, trial_days: u32) -> Result<(), Rejection> {
        self.ensure_not_suspended()?;
        if self.next.trial_used() {
            return Err(Rejection::TrialAlreadyUsed);
        }
        if self.next.status != SubscriptionStatus::New {
            return Err(Rejection::InvalidTransition {
                from: self.next.status,
                intent: "start_trial",
            });
        }
        Self::ensure_days(trial_days)?;
        self.open_trial(trial_days);
        Ok(())
    }

    fn open_trial(&mut self, trial_days: u32) {
        let end = self.now + days_ms(trial_days);
        self.next.trial_start_at = Some(self.now);
        self.next.trial_end_at = Some(end);
        self.next.status = SubscriptionStatus::Trialing;
        self.emit(
            SubscriptionEventType::TrialStarted,
            json!({ "days": trial_days, "trial_end_at": end }),
        );
    }

    fn set_trial_days(&mut self, days: u32) -> Result<(), Rejection> {
        self.ensure_not_suspended()?;
        Self::ensure_days(days)?;
        match self.next.status {
            // Outside TRIALING only the window moves; status stays
            SubscriptionStatus::Trialing | SubscriptionStatus::Active | SubscriptionStatus::Grace => {
                let previous = self.next.trial_end_at;
                let end = self.now + days_ms(days);
                self.next.trial_end_at = Some(end);
                self.emit(
                    SubscriptionEventType::PeriodExtended,
                    json!({
                        "window": "trial",
                        "mode": "set",
                        "days": days,
                        "previous_end_at": previous,
                        "trial_end_at": end,
                    }),
                );
                Ok(())
            }
            SubscriptionStatus::New if !self.next.trial_used() => {
                self.open_trial(days);
                let end = self.next.trial_end_at;
                self.emit(
                    SubscriptionEventType::PeriodExtended,
                    json!({
                        "window": "trial",
                        "mode": "set",
                        "days": days,
                        "previous_end_at": Value::Null,
                        "trial_end_at": end,
                    }),
                );
                Ok(())
            }
            SubscriptionStatus::New => Err(Rejection::TrialAlreadyUsed),
            status => Err(Rejection::InvalidTransition {
                from: status,
                intent: "set_trial_days",
            }),
        }
    }

    // ========================================================================
    // Paid period
    // ========================================================================

    /// Move to ACTIVE with a fresh period ending at `end`
    fn activate(&mut self, end: i64, source: &str, days: u32, reference: Option<&str>) {
        let from = self.next.status;
        self.next.status = SubscriptionStatus::Active;
        self.next.current_period_start_at = Some(self.now);
        self.next.current_period_end_at = Some(end);
        self.next.grace_end_at = None;
        self.emit(
            SubscriptionEventType::Activated,
            json!({
                "from": from,
                "source": source,
                "days": days,
                "reference": reference,
                "current_period_end_at": end,
            }),
        );
    }

    fn can_activate(&self) -> bool {
        matches!(
            self.next.status,
            SubscriptionStatus::New | SubscriptionStatus::Trialing | SubscriptionStatus::Grace
        )
    }

    /// max(now, current end): lapsed time is not credited back
    fn extension_base(&self) -> i64 {
        self.next
            .current_period_end_at
            .map_or(self.now, |end| end.max(self.now))
    }

    fn payment_applied(
        &mut self,
        plan: Option<Plan>,
        period_days: u32,
        reference: Option<&str>,
    ) -> Result<(), Rejection> {
        self.ensure_not_suspended()?;
        Self::ensure_days(period_days)?;
        if let Some(plan) = plan {
            self.next.plan = Some(plan);
        }

        if self.can_activate() {
            let end = self.now + days_ms(period_days);
            self.activate(end, "payment", period_days, reference);
            return Ok(());
        }

        // ACTIVE: renewal
        let previous = self.next.current_period_end_at;
        let end = self.extension_base() + days_ms(period_days);
        self.next.current_period_end_at = Some(end);
        self.emit(
            SubscriptionEventType::PeriodExtended,
            json!({
                "window": "paid",
                "mode": "payment",
                "days": period_days,
                "reference": reference,
                "previous_end_at": previous,
                "current_period_end_at": end,
            }),
        );
        Ok(())
    }

    fn grant_days(&mut self, days: u32) -> Result<(), Rejection> {
        self.ensure_not_suspended()?;
        Self::ensure_days(days)?;

        let previous = self.next.current_period_end_at;
        let end = if self.can_activate() {
            let end = self.now + days_ms(days);
            self.activate(end, "grant", days, None);
            end
        } else {
            let end = self.extension_base() + days_ms(days);
            self.next.current_period_end_at = Some(end);
            end
        };

        self.emit(
            SubscriptionEventType::PeriodExtended,
            json!({
                "window": "paid",
                "mode": "grant",
                "days": days,
                "previous_end_at": previous,
                "current_period_end_at": end,
            }),
        );
        Ok(())
    }

    fn set_paid_days(&mut self, days: u32) -> Result<(), Rejection> {
        self.ensure_not_suspended()?;
        Self::ensure_days(days)?;

        let previous = self.next.current_period_end_at;
        let end = self.now + days_ms(days);
        if self.can_activate() {
            self.activate(end, "set", days, None);
        } else {
            self.next.current_period_end_at = Some(end);
        }

        self.emit(
            SubscriptionEventType::PeriodExtended,
            json!({
                "window": "paid",
                "mode": "set",
                "days": days,
                "previous_end_at": previous,
                "current_period_end_at": end,
            }),
        );
        Ok(())
    }

    // ========================================================================
    // Suspension
    // ========================================================================

    fn suspend(&mut self, reason: Option<&str>) -> Result<(), Rejection> {
        if self.next.status == SubscriptionStatus::Suspended {
            return Err(Rejection::AlreadySuspended);
        }
        let from = self.next.status;
        self.next.pre_suspend_status = Some(from);
        self.next.suspended_at = Some(self.now);
        self.next.status = SubscriptionStatus::Suspended;
        self.emit(
            SubscriptionEventType::Suspended,
            json!({ "from": from, "reason": reason }),
        );
        Ok(())
    }

    /// Shift every deadline forward by the suspended duration and restore
    fn unsuspend(&mut self) -> Result<(), Rejection> {
        if self.next.status != SubscriptionStatus::Suspended {
            return Err(Rejection::NotSuspended(self.next.status));
        }
        let restored = self
            .next
            .pre_suspend_status
            .ok_or(Rejection::InvalidTransition {
                from: SubscriptionStatus::Suspended,
                intent: "unsuspend",
            })?;

        let suspended_at = self.next.suspended_at.unwrap_or(self.now);
        let frozen_ms = (self.now - suspended_at).max(0);
        let shift = |at: Option<i64>| at.map(|t| t + frozen_ms);

        self.next.trial_end_at = shift(self.next.trial_end_at);
        self.next.current_period_end_at = shift(self.next.current_period_end_at);
        self.next.grace_end_at = shift(self.next.grace_end_at);
        self.next.status = restored;
        self.next.pre_suspend_status = None;
        self.next.suspended_at = None;

        self.emit(
            SubscriptionEventType::Unsuspended,
            json!({ "to": restored, "frozen_ms": frozen_ms }),
        );
        Ok(())
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    fn cancel(&mut self, at_period_end: bool) -> Result<(), Rejection> {
        self.ensure_not_suspended()?;

        if at_period_end {
            if self.next.status != SubscriptionStatus::Active {
                return Err(Rejection::NotCancelable(self.next.status));
            }
            if self.next.cancel_at_period_end {
                return Ok(());
            }
            self.next.cancel_at_period_end = true;
            let end = self.next.current_period_end_at;
            self.emit(
                SubscriptionEventType::CancelScheduled,
                json!({ "current_period_end_at": end }),
            );
            return Ok(());
        }

        let from = self.next.status;
        self.next.status = SubscriptionStatus::Canceled;
        self.next.canceled_at = Some(self.now);
        self.emit(
            SubscriptionEventType::Canceled,
            json!({ "from": from, "trigger": "request" }),
        );
        Ok(())
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run deadline transitions to a fixpoint so a second tick at the same
    /// `now` changes nothing.
    fn tick(&mut self, grace_days: u32) {
        let now = self.now;
        for _ in 0..MAX_TICK_STEPS {
            let status = self.next.status;
            match status {
                SubscriptionStatus::Trialing => match self.next.trial_end_at {
                    Some(end) if now >= end => {
                        self.next.status = SubscriptionStatus::Expired;
                        self.emit(
                            SubscriptionEventType::TrialExpired,
                            json!({ "trial_end_at": end }),
                        );
                    }
                    _ => return,
                },
                SubscriptionStatus::Active => match self.next.current_period_end_at {
                    Some(end) if now >= end && self.next.cancel_at_period_end => {
                        self.next.status = SubscriptionStatus::Canceled;
                        self.next.canceled_at = Some(now);
                        self.emit(
                            SubscriptionEventType::Canceled,
                            json!({
                                "from": SubscriptionStatus::Active,
                                "trigger": "period_end",
                                "current_period_end_at": end,
                            }),
                        );
                    }
                    Some(end) if now >= end => {
                        let grace_end = end + days_ms(grace_days);
                        self.next.status = SubscriptionStatus::Grace;
                        self.next.grace_end_at = Some(grace_end);
                        self.emit(
                            SubscriptionEventType::EnteredGrace,
                            json!({
                                "current_period_end_at": end,
                                "grace_end_at": grace_end,
                            }),
                        );
                    }
                    _ => return,
                },
                SubscriptionStatus::Grace => match self.next.grace_end_at {
                    Some(grace_end) if now >= grace_end => {
                        self.next.status = SubscriptionStatus::Expired;
                        self.next.grace_end_at = None;
                        self.emit(
                            SubscriptionEventType::GraceExpired,
                            json!({ "grace_end_at": grace_end }),
                        );
                    }
                    _ => return,
                },
                // NEW has no deadline; SUSPENDED is frozen; terminal rejected above
                _ => return,
            }
        }
    }
}
