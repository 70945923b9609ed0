use super::*;
use shared::{DAY_MS, Subscription, SubscriptionEventType, SubscriptionStatus};

/// 2025-10-09T09:06:40Z
const T0: i64 = 1_760_000_800_000;

fn policy() -> LifecyclePolicy {
    LifecyclePolicy::default()
}

fn admin() -> Actor {
    Actor::Admin {
        admin_id: "admin-1".to_string(),
    }
}

fn new_subscription() -> Subscription {
    Subscription::new(1, 100, T0)
}

fn apply_ok(sub: &Subscription, intent: Intent, now: i64) -> Transition {
    match apply(sub, &intent, &admin(), now, &policy()) {
        Ok(t) => t,
        Err(e) => panic!("{} rejected from {}: {e}", intent.name(), sub.status),
    }
}

fn apply_err(sub: &Subscription, intent: Intent, now: i64) -> Rejection {
    match apply(sub, &intent, &admin(), now, &policy()) {
        Ok(t) => panic!(
            "{} unexpectedly accepted from {} (events: {:?})",
            intent.name(),
            sub.status,
            t.event_types()
        ),
        Err(e) => e,
    }
}

// ========================================================================
// Helper: snapshots in each status
// ========================================================================

fn trialing_since(start: i64) -> Subscription {
    apply_ok(&new_subscription(), Intent::StartTrial, start).subscription
}

fn active_until(period_end: i64) -> Subscription {
    let mut sub = new_subscription();
    sub.status = SubscriptionStatus::Active;
    sub.current_period_start_at = Some(period_end - 30 * DAY_MS);
    sub.current_period_end_at = Some(period_end);
    sub
}

fn grace_until(period_end: i64, grace_end: i64) -> Subscription {
    let mut sub = active_until(period_end);
    sub.status = SubscriptionStatus::Grace;
    sub.grace_end_at = Some(grace_end);
    sub
}

fn with_status(status: SubscriptionStatus) -> Subscription {
    let mut sub = new_subscription();
    sub.status = status;
    sub
}

fn suspended_from(sub: &Subscription, at: i64) -> Subscription {
    apply_ok(sub, Intent::Suspend { reason: None }, at).subscription
}

mod test_guards;
mod test_scenarios;
