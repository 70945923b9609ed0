use super::*;

#[test]
fn test_fourteen_day_trial_then_expiry() {
    let started = apply_ok(&new_subscription(), Intent::StartTrial, T0);
    assert_eq!(started.subscription.status, SubscriptionStatus::Trialing);
    assert_eq!(started.subscription.trial_end_at, Some(T0 + 14 * DAY_MS));
    assert_eq!(started.events.len(), 1);
    assert_eq!(
        started.subscription.days_remaining(T0).trial_days_remaining,
        14
    );

    let now = T0 + 15 * DAY_MS;
    let expired = apply_ok(&started.subscription, Intent::Tick, now);
    assert_eq!(expired.subscription.status, SubscriptionStatus::Expired);
    assert_eq!(
        expired.event_types(),
        vec![SubscriptionEventType::TrialExpired]
    );
    assert_eq!(
        expired.subscription.days_remaining(now).trial_days_remaining,
        0
    );
}

#[test]
fn test_active_lapses_into_grace_one_second_late() {
    let t1 = T0 + 30 * DAY_MS;
    let sub = active_until(t1);

    let t = apply_ok(&sub, Intent::Tick, t1 + 1_000);

    assert_eq!(t.subscription.status, SubscriptionStatus::Grace);
    assert_eq!(t.subscription.grace_end_at, Some(t1 + 7 * DAY_MS));
    // 7d minus one second rounds up to 7
    assert_eq!(
        t.subscription.days_remaining(t1 + 1_000).grace_days_remaining,
        7
    );
}

#[test]
fn test_suspend_five_days_shifts_period() {
    let t2 = T0 + 10 * DAY_MS;
    let sub = active_until(T0 + 30 * DAY_MS);
    let before_end = sub.current_period_end_at;
    let paid_before = sub.days_remaining(t2).paid_days_remaining;

    let suspended = apply_ok(
        &sub,
        Intent::Suspend {
            reason: Some("payment dispute".to_string()),
        },
        t2,
    )
    .subscription;

    // countdown frozen while suspended
    assert_eq!(
        suspended
            .days_remaining(t2 + 3 * DAY_MS)
            .paid_days_remaining,
        paid_before
    );

    let resumed = apply_ok(&suspended, Intent::Unsuspend, t2 + 5 * DAY_MS).subscription;

    assert_eq!(resumed.status, SubscriptionStatus::Active);
    assert_eq!(
        resumed.current_period_end_at,
        before_end.map(|end| end + 5 * DAY_MS)
    );
    assert_eq!(
        resumed.days_remaining(t2 + 5 * DAY_MS).paid_days_remaining,
        paid_before
    );
}

#[test]
fn test_grace_suspended_then_resumed_keeps_grace_remaining() {
    let t1 = T0 + 30 * DAY_MS;
    let sub = grace_until(t1, t1 + 7 * DAY_MS);
    let at = t1 + 2 * DAY_MS;

    let suspended = suspended_from(&sub, at);
    let resumed = apply_ok(&suspended, Intent::Unsuspend, at + 20 * DAY_MS).subscription;

    assert_eq!(resumed.status, SubscriptionStatus::Grace);
    assert_eq!(
        resumed
            .days_remaining(at + 20 * DAY_MS)
            .grace_days_remaining,
        5
    );
    // not yet lapsed: tick right after resume does nothing
    assert!(apply_ok(&resumed, Intent::Tick, at + 20 * DAY_MS).is_noop());
}

#[test]
fn test_full_paid_lifecycle() {
    let trial = trialing_since(T0);
    let paid_at = T0 + 5 * DAY_MS;
    let active = apply_ok(
        &trial,
        Intent::PaymentApplied {
            plan: Some(shared::Plan::Basic),
            period_days: 30,
            reference: Some("pay_a".to_string()),
        },
        paid_at,
    )
    .subscription;

    let scheduled = apply_ok(
        &active,
        Intent::Cancel {
            at_period_end: true,
        },
        paid_at + DAY_MS,
    )
    .subscription;

    // still ACTIVE until the period actually ends
    let mid = apply_ok(&scheduled, Intent::Tick, paid_at + 29 * DAY_MS);
    assert!(mid.is_noop());

    let end = apply_ok(&scheduled, Intent::Tick, paid_at + 30 * DAY_MS);
    assert_eq!(end.subscription.status, SubscriptionStatus::Canceled);
    assert_eq!(end.subscription.trial_start_at, Some(T0));
}

#[test]
fn test_owner_actor_recorded_in_metadata() {
    let owner = Actor::Owner {
        user_id: Some("u-7".to_string()),
    };
    let t = apply(
        &new_subscription(),
        &Intent::StartTrial,
        &owner,
        T0,
        &policy(),
    )
    .unwrap();

    assert_eq!(t.events[0].metadata["actor"]["kind"], "owner");
    assert_eq!(t.events[0].metadata["actor"]["user_id"], "u-7");
}

#[test]
fn test_custom_policy_windows() {
    let policy = LifecyclePolicy {
        trial_days: 30,
        grace_days: 3,
        default_period_days: 30,
    };
    let trial = apply(
        &new_subscription(),
        &Intent::StartTrial,
        &Actor::Scheduler,
        T0,
        &policy,
    )
    .unwrap();
    assert_eq!(trial.subscription.trial_end_at, Some(T0 + 30 * DAY_MS));

    let t1 = T0 + DAY_MS;
    let grace = apply(&active_until(t1), &Intent::Tick, &Actor::Scheduler, t1, &policy).unwrap();
    assert_eq!(grace.subscription.grace_end_at, Some(t1 + 3 * DAY_MS));
}
