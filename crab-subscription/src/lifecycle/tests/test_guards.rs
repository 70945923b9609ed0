use super::*;

fn all_intents() -> Vec<Intent> {
    vec![
        Intent::StartTrial,
        Intent::PaymentApplied {
            plan: None,
            period_days: 30,
            reference: None,
        },
        Intent::GrantDays { days: 1 },
        Intent::SetTrialDays { days: 1 },
        Intent::SetPaidDays { days: 1 },
        Intent::Suspend { reason: None },
        Intent::Unsuspend,
        Intent::Cancel {
            at_period_end: false,
        },
        Intent::Cancel {
            at_period_end: true,
        },
        Intent::Tick,
    ]
}

// ========================================================================
// Terminal states
// ========================================================================

#[test]
fn test_terminal_states_reject_everything() {
    for status in [SubscriptionStatus::Expired, SubscriptionStatus::Canceled] {
        let sub = with_status(status);
        for intent in all_intents() {
            let err = apply_err(&sub, intent, T0);
            assert_eq!(err, Rejection::Terminal(status));
            assert_eq!(err.error_code(), shared::error::ErrorCode::SubscriptionTerminal);
        }
    }
}

// ========================================================================
// Trial
// ========================================================================

#[test]
fn test_trial_cannot_start_twice() {
    let sub = trialing_since(T0);
    assert_eq!(
        apply_err(&sub, Intent::StartTrial, T0),
        Rejection::TrialAlreadyUsed
    );
}

#[test]
fn test_trial_cannot_restart_after_activation() {
    let sub = trialing_since(T0);
    let active = apply_ok(&sub, Intent::GrantDays { days: 30 }, T0 + DAY_MS).subscription;
    assert_eq!(
        apply_err(&active, Intent::StartTrial, T0 + 2 * DAY_MS),
        Rejection::TrialAlreadyUsed
    );
}

#[test]
fn test_start_trial_from_active_without_trial_is_invalid() {
    let sub = active_until(T0 + DAY_MS);
    assert_eq!(
        apply_err(&sub, Intent::StartTrial, T0),
        Rejection::InvalidTransition {
            from: SubscriptionStatus::Active,
            intent: "start_trial",
        }
    );
}

#[test]
fn test_set_trial_days_on_new_with_used_trial() {
    let mut sub = new_subscription();
    sub.trial_start_at = Some(T0 - DAY_MS);
    assert_eq!(
        apply_err(&sub, Intent::SetTrialDays { days: 5 }, T0),
        Rejection::TrialAlreadyUsed
    );
}

// ========================================================================
// Day counts
// ========================================================================

#[test]
fn test_zero_days_rejected() {
    let sub = active_until(T0 + DAY_MS);
    for intent in [
        Intent::GrantDays { days: 0 },
        Intent::SetPaidDays { days: 0 },
        Intent::PaymentApplied {
            plan: None,
            period_days: 0,
            reference: None,
        },
    ] {
        assert_eq!(apply_err(&sub, intent, T0), Rejection::InvalidDays(0));
    }
    assert_eq!(
        apply_err(&trialing_since(T0), Intent::SetTrialDays { days: 0 }, T0),
        Rejection::InvalidDays(0)
    );
}

// ========================================================================
// Suspension
// ========================================================================

#[test]
fn test_suspend_twice_rejected() {
    let sub = suspended_from(&active_until(T0 + DAY_MS), T0);
    assert_eq!(
        apply_err(&sub, Intent::Suspend { reason: None }, T0),
        Rejection::AlreadySuspended
    );
}

#[test]
fn test_unsuspend_when_not_suspended() {
    let sub = trialing_since(T0);
    assert_eq!(
        apply_err(&sub, Intent::Unsuspend, T0),
        Rejection::NotSuspended(SubscriptionStatus::Trialing)
    );
}

#[test]
fn test_suspended_rejects_mutations() {
    let sub = suspended_from(&active_until(T0 + DAY_MS), T0);
    for intent in [
        Intent::StartTrial,
        Intent::PaymentApplied {
            plan: None,
            period_days: 30,
            reference: None,
        },
        Intent::GrantDays { days: 1 },
        Intent::SetTrialDays { days: 1 },
        Intent::SetPaidDays { days: 1 },
        Intent::Cancel {
            at_period_end: false,
        },
    ] {
        assert_eq!(apply_err(&sub, intent, T0), Rejection::Suspended);
    }
}

// ========================================================================
// Cancellation
// ========================================================================

#[test]
fn test_cancel_at_period_end_requires_active() {
    for sub in [new_subscription(), trialing_since(T0), grace_until(T0, T0 + DAY_MS)] {
        let status = sub.status;
        assert_eq!(
            apply_err(
                &sub,
                Intent::Cancel {
                    at_period_end: true
                },
                T0
            ),
            Rejection::NotCancelable(status)
        );
    }
}

#[test]
fn test_rejection_codes_are_conflicts_or_validation() {
    use shared::error::ErrorCode;

    assert_eq!(
        Rejection::InvalidDays(0).error_code(),
        ErrorCode::InvalidDayCount
    );
    assert_eq!(Rejection::InvalidDays(0).error_code().http_status().as_u16(), 422);
    assert_eq!(
        Rejection::AlreadySuspended.error_code().http_status().as_u16(),
        409
    );
    assert_eq!(
        Rejection::Terminal(SubscriptionStatus::Expired)
            .error_code()
            .http_status()
            .as_u16(),
        409
    );
}
