//! Restaurant subscription domain types
//!
//! `Subscription.status` is the only source of truth for lifecycle state.
//! The event log is an audit trail; nothing re-derives status from it.
//!
//! All timestamps are Unix milliseconds (UTC).

use serde::{Deserialize, Serialize};

/// One day in milliseconds
pub const DAY_MS: i64 = 86_400_000;

/// Remaining whole days until `end_at`, rounded up and clamped at zero.
///
/// `max(0, ceil((end_at - now) / 1 day))`, `None` → 0. Every view of a
/// countdown (owner, admin, notifications) goes through this function.
pub fn days_remaining(end_at: Option<i64>, now: i64) -> i64 {
    match end_at {
        Some(end) if end > now => {
            let diff = end - now;
            (diff + DAY_MS - 1) / DAY_MS
        }
        _ => 0,
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// Restaurant onboarded, no trial or payment yet
    New,
    /// One-time trial window running
    Trialing,
    /// Paid period running
    Active,
    /// Paid period lapsed, access continues until grace ends
    Grace,
    /// Trial or grace ran out (terminal)
    Expired,
    /// Canceled by owner/admin or at period end (terminal)
    Canceled,
    /// Frozen by an admin; countdowns do not run
    Suspended,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 7] = [
        Self::New,
        Self::Trialing,
        Self::Active,
        Self::Grace,
        Self::Expired,
        Self::Canceled,
        Self::Suspended,
    ];

    /// Parse from database string value (lowercase)
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "trialing" => Some(Self::Trialing),
            "active" => Some(Self::Active),
            "grace" => Some(Self::Grace),
            "expired" => Some(Self::Expired),
            "canceled" => Some(Self::Canceled),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }

    /// Database string representation (lowercase)
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::Grace => "grace",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
            Self::Suspended => "suspended",
        }
    }

    /// EXPIRED and CANCELED accept no further intents
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Canceled)
    }

    /// Statuses the reconciliation sweep ticks
    pub fn is_reconcilable(&self) -> bool {
        !self.is_terminal() && *self != Self::Suspended
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    Basic,
    Pro,
}

impl Plan {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(Self::Basic),
            "pro" => Some(Self::Pro),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
        }
    }
}

/// Subscription event type (one per state change)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionEventType {
    TrialStarted,
    TrialExpired,
    Activated,
    EnteredGrace,
    GraceExpired,
    Suspended,
    Unsuspended,
    Canceled,
    CancelScheduled,
    PeriodExtended,
}

impl SubscriptionEventType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "TRIAL_STARTED" => Some(Self::TrialStarted),
            "TRIAL_EXPIRED" => Some(Self::TrialExpired),
            "ACTIVATED" => Some(Self::Activated),
            "ENTERED_GRACE" => Some(Self::EnteredGrace),
            "GRACE_EXPIRED" => Some(Self::GraceExpired),
            "SUSPENDED" => Some(Self::Suspended),
            "UNSUSPENDED" => Some(Self::Unsuspended),
            "CANCELED" => Some(Self::Canceled),
            "CANCEL_SCHEDULED" => Some(Self::CancelScheduled),
            "PERIOD_EXTENDED" => Some(Self::PeriodExtended),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::TrialStarted => "TRIAL_STARTED",
            Self::TrialExpired => "TRIAL_EXPIRED",
            Self::Activated => "ACTIVATED",
            Self::EnteredGrace => "ENTERED_GRACE",
            Self::GraceExpired => "GRACE_EXPIRED",
            Self::Suspended => "SUSPENDED",
            Self::Unsuspended => "UNSUSPENDED",
            Self::Canceled => "CANCELED",
            Self::CancelScheduled => "CANCEL_SCHEDULED",
            Self::PeriodExtended => "PERIOD_EXTENDED",
        }
    }

    /// Events the notification trigger cares about
    pub fn is_notifiable(&self) -> bool {
        matches!(
            self,
            Self::Suspended
                | Self::EnteredGrace
                | Self::TrialExpired
                | Self::GraceExpired
                | Self::Activated
        )
    }
}

impl std::fmt::Display for SubscriptionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Subscription record (one per restaurant)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub restaurant_id: i64,
    pub plan: Option<Plan>,
    pub status: SubscriptionStatus,
    /// Never cleared once set: durable "trial has been used" flag
    pub trial_start_at: Option<i64>,
    pub trial_end_at: Option<i64>,
    pub current_period_start_at: Option<i64>,
    pub current_period_end_at: Option<i64>,
    /// Only set while in GRACE
    pub grace_end_at: Option<i64>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    /// Status to restore on unsuspend
    pub pre_suspend_status: Option<SubscriptionStatus>,
    /// Only set while SUSPENDED
    pub suspended_at: Option<i64>,
    /// Optimistic concurrency version, bumped by the store on every commit
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    /// Fresh subscription for a newly onboarded restaurant
    pub fn new(id: i64, restaurant_id: i64, now: i64) -> Self {
        Self {
            id,
            restaurant_id,
            plan: None,
            status: SubscriptionStatus::New,
            trial_start_at: None,
            trial_end_at: None,
            current_period_start_at: None,
            current_period_end_at: None,
            grace_end_at: None,
            cancel_at_period_end: false,
            canceled_at: None,
            pre_suspend_status: None,
            suspended_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Has the one-time trial been consumed?
    pub fn trial_used(&self) -> bool {
        self.trial_start_at.is_some()
    }

    /// Remaining day counts as of `now`.
    ///
    /// While suspended the clock is frozen at `suspended_at`, so the counts
    /// shown are the ones captured at suspension.
    pub fn days_remaining(&self, now: i64) -> DaysRemaining {
        let at = match (self.status, self.suspended_at) {
            (SubscriptionStatus::Suspended, Some(suspended_at)) => suspended_at.min(now),
            _ => now,
        };
        DaysRemaining {
            trial_days_remaining: days_remaining(self.trial_end_at, at),
            paid_days_remaining: days_remaining(self.current_period_end_at, at),
            grace_days_remaining: days_remaining(self.grace_end_at, at),
        }
    }

    /// Read model: record plus computed countdowns
    pub fn view(&self, now: i64) -> SubscriptionView {
        SubscriptionView {
            subscription: self.clone(),
            days: self.days_remaining(now),
        }
    }
}

/// Computed, never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaysRemaining {
    pub trial_days_remaining: i64,
    pub paid_days_remaining: i64,
    pub grace_days_remaining: i64,
}

/// `GET status` response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,
    #[serde(flatten)]
    pub days: DaysRemaining,
}

/// Append-only subscription event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub id: i64,
    pub subscription_id: i64,
    pub event_type: SubscriptionEventType,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_760_000_000_000;

    #[test]
    fn test_days_remaining_rounds_up() {
        assert_eq!(days_remaining(Some(T0 + 1), T0), 1);
        assert_eq!(days_remaining(Some(T0 + DAY_MS), T0), 1);
        assert_eq!(days_remaining(Some(T0 + DAY_MS + 1), T0), 2);
        assert_eq!(days_remaining(Some(T0 + 14 * DAY_MS), T0), 14);
    }

    #[test]
    fn test_days_remaining_clamps_to_zero() {
        assert_eq!(days_remaining(Some(T0), T0), 0);
        assert_eq!(days_remaining(Some(T0 - 5 * DAY_MS), T0), 0);
        assert_eq!(days_remaining(None, T0), 0);
    }

    #[test]
    fn test_status_db_roundtrip() {
        for status in SubscriptionStatus::ALL {
            assert_eq!(SubscriptionStatus::from_db(status.as_db()), Some(status));
        }
        assert_eq!(SubscriptionStatus::from_db("paused"), None);
    }

    #[test]
    fn test_status_classification() {
        assert!(SubscriptionStatus::Expired.is_terminal());
        assert!(SubscriptionStatus::Canceled.is_terminal());
        assert!(!SubscriptionStatus::Suspended.is_terminal());
        assert!(!SubscriptionStatus::Suspended.is_reconcilable());
        assert!(SubscriptionStatus::Grace.is_reconcilable());
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&SubscriptionEventType::EnteredGrace).unwrap();
        assert_eq!(json, "\"ENTERED_GRACE\"");
        assert_eq!(
            SubscriptionEventType::from_db("PERIOD_EXTENDED"),
            Some(SubscriptionEventType::PeriodExtended)
        );
        assert!(SubscriptionEventType::GraceExpired.is_notifiable());
        assert!(!SubscriptionEventType::PeriodExtended.is_notifiable());
    }

    #[test]
    fn test_days_frozen_while_suspended() {
        let mut sub = Subscription::new(1, 10, T0);
        sub.status = SubscriptionStatus::Suspended;
        sub.pre_suspend_status = Some(SubscriptionStatus::Active);
        sub.current_period_end_at = Some(T0 + 10 * DAY_MS);
        sub.suspended_at = Some(T0 + 2 * DAY_MS);

        let days = sub.days_remaining(T0 + 9 * DAY_MS);
        assert_eq!(days.paid_days_remaining, 8);
    }

    #[test]
    fn test_view_serializes_flat() {
        let mut sub = Subscription::new(1, 10, T0);
        sub.status = SubscriptionStatus::Trialing;
        sub.trial_start_at = Some(T0);
        sub.trial_end_at = Some(T0 + 14 * DAY_MS);

        let json = serde_json::to_value(sub.view(T0)).unwrap();
        assert_eq!(json["status"], "TRIALING");
        assert_eq!(json["trial_days_remaining"], 14);
        assert_eq!(json["restaurant_id"], 10);
    }
}
