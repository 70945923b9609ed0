//! Intents, actors, rejections and transition results

use serde::{Deserialize, Serialize};
use shared::error::ErrorCode;
use shared::{Plan, Subscription, SubscriptionEventType, SubscriptionStatus};
use thiserror::Error;

/// Requested change to a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    StartTrial,
    /// External "payment approved" signal
    PaymentApplied {
        plan: Option<Plan>,
        period_days: u32,
        reference: Option<String>,
    },
    /// Additive paid days
    GrantDays { days: u32 },
    /// Absolute remaining trial days
    SetTrialDays { days: u32 },
    /// Absolute remaining paid days
    SetPaidDays { days: u32 },
    Suspend { reason: Option<String> },
    Unsuspend,
    Cancel { at_period_end: bool },
    /// Scheduler re-evaluation against `now`
    Tick,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartTrial => "start_trial",
            Self::PaymentApplied { .. } => "payment_applied",
            Self::GrantDays { .. } => "grant_days",
            Self::SetTrialDays { .. } => "set_trial_days",
            Self::SetPaidDays { .. } => "set_paid_days",
            Self::Suspend { .. } => "suspend",
            Self::Unsuspend => "unsuspend",
            Self::Cancel { .. } => "cancel",
            Self::Tick => "tick",
        }
    }
}

/// Who issued the intent (recorded in event metadata only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    Owner { user_id: Option<String> },
    Admin { admin_id: String },
    Payment,
    Scheduler,
}

/// Tunable windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub trial_days: u32,
    pub grace_days: u32,
    /// Paid days credited by a payment that does not say otherwise
    pub default_period_days: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            trial_days: 14,
            grace_days: 7,
            default_period_days: 30,
        }
    }
}

/// Why an intent was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("terminal state: subscription is {0}")]
    Terminal(SubscriptionStatus),

    #[error("trial already used")]
    TrialAlreadyUsed,

    #[error("subscription is suspended")]
    Suspended,

    #[error("subscription is not suspended (status: {0})")]
    NotSuspended(SubscriptionStatus),

    #[error("subscription is already suspended")]
    AlreadySuspended,

    #[error("cancel at period end requires an active period (status: {0})")]
    NotCancelable(SubscriptionStatus),

    #[error("invalid day count: {0}")]
    InvalidDays(u32),

    #[error("{intent} is not allowed from {from}")]
    InvalidTransition {
        from: SubscriptionStatus,
        intent: &'static str,
    },
}

impl Rejection {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Terminal(_) => ErrorCode::SubscriptionTerminal,
            Self::TrialAlreadyUsed => ErrorCode::TrialAlreadyUsed,
            Self::Suspended => ErrorCode::SubscriptionSuspended,
            Self::NotSuspended(_) => ErrorCode::SubscriptionNotSuspended,
            Self::AlreadySuspended => ErrorCode::SubscriptionAlreadySuspended,
            Self::NotCancelable(_) => ErrorCode::SubscriptionNotCancelable,
            Self::InvalidDays(_) => ErrorCode::InvalidDayCount,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
        }
    }
}

/// Event produced by `apply`, not yet persisted (no id, no timestamp)
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: SubscriptionEventType,
    pub metadata: serde_json::Value,
}

/// Result of an accepted intent
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub subscription: Subscription,
    pub events: Vec<EventDraft>,
}

impl Transition {
    /// Nothing changed (e.g. a tick before any deadline); skip the commit
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event_types(&self) -> Vec<SubscriptionEventType> {
        self.events.iter().map(|e| e.event_type).collect()
    }
}
