//! Shared types for the Crab subscription service
//!
//! Domain types for the restaurant subscription lifecycle, the unified
//! error system and small utilities used by every crate in the workspace.

pub mod error;
pub mod subscription;
pub mod util;

pub use subscription::{
    DAY_MS, DaysRemaining, Plan, Subscription, SubscriptionEvent, SubscriptionEventType,
    SubscriptionStatus, SubscriptionView, days_remaining,
};
