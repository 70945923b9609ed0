//! Subscription lifecycle state machine
//!
//! # Architecture
//!
//! ```text
//! owner / admin / payment / scheduler
//!   └─ Intent ──→ apply(snapshot, intent, actor, now, policy)
//!                    ├─ Ok(Transition { subscription, events })
//!                    └─ Err(Rejection)
//! ```
//!
//! `apply` is pure: no I/O, no clock reads, no version bookkeeping. The
//! caller reads the snapshot, applies, and commits the result through the
//! store's version check.
//!
//! # States
//!
//! ```text
//! NEW ──start-trial──→ TRIALING ──tick──→ EXPIRED
//!  │                      │
//!  └──payment/grant──→ ACTIVE ←──payment/grant── GRACE ──tick──→ EXPIRED
//!                         └────────tick─────────→ ┘
//!                         └──tick (cancel at period end)──→ CANCELED
//!
//! any non-terminal ──suspend──→ SUSPENDED ──unsuspend──→ previous status
//! ```

pub mod intent;
pub mod machine;

pub use intent::{Actor, EventDraft, Intent, LifecyclePolicy, Rejection, Transition};
pub use machine::apply;

#[cfg(test)]
mod tests;
