//! crab-subscription: restaurant subscription lifecycle service
//!
//! - Pure lifecycle state machine (`lifecycle`)
//! - Versioned store with compare-and-set commits (`db`)
//! - Command service with optimistic retry (`service`)
//! - Daily reconciliation sweep (`reconciler`)
//! - Owner / admin / internal HTTP API (`api`)

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod service;
pub mod sinks;
pub mod state;

pub use error::{ServiceError, ServiceResult};
pub use state::AppState;
