//! Service configuration (environment variables)

use std::str::FromStr;
use std::time::Duration;

use crate::lifecycle::LifecyclePolicy;
use crate::reconciler::ReconcilerSettings;
use crate::service::ServiceSettings;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Connections beyond the reconciler's share, for HTTP traffic
const POOL_HEADROOM: u32 = 8;

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    pub http_port: u16,
    /// Environment: development | staging | production
    pub environment: String,
    pub trial_days: u32,
    pub grace_days: u32,
    /// Paid days credited by a payment signal without `period_days`
    pub default_period_days: u32,
    pub reconcile_interval_secs: u64,
    pub reconcile_concurrency: usize,
    pub reconcile_lease_secs: u64,
    pub max_commit_attempts: u32,
    pub max_tick_attempts: u32,
    pub store_timeout_ms: u64,
}

/// Parse an optional env var; unset or empty → `default`, malformed → error
fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, BoxError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|_| format!("{name} has an invalid value: {v}").into()),
        _ => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let config = Self {
            database_url: std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?,
            http_port: env_or("HTTP_PORT", 8080)?,
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            trial_days: env_or("TRIAL_DAYS", 14)?,
            grace_days: env_or("GRACE_DAYS", 7)?,
            default_period_days: env_or("DEFAULT_PERIOD_DAYS", 30)?,
            reconcile_interval_secs: env_or("RECONCILE_INTERVAL_SECS", 86_400)?,
            reconcile_concurrency: env_or("RECONCILE_CONCURRENCY", 8)?,
            reconcile_lease_secs: env_or("RECONCILE_LEASE_SECS", 3_600)?,
            max_commit_attempts: env_or("MAX_COMMIT_ATTEMPTS", 3)?,
            max_tick_attempts: env_or("MAX_TICK_ATTEMPTS", 3)?,
            store_timeout_ms: env_or("STORE_TIMEOUT_MS", 5_000)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), BoxError> {
        if self.trial_days == 0 || self.default_period_days == 0 {
            return Err("TRIAL_DAYS and DEFAULT_PERIOD_DAYS must be positive".into());
        }
        if self.reconcile_concurrency == 0 {
            return Err("RECONCILE_CONCURRENCY must be positive".into());
        }
        if self.reconcile_interval_secs == 0 {
            return Err("RECONCILE_INTERVAL_SECS must be positive".into());
        }
        Ok(())
    }

    pub fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            trial_days: self.trial_days,
            grace_days: self.grace_days,
            default_period_days: self.default_period_days,
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            policy: self.policy(),
            max_commit_attempts: self.max_commit_attempts,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }

    /// Pool size: one connection per concurrent tick plus HTTP headroom
    pub fn max_db_connections(&self) -> u32 {
        u32::try_from(self.reconcile_concurrency)
            .unwrap_or(u32::MAX)
            .saturating_add(POOL_HEADROOM)
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            interval: Duration::from_secs(self.reconcile_interval_secs),
            concurrency: self.reconcile_concurrency,
            lease: Duration::from_secs(self.reconcile_lease_secs),
            max_tick_attempts: self.max_tick_attempts,
            ..Default::default()
        }
    }
}
