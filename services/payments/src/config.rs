use std::time::Duration;

use serde::Deserialize;

use payflow_core::config::Config;

/// Payments service configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    /// Database connection URL (PostgreSQL in production).
    pub database_url: String,
    /// TCP port to listen on. Env var: `PAYMENTS_PORT`.
    #[serde(default = "default_port")]
    pub payments_port: u16,
    /// Signing secret of the reference provider. Unset leaves the provider
    /// unconfigured; every call then fails with `NOT_CONFIGURED`.
    #[serde(default)]
    pub reference_webhook_secret: Option<String>,
    /// Delay before a simulated webhook becomes due.
    #[serde(default = "default_webhook_delay")]
    pub reference_webhook_delay_secs: u64,
    #[serde(default = "default_signature_tolerance")]
    pub webhook_signature_tolerance_secs: u64,
    #[serde(default = "default_max_retries")]
    pub webhook_max_retries: i32,
    /// Age after which an event still `received` is treated as abandoned.
    #[serde(default = "default_stale_received")]
    pub webhook_stale_received_secs: u64,
    #[serde(default = "default_intent_expiry")]
    pub intent_expiry_minutes: u64,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_delivery_interval")]
    pub webhook_delivery_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub job_batch_size: u64,
}

fn default_port() -> u16 {
    3120
}
fn default_webhook_delay() -> u64 {
    2
}
fn default_signature_tolerance() -> u64 {
    300
}
fn default_max_retries() -> i32 {
    5
}
fn default_stale_received() -> u64 {
    600
}
fn default_intent_expiry() -> u64 {
    60
}
fn default_reconcile_interval() -> u64 {
    60
}
fn default_delivery_interval() -> u64 {
    1
}
fn default_batch_size() -> u64 {
    100
}

impl Config for PaymentsConfig {}

/// Knobs the engine's use cases and jobs read at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub webhook_max_retries: i32,
    pub stale_received_after: chrono::Duration,
    pub intent_expiry: chrono::Duration,
    pub batch_size: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            webhook_max_retries: default_max_retries(),
            stale_received_after: secs(default_stale_received()),
            intent_expiry: chrono::Duration::minutes(default_intent_expiry() as i64),
            batch_size: default_batch_size(),
        }
    }
}

/// Settings for the in-memory reference provider.
#[derive(Debug, Clone)]
pub struct ReferenceProviderConfig {
    pub webhook_secret: Option<String>,
    pub webhook_delay: chrono::Duration,
    pub signature_tolerance: chrono::Duration,
}

/// Timer periods for [`crate::worker::spawn_jobs`].
#[derive(Debug, Clone, Copy)]
pub struct JobIntervals {
    pub reconcile: Duration,
    pub webhook_delivery: Duration,
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value as i64)
}

impl PaymentsConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            webhook_max_retries: self.webhook_max_retries,
            stale_received_after: secs(self.webhook_stale_received_secs),
            intent_expiry: chrono::Duration::minutes(self.intent_expiry_minutes as i64),
            batch_size: self.job_batch_size.max(1),
        }
    }

    pub fn reference_provider(&self) -> ReferenceProviderConfig {
        ReferenceProviderConfig {
            webhook_secret: self
                .reference_webhook_secret
                .clone()
                .filter(|s| !s.is_empty()),
            webhook_delay: secs(self.reference_webhook_delay_secs),
            signature_tolerance: secs(self.webhook_signature_tolerance_secs),
        }
    }

    pub fn job_intervals(&self) -> JobIntervals {
        // tokio::time::interval panics on a zero period
        JobIntervals {
            reconcile: Duration::from_secs(self.reconcile_interval_secs.max(1)),
            webhook_delivery: Duration::from_secs(self.webhook_delivery_interval_secs.max(1)),
        }
    }
}
