//! # Configuration System
//!
//! Explicit, validated configuration for the scheduler, policy layer, and
//! orchestration engine. Every component receives its configuration struct at
//! construction time — there is no process-wide mutable configuration
//! singleton and no ambient global reads.
//!
//! ## Usage
//!
//! ```rust
//! use conductor_core::config::ConductorConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults, or loaded from conductor.toml + CONDUCTOR_* env overrides
//! let config = ConductorConfig::load()?;
//! assert_eq!(config.scheduler.resolution_pool_size, 10);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, Result};

/// Root configuration for the execution engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub events: EventConfig,
}

/// Claim-queue scheduler tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Poll tick driving `claim_next`, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Interval between garbage-collection sweeps, in seconds.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Lease window: a claimed entry unresolved for longer than this is
    /// reclaimed by the next GC sweep.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
    /// Bounded pool size for dispatching entry resolution.
    #[serde(default = "default_resolution_pool_size")]
    pub resolution_pool_size: usize,
    /// Backoff applied when a policy delays an execution, in milliseconds.
    #[serde(default = "default_policy_delay_backoff_ms")]
    pub policy_delay_backoff_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_gc_interval_secs() -> u64 {
    5
}

fn default_claim_lease_secs() -> u64 {
    60
}

fn default_resolution_pool_size() -> usize {
    10
}

fn default_policy_delay_backoff_ms() -> u64 {
    500
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            gc_interval_secs: default_gc_interval_secs(),
            claim_lease_secs: default_claim_lease_secs(),
            resolution_pool_size: default_resolution_pool_size(),
            policy_delay_backoff_ms: default_policy_delay_backoff_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }

    pub fn policy_delay_backoff(&self) -> Duration {
        Duration::from_millis(self.policy_delay_backoff_ms)
    }
}

/// Status event bus tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventConfig {
    /// Broadcast channel capacity; slow subscribers past this lag see
    /// `RecvError::Lagged`, never block publishers.
    #[serde(default = "default_event_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_event_channel_capacity() -> usize {
    1000
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl ConductorConfig {
    /// Load configuration from `conductor.toml` (optional) with `CONDUCTOR_*`
    /// environment overrides, falling back to defaults for anything unset.
    ///
    /// Example override: `CONDUCTOR_SCHEDULER__POLL_INTERVAL_MS=250`.
    pub fn load() -> Result<Self> {
        Self::load_from("conductor")
    }

    /// Load configuration from an explicit file stem (no extension).
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("CONDUCTOR").separator("__"))
            .build()
            .map_err(|e| ConductorError::Configuration(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ConductorError::Configuration(e.to_string()))
    }
}
