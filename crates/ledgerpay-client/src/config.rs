//! Client configuration. Every field has a default so partial documents load.

use std::time::Duration;

use ledgerpay_types::{Drops, NetworkId};
use serde::{Deserialize, Serialize};

/// Retry behavior for retryable gateway failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            jitter_ms: 50,
        }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub network_id: NetworkId,
    pub retry_policy: RetryPolicy,
    pub poll_interval_ms: u64,
    /// How long a submission waits for validation before reporting `TimedOut`.
    pub validation_timeout_ms: u64,
    /// Upper bound on the fee the client will attach without asking.
    pub max_fee_drops: Drops,
    pub clock_recalibrate_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network_id: 0,
            retry_policy: RetryPolicy::default(),
            poll_interval_ms: 1_000,
            validation_timeout_ms: 30_000,
            max_fee_drops: 2_000_000,
            clock_recalibrate_secs: 300,
        }
    }
}

impl ClientConfig {
    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn clock_recalibrate_after(&self) -> Duration {
        Duration::from_secs(self.clock_recalibrate_secs)
    }
}
