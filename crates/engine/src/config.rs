//! Orchestrator tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::{FailurePolicy, NodeSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Lease TTL for nodes that don't set `timeout_secs`.
    pub default_lease_ttl_secs: u64,
    /// How often the background sweeper looks for expired leases.
    pub sweep_interval_ms: u64,
    /// Base delay for exponential back-off between retries; 0 retries at once.
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single back-off delay.
    pub retry_max_delay_ms: u64,
    /// Policy for runs submitted without one.
    pub default_failure_policy: FailurePolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_lease_ttl_secs: 1800,
            sweep_interval_ms: 1000,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 60_000,
            default_failure_policy: FailurePolicy::FailFast,
        }
    }
}

impl OrchestratorConfig {
    pub fn default_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.default_lease_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Back-off before the retry that follows failed attempt `attempt`
    /// (zero-indexed): `base * 2^attempt`, capped at `retry_max_delay_ms`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        if self.retry_base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .retry_base_delay_ms
            .saturating_mul(factor)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_lease_ttl_secs == 0 {
            return Err(ValidationError::InvalidConfig(
                "default_lease_ttl_secs must be greater than zero".into(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ValidationError::InvalidConfig(
                "sweep_interval_ms must be greater than zero".into(),
            ));
        }
        if self.sweep_interval() >= self.default_lease_ttl() {
            return Err(ValidationError::InvalidConfig(
                "sweep_interval_ms must be shorter than the default lease TTL".into(),
            ));
        }
        Ok(())
    }

    /// Every per-node timeout must be longer than the sweep interval.
    pub fn check_node_timeouts(&self, nodes: &[NodeSpec]) -> Result<(), ValidationError> {
        for node in nodes {
            let Some(secs) = node.timeout_secs else {
                continue;
            };
            if secs == 0 {
                return Err(ValidationError::ZeroTimeout(node.id.clone()));
            }
            if Duration::from_secs(secs) <= self.sweep_interval() {
                return Err(ValidationError::TimeoutBelowSweepInterval {
                    node_id: node.id.clone(),
                    timeout_secs: secs,
                    sweep_interval_ms: self.sweep_interval_ms,
                });
            }
        }
        Ok(())
    }
}
