//! Orchestration-layer configuration

use circle_types::{CircleLimits, TokenRegistry};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by the aggregator, timers and flow orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// Known payment tokens
    pub tokens: TokenRegistry,
    /// Round timer tick in milliseconds
    pub timer_tick_ms: u64,
    /// Delay before a completed or failed flow returns to idle
    pub flow_reset_delay_ms: u64,
    /// Limits checked before `createCircle` is submitted
    pub limits: CircleLimits,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tokens: TokenRegistry::default(),
            timer_tick_ms: 1_000,
            flow_reset_delay_ms: 3_000,
            limits: CircleLimits::default(),
        }
    }
}

impl CoreConfig {
    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms.max(1))
    }

    pub fn flow_reset_delay(&self) -> Duration {
        Duration::from_millis(self.flow_reset_delay_ms)
    }
}
