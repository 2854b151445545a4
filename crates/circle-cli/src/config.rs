//! Client Configuration

use anyhow::{Context, Result};
use circle_core::CoreConfig;
use circle_types::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address of the ROSCA program (spender for approvals)
    pub program_address: Address,
    /// Simulated ledger block time in milliseconds
    pub block_time_ms: u64,
    /// Tokens, timer tick, flow reset delay and creation limits
    #[serde(flatten)]
    pub core: CoreConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            program_address: Address::from_low_u64(0x05ca),
            block_time_ms: 1_000,
            core: CoreConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
