use serde::{Deserialize, Serialize};

use crate::error::LtsError;

/// Tunables of a node, and of clients waiting on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many times to look for a proof before giving up.
    pub proof_attempts: usize,
    /// How long to wait between two lookups.
    pub proof_interval_ms: u64,
    /// How many passes over the nodes a protocol run may take.
    pub round_budget: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proof_attempts: 10,
            proof_interval_ms: 100,
            round_budget: 1_000,
        }
    }
}

impl Config {
    /// Parse a configuration, with missing keys taking their default value.
    pub fn from_toml(data: &str) -> Result<Self, LtsError> {
        Ok(toml::from_str(data)?)
    }
}
