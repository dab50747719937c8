//! Schedule configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

/// Configuration shared by the registry and every itinerary log it creates
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minimum number of changes each itinerary log keeps for retransmission
    pub history_depth: usize,

    /// Capacity of the broadcast channel used by `BroadcastTransport`
    pub broadcast_capacity: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            history_depth: 256,
            broadcast_capacity: 1024,
        }
    }
}

impl ScheduleConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ScheduleConfig = serde_json::from_str(json)
            .map_err(|e| ScheduleError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScheduleError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_depth == 0 {
            return Err(ScheduleError::Config(
                "history_depth must be at least 1".to_string(),
            ));
        }
        if self.broadcast_capacity == 0 {
            return Err(ScheduleError::Config(
                "broadcast_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
