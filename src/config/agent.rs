//! `[agent]` section: what the agent does once connected.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AgentConfig {
    /// Seconds between telemetry heartbeats.
    #[validate(range(
        min = 1,
        max = 86400,
        message = "Heartbeat interval must be between 1 second and 24 hours"
    ))]
    pub heartbeat_interval: u64,

    /// Publish `{"status":"online"}` to the state topic after every connect.
    pub report_state: bool,

    /// Inbound configuration and command messages buffered while being logged.
    #[validate(range(
        min = 1,
        max = 1024,
        message = "Inbound capacity must be between 1 and 1024"
    ))]
    pub inbound_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 60,
            report_state: true,
            inbound_capacity: 16,
        }
    }
}

impl AgentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }
}
