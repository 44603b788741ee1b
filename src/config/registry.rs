//! Server and proxy registry configuration.

use super::defaults::{
    default_eviction_sweep_interval_secs, default_heartbeat_interval_secs,
    default_proxy_timeout_secs, default_server_timeout_secs,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Liveness windows for registered servers and proxies.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryConfig {
    /// Heartbeat staleness after which a server is evicted (seconds)
    #[serde(default = "default_server_timeout_secs")]
    pub server_timeout_secs: u64,
    /// Heartbeat staleness after which a proxy is evicted (seconds)
    #[serde(default = "default_proxy_timeout_secs")]
    pub proxy_timeout_secs: u64,
    /// Interval peers are expected to heartbeat at (seconds)
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Interval for the stale-entry eviction sweep (seconds)
    #[serde(default = "default_eviction_sweep_interval_secs")]
    pub eviction_sweep_interval_secs: u64,
}

impl RegistryConfig {
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }

    pub fn eviction_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_sweep_interval_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server_timeout_secs: default_server_timeout_secs(),
            proxy_timeout_secs: default_proxy_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            eviction_sweep_interval_secs: default_eviction_sweep_interval_secs(),
        }
    }
}
