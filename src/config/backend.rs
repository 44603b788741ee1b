//! Backend-side store configuration.

use super::defaults::{
    default_handoff_ttl_secs, default_reservation_ttl_secs, default_store_cleanup_interval_secs,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TTLs for the reservation and handoff stores.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackendConfig {
    /// Lifetime of an unconsumed reservation token (seconds)
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,
    /// Lifetime of a handoff record awaiting the player's join (seconds)
    #[serde(default = "default_handoff_ttl_secs")]
    pub handoff_ttl_secs: u64,
    /// Interval for expired-record sweeps (seconds)
    #[serde(default = "default_store_cleanup_interval_secs")]
    pub store_cleanup_interval_secs: u64,
}

impl BackendConfig {
    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }

    pub fn handoff_ttl(&self) -> Duration {
        Duration::from_secs(self.handoff_ttl_secs)
    }

    pub fn store_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.store_cleanup_interval_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: default_reservation_ttl_secs(),
            handoff_ttl_secs: default_handoff_ttl_secs(),
            store_cleanup_interval_secs: default_store_cleanup_interval_secs(),
        }
    }
}
