//! Routing service configuration.

use super::defaults::{
    default_max_queue_wait_secs, default_max_route_retries, default_queue_sweep_interval_secs,
    default_reservation_timeout_secs, default_route_timeout_secs,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and retry budget for the player routing service.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoutingConfig {
    /// How long a dispatched route may stay unacknowledged (seconds)
    #[serde(default = "default_route_timeout_secs")]
    pub route_timeout_secs: u64,
    /// How long a reservation request may await its response (seconds)
    #[serde(default = "default_reservation_timeout_secs")]
    pub reservation_timeout_secs: u64,
    /// Maximum total wall-time a request may spend queued (seconds)
    #[serde(default = "default_max_queue_wait_secs")]
    pub max_queue_wait_secs: u64,
    /// Maximum re-dispatch attempts before the player is disconnected
    #[serde(default = "default_max_route_retries")]
    pub max_route_retries: u32,
    /// Interval for the queue-expiry sweep (seconds)
    #[serde(default = "default_queue_sweep_interval_secs")]
    pub queue_sweep_interval_secs: u64,
}

impl RoutingConfig {
    pub fn route_timeout(&self) -> Duration {
        Duration::from_secs(self.route_timeout_secs)
    }

    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_secs(self.reservation_timeout_secs)
    }

    pub fn max_queue_wait(&self) -> Duration {
        Duration::from_secs(self.max_queue_wait_secs)
    }

    pub fn queue_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.queue_sweep_interval_secs)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            route_timeout_secs: default_route_timeout_secs(),
            reservation_timeout_secs: default_reservation_timeout_secs(),
            max_queue_wait_secs: default_max_queue_wait_secs(),
            max_route_retries: default_max_route_retries(),
            queue_sweep_interval_secs: default_queue_sweep_interval_secs(),
        }
    }
}
