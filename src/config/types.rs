//! Root configuration type.

use super::backend::BackendConfig;
use super::defaults::default_status_port;
use super::logging::LoggingConfig;
use super::registry::RegistryConfig;
use super::routing::RoutingConfig;
use super::transport::TransportConfig;
use serde::{Deserialize, Serialize};

/// Root configuration loaded at startup.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// TCP port of the read-only status endpoint
    #[serde(default = "default_status_port")]
    pub status_port: u16,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_port: default_status_port(),
            routing: RoutingConfig::default(),
            registry: RegistryConfig::default(),
            backend: BackendConfig::default(),
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
