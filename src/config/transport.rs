//! Message-bus transport configuration.

use super::defaults::{
    default_connect_timeout_secs, default_transport_host, default_transport_namespace,
    default_transport_port,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection parameters for the key/value pub-sub store backing the bus.
///
/// The in-process transport ignores the endpoint fields but keeps the
/// namespace and instance id, which become channel prefixes and envelope
/// sender ids.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_transport_host")]
    pub host: String,
    #[serde(default = "default_transport_port")]
    pub port: u16,
    /// Channel namespace shared by every process of one fabric
    #[serde(default = "default_transport_namespace")]
    pub namespace: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Identifier stamped on outgoing envelopes; generated when unset
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Resolved envelope sender id.
    pub fn resolved_instance_id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| format!("registry-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_transport_host(),
            port: default_transport_port(),
            namespace: default_transport_namespace(),
            connect_timeout_secs: default_connect_timeout_secs(),
            instance_id: None,
        }
    }
}
