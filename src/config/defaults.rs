//! Default value functions referenced from `#[serde(default = ...)]`.

use super::logging::LogFormat;

// Status endpoint
pub fn default_status_port() -> u16 {
    3545
}

// Routing
pub fn default_route_timeout_secs() -> u64 {
    15
}

pub fn default_reservation_timeout_secs() -> u64 {
    5
}

pub fn default_max_queue_wait_secs() -> u64 {
    45
}

pub fn default_max_route_retries() -> u32 {
    3
}

pub fn default_queue_sweep_interval_secs() -> u64 {
    1
}

// Registry
pub fn default_server_timeout_secs() -> u64 {
    90
}

pub fn default_proxy_timeout_secs() -> u64 {
    60
}

pub fn default_heartbeat_interval_secs() -> u64 {
    15
}

pub fn default_eviction_sweep_interval_secs() -> u64 {
    10
}

// Backend stores
pub fn default_reservation_ttl_secs() -> u64 {
    15
}

pub fn default_handoff_ttl_secs() -> u64 {
    15
}

pub fn default_store_cleanup_interval_secs() -> u64 {
    5
}

// Transport
pub fn default_transport_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_transport_port() -> u16 {
    6379
}

pub fn default_transport_namespace() -> String {
    "slotmesh".to_string()
}

pub fn default_connect_timeout_secs() -> u64 {
    5
}

// Logging
pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "registry.log".to_string()
}

pub fn default_rotation() -> String {
    "daily".to_string()
}

pub fn default_enable_file_logging() -> bool {
    false
}

pub fn default_log_format() -> LogFormat {
    LogFormat::Text
}
