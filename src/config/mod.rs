//! Configuration module for the slotmesh registry.
//!
//! Supports JSON configuration files, environment variable overrides, and
//! sensible defaults.
//!
//! # Module Structure
//!
//! - [`types`]: Root `Config` struct
//! - [`routing`]: Routing timeouts and retry budget
//! - [`registry`]: Server/proxy liveness windows
//! - [`backend`]: Backend store TTLs
//! - [`transport`]: Bus transport parameters
//! - [`logging`]: Logging configuration
//! - [`loader`]: Configuration loading functions
//! - [`validation`]: Configuration validation functions
//! - [`defaults`]: Default value functions

pub mod backend;
pub mod defaults;
pub mod loader;
pub mod logging;
pub mod registry;
pub mod routing;
pub mod transport;
pub mod types;
pub mod validation;

pub use backend::BackendConfig;
pub use loader::load;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use registry::RegistryConfig;
pub use routing::RoutingConfig;
pub use transport::TransportConfig;
pub use types::Config;
pub use validation::validate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.status_port, 3545);
        assert_eq!(config.routing.route_timeout_secs, 15);
        assert_eq!(config.routing.reservation_timeout_secs, 5);
        assert_eq!(config.routing.max_queue_wait_secs, 45);
        assert_eq!(config.routing.max_route_retries, 3);

        assert_eq!(config.registry.server_timeout_secs, 90);
        assert_eq!(config.registry.proxy_timeout_secs, 60);
        assert_eq!(config.registry.heartbeat_interval_secs, 15);

        assert_eq!(config.backend.reservation_ttl_secs, 15);
        assert_eq!(config.backend.handoff_ttl_secs, 15);

        assert_eq!(config.logging.dir, "logs");
        assert_eq!(config.logging.filename, "registry.log");
        assert_eq!(config.logging.rotation, "daily");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(config.status_port, deserialized.status_port);
        assert_eq!(
            config.routing.route_timeout_secs,
            deserialized.routing.route_timeout_secs
        );
        assert_eq!(
            config.registry.server_timeout_secs,
            deserialized.registry.server_timeout_secs
        );
        assert_eq!(
            config.transport.namespace,
            deserialized.transport.namespace
        );
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"routing": {"max_route_retries": 5}}"#).unwrap();
        assert_eq!(config.routing.max_route_retries, 5);
        assert_eq!(config.routing.route_timeout_secs, 15);
        assert_eq!(config.status_port, 3545);
    }
}
