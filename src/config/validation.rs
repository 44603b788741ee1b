//! Configuration validation.

use super::Config;

/// Validate cross-field constraints. Returns a human-readable list of
/// problems when the configuration cannot be run with.
pub fn validate(config: &Config) -> Result<(), String> {
    let mut problems = Vec::new();

    if config.status_port == 0 {
        problems.push("status_port must be a valid TCP port".to_string());
    }

    let routing = &config.routing;
    if routing.route_timeout_secs == 0 {
        problems.push("routing.route_timeout_secs must be positive".to_string());
    }
    if routing.reservation_timeout_secs == 0 {
        problems.push("routing.reservation_timeout_secs must be positive".to_string());
    }
    if routing.max_queue_wait_secs == 0 {
        problems.push("routing.max_queue_wait_secs must be positive".to_string());
    }
    if routing.reservation_timeout_secs >= routing.route_timeout_secs {
        problems.push(
            "routing.reservation_timeout_secs must be below routing.route_timeout_secs"
                .to_string(),
        );
    }
    if routing.queue_sweep_interval_secs == 0 {
        problems.push("routing.queue_sweep_interval_secs must be positive".to_string());
    }

    let registry = &config.registry;
    if registry.server_timeout_secs <= registry.heartbeat_interval_secs {
        problems.push(
            "registry.server_timeout_secs must exceed registry.heartbeat_interval_secs"
                .to_string(),
        );
    }
    if registry.proxy_timeout_secs <= registry.heartbeat_interval_secs {
        problems.push(
            "registry.proxy_timeout_secs must exceed registry.heartbeat_interval_secs".to_string(),
        );
    }
    if registry.eviction_sweep_interval_secs == 0 {
        problems.push("registry.eviction_sweep_interval_secs must be positive".to_string());
    }

    let backend = &config.backend;
    if backend.reservation_ttl_secs == 0 {
        problems.push("backend.reservation_ttl_secs must be positive".to_string());
    }
    if backend.handoff_ttl_secs == 0 {
        problems.push("backend.handoff_ttl_secs must be positive".to_string());
    }

    if config.transport.namespace.trim().is_empty() {
        problems.push("transport.namespace cannot be blank".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("\n"))
    }
}
