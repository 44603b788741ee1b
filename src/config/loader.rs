//! Configuration loading and environment parsing.

use super::validation::validate;
use super::Config;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load configuration with the following precedence (highest first):
/// 1) `SLOTMESH_CONFIG_JSON` env var containing raw JSON
/// 2) File pointed at by `SLOTMESH_CONFIG_PATH`, or the explicit `path` argument
/// 3) config.json in the current working directory
/// 4) Defaults compiled into the binary
///
/// Individual fields can additionally be overridden by environment variables
/// prefixed with `SLOTMESH` and nested with `__`, e.g.
/// `SLOTMESH__ROUTING__MAX_ROUTE_RETRIES=5`.
///
/// Parse errors are printed to stderr and the affected source is skipped;
/// `load` always returns a usable `Config`. Callers who need hard failure run
/// [`validate`] themselves.
#[must_use]
pub fn load(path: Option<&Path>) -> Config {
    let defaults = Config::default();
    let mut merged =
        serde_json::to_value(&defaults).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

    if let Ok(json) = std::env::var("SLOTMESH_CONFIG_JSON") {
        if let Some(value) = parse_json_document(&json, "SLOTMESH_CONFIG_JSON") {
            merge_values(&mut merged, value);
        }
    }

    if let Ok(env_path) = std::env::var("SLOTMESH_CONFIG_PATH") {
        merge_file_source(&mut merged, Path::new(&env_path));
    }
    if let Some(path) = path {
        merge_file_source(&mut merged, path);
    }

    merge_file_source(&mut merged, Path::new("config.json"));

    apply_env_overrides(&mut merged);

    let config = match serde_json::from_value::<Config>(merged) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Failed to deserialize config; using defaults: {error}");
            defaults
        }
    };

    // Warn-only here; main propagates validation errors itself.
    if let Err(error) = validate(&config) {
        eprintln!("Configuration validation error: {error}");
    }

    config
}

fn parse_json_document(raw: &str, label: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(error) => {
            eprintln!("Failed to parse config from {label}: {error}");
            None
        }
    }
}

fn merge_file_source(target: &mut Value, path: &Path) {
    if path.as_os_str().is_empty() || !path.exists() {
        return;
    }
    match fs::read_to_string(path) {
        Ok(contents) => {
            if let Some(value) = parse_json_document(&contents, &format!("file {}", path.display()))
            {
                merge_values(target, value);
            }
        }
        Err(error) => {
            eprintln!("Failed to read config from {}: {error}", path.display());
        }
    }
}

fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target_slot, source_value) => {
            *target_slot = source_value;
        }
    }
}

fn apply_env_overrides(root: &mut Value) {
    for (key, raw_value) in std::env::vars() {
        let Some(stripped) = key.strip_prefix("SLOTMESH__") else {
            continue;
        };

        let segments: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        if segments.is_empty() {
            continue;
        }

        set_nested_value(root, &segments, parse_scalar(raw_value.trim()));
    }
}

fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn set_nested_value(target: &mut Value, segments: &[String], value: Value) {
    match segments {
        [] => *target = value,
        [leaf] => {
            ensure_object(target).insert(leaf.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = ensure_object(target)
                .entry(head.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            set_nested_value(entry, rest, value);
        }
    }
}

fn ensure_object(value: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(serde_json::Map::new());
    }
    match value.as_object_mut() {
        Some(map) => map,
        // Unreachable: coerced to an object above.
        None => unreachable!("value was coerced into an object"),
    }
}
