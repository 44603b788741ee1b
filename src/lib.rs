#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Slotmesh
//!
//! An in-memory matchmaking and slot-routing control plane for multi-proxy
//! game networks.
//!
//! Edge proxies hold player sessions, backends host logical game slots, and
//! this crate is the registry in between: it tracks backends and proxies,
//! queues player requests per slot family, reserves seats with single-use
//! tokens, and routes each player to exactly one slot.

/// Backend-side reservation, handoff, and session services
pub mod backend;

/// Typed publish/subscribe message bus
pub mod bus;

/// Server configuration and environment variables
pub mod config;

/// TTL'd key-value store abstraction
pub mod kv;

/// Structured logging configuration
pub mod logging;

/// Metrics collection and reporting
pub mod metrics;

/// Message protocol definitions
pub mod protocol;

/// Slot provisioning service
pub mod provision;

/// Server and proxy registries
pub mod registry;

/// Player routing service
pub mod routing;

/// Read-only observability endpoint
pub mod status;
