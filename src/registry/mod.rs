//! Server and proxy registries: the state the routing service routes against.

pub mod proxy_registry;
pub mod server_registry;
pub mod service;

pub use proxy_registry::{ProxyRecord, ProxyRegistry};
pub use server_registry::{
    ServerRecord, ServerRegistry, ServerSummary, SlotRecord, SlotUpdateOutcome,
};
pub use service::RegistryService;
