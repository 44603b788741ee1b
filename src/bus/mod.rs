//! Typed publish/subscribe message bus.
//!
//! Services talk to each other exclusively through this interface: fan-out
//! broadcasts, targeted sends (delivered on `<channel>:<targetId>`), and
//! correlated request/response. Delivery is at-least-once for broadcasts and
//! best-effort for sends; handlers must be idempotent.

pub mod channels;
pub mod dedup;
pub mod envelope;
pub mod memory;

pub use dedup::{DedupSettings, DeliveryDedup};
pub use envelope::Envelope;
pub use memory::InMemoryBus;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::Message;

/// Errors surfaced by bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("request on '{channel}' timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },
    #[error("bus transport is closed")]
    Closed,
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Opaque handle for an active subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    pub(crate) id: u64,
    pub(crate) channel: String,
}

/// A subscriber callback. Implementations must not panic; failures are
/// logged and swallowed inside the handler.
#[async_trait]
pub trait BusHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope);
}

struct FnHandler<F> {
    callback: F,
}

#[async_trait]
impl<F, Fut> BusHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, envelope: Envelope) {
        (self.callback)(envelope).await;
    }
}

/// Wrap an async closure as a [`BusHandler`].
pub fn handler_fn<F, Fut>(callback: F) -> Arc<dyn BusHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler { callback })
}

/// The message bus contract consumed by every service in the fabric.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Identifier stamped as `senderId` on outgoing envelopes.
    fn instance_id(&self) -> &str;

    /// Fan out to every subscriber of `channel`.
    async fn broadcast(&self, channel: &str, message: Message) -> Result<(), BusError>;

    /// Deliver only to the peer identified by `target_id`.
    async fn send(&self, target_id: &str, channel: &str, message: Message)
        -> Result<(), BusError>;

    /// Send, then await the correlated response.
    async fn request(
        &self,
        target_id: &str,
        channel: &str,
        message: Message,
        timeout: Duration,
    ) -> Result<Envelope, BusError>;

    /// Publish a response correlated to `inbound` on `channel`.
    async fn reply(
        &self,
        inbound: &Envelope,
        channel: &str,
        message: Message,
    ) -> Result<(), BusError>;

    /// Register a handler for `channel`.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn BusHandler>,
    ) -> Result<SubscriptionId, BusError>;

    /// Remove a previously registered handler.
    async fn unsubscribe(&self, subscription: &SubscriptionId) -> Result<bool, BusError>;
}
