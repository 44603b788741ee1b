//! Process-local bus transport.
//!
//! All channels flow through one dispatcher task, which gives subscribers a
//! global FIFO view: envelopes are delivered in publish order, handlers run
//! in registration order. Publishing never blocks on delivery, so handlers
//! are free to publish from inside their own callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use smallvec::SmallVec;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::metrics::CoreMetrics;
use crate::protocol::Message;

use super::dedup::{DedupSettings, DeliveryDedup};
use super::{channels, BusError, BusHandler, Envelope, MessageBus, SubscriptionId};

type SubscriberList = SmallVec<[SubscriberEntry; 4]>;

#[derive(Clone)]
struct SubscriberEntry {
    id: u64,
    handler: Arc<dyn BusHandler>,
}

struct DispatchItem {
    channel: String,
    frame: Bytes,
}

struct BusShared {
    instance_id: String,
    subscriptions: RwLock<HashMap<String, SubscriberList>>,
    pending: DashMap<Uuid, oneshot::Sender<Envelope>>,
    dedup: DeliveryDedup,
    metrics: Arc<CoreMetrics>,
}

/// In-memory [`MessageBus`] implementation.
pub struct InMemoryBus {
    shared: Arc<BusShared>,
    queue: mpsc::UnboundedSender<DispatchItem>,
    next_subscription: AtomicU64,
    dispatcher: tokio::task::JoinHandle<()>,
    dedup_sweeper: tokio::task::JoinHandle<()>,
}

impl InMemoryBus {
    pub fn new(instance_id: impl Into<String>) -> Arc<Self> {
        Self::with_metrics(instance_id, Arc::new(CoreMetrics::new()))
    }

    pub fn with_metrics(instance_id: impl Into<String>, metrics: Arc<CoreMetrics>) -> Arc<Self> {
        let dedup_settings = DedupSettings::default();
        let dedup = DeliveryDedup::new(dedup_settings);
        let shared = Arc::new(BusShared {
            instance_id: instance_id.into(),
            subscriptions: RwLock::new(HashMap::new()),
            pending: DashMap::new(),
            dedup: dedup.clone(),
            metrics,
        });

        let (queue, rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_loop(shared.clone(), rx));
        let dedup_sweeper = dedup.spawn_maintenance(dedup_settings.cleanup_interval);

        Arc::new(Self {
            shared,
            queue,
            next_subscription: AtomicU64::new(1),
            dispatcher,
            dedup_sweeper,
        })
    }

    /// Enqueue an already-built envelope, exactly as a remote transport
    /// would hand it to us. Also the hook tests use to simulate duplicate
    /// delivery.
    pub fn publish_envelope(&self, channel: &str, envelope: &Envelope) -> Result<(), BusError> {
        let frame = Bytes::from(serde_json::to_vec(envelope)?);
        CoreMetrics::increment(&self.shared.metrics.bus_messages_published);
        self.queue
            .send(DispatchItem {
                channel: channel.to_string(),
                frame,
            })
            .map_err(|_| BusError::Closed)
    }

    /// Wait until every envelope published so far has been delivered.
    ///
    /// Works by flushing a sentinel through the dispatcher queue; intended
    /// for tests and shutdown sequencing.
    pub async fn flush(&self) {
        let sentinel = format!("__flush.{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        // The handler fires at most once; the Option satisfies the Fn bound.
        let tx = std::sync::Mutex::new(Some(tx));
        let flushed = super::handler_fn(move |_| {
            let taken = tx.lock().ok().and_then(|mut guard| guard.take());
            async move {
                if let Some(tx) = taken {
                    let _ = tx.send(());
                }
            }
        });
        let Ok(subscription) = self.subscribe(&sentinel, flushed).await else {
            return;
        };
        let envelope = Envelope::new(
            self.shared.instance_id.clone(),
            Message::ProxyDiscoveryRequest(crate::protocol::ProxyDiscoveryRequest::default()),
        );
        if self.publish_envelope(&sentinel, &envelope).is_ok() {
            let _ = rx.await;
        }
        let _ = self.unsubscribe(&subscription).await;
    }
}

impl Drop for InMemoryBus {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.dedup_sweeper.abort();
    }
}

async fn dispatch_loop(shared: Arc<BusShared>, mut rx: mpsc::UnboundedReceiver<DispatchItem>) {
    while let Some(item) = rx.recv().await {
        let envelope: Envelope = match serde_json::from_slice(&item.frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                CoreMetrics::increment(&shared.metrics.validation_errors);
                tracing::warn!(channel = %item.channel, %error, "Dropping undecodable envelope");
                continue;
            }
        };

        // Correlated responses complete their waiter even when nobody
        // subscribes to the response channel.
        if let Some(correlation_id) = envelope.correlation_id {
            if let Some((_, waiter)) = shared.pending.remove(&correlation_id) {
                let _ = waiter.send(envelope.clone());
            }
        }

        if shared.dedup.check_and_record(envelope.message_id).await {
            CoreMetrics::increment(&shared.metrics.bus_dedup_hits);
            tracing::trace!(
                channel = %item.channel,
                message_id = %envelope.message_id,
                "Suppressing duplicate delivery"
            );
            continue;
        }

        let handlers: SubscriberList = {
            let subscriptions = shared.subscriptions.read().await;
            subscriptions
                .get(&item.channel)
                .cloned()
                .unwrap_or_default()
        };

        for entry in handlers {
            entry.handler.handle(envelope.clone()).await;
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn instance_id(&self) -> &str {
        &self.shared.instance_id
    }

    async fn broadcast(&self, channel: &str, message: Message) -> Result<(), BusError> {
        let envelope = Envelope::new(self.shared.instance_id.clone(), message);
        self.publish_envelope(channel, &envelope)
    }

    async fn send(
        &self,
        target_id: &str,
        channel: &str,
        message: Message,
    ) -> Result<(), BusError> {
        let envelope = Envelope::new(self.shared.instance_id.clone(), message);
        self.publish_envelope(&channels::targeted(channel, target_id), &envelope)
    }

    async fn request(
        &self,
        target_id: &str,
        channel: &str,
        message: Message,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        let envelope = Envelope::new(self.shared.instance_id.clone(), message);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(envelope.message_id, tx);

        if let Err(error) =
            self.publish_envelope(&channels::targeted(channel, target_id), &envelope)
        {
            self.shared.pending.remove(&envelope.message_id);
            return Err(error);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.shared.pending.remove(&envelope.message_id);
                Err(BusError::Closed)
            }
            Err(_) => {
                self.shared.pending.remove(&envelope.message_id);
                CoreMetrics::increment(&self.shared.metrics.bus_requests_timed_out);
                Err(BusError::Timeout {
                    channel: channel.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn reply(
        &self,
        inbound: &Envelope,
        channel: &str,
        message: Message,
    ) -> Result<(), BusError> {
        let envelope = inbound.reply_with(self.shared.instance_id.clone(), message);
        self.publish_envelope(channel, &envelope)
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn BusHandler>,
    ) -> Result<SubscriptionId, BusError> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut subscriptions = self.shared.subscriptions.write().await;
        subscriptions
            .entry(channel.to_string())
            .or_default()
            .push(SubscriberEntry { id, handler });
        Ok(SubscriptionId {
            id,
            channel: channel.to_string(),
        })
    }

    async fn unsubscribe(&self, subscription: &SubscriptionId) -> Result<bool, BusError> {
        let mut subscriptions = self.shared.subscriptions.write().await;
        let Some(entries) = subscriptions.get_mut(&subscription.channel) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != subscription.id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            subscriptions.remove(&subscription.channel);
        }
        Ok(removed)
    }
}
