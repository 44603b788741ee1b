//! Bus-facing glue for the server and proxy registries.
//!
//! Subscribes the registries to their channels, answers registration and
//! discovery requests, and runs the stale-entry eviction sweep. Evicting a
//! server broadcasts `server.removal` plus one synthetic FAULTED slot update
//! per hosted slot, so the routing service reacts through its ordinary
//! slot-unavailable path.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::{interval, MissedTickBehavior};

use crate::bus::{channels, handler_fn, MessageBus};
use crate::config::RegistryConfig;
use crate::metrics::CoreMetrics;
use crate::protocol::{
    validation, Message, ProxyDiscoveryResponse, ServerRegistrationResponse, ServerRemoval,
    SlotStatus, SlotStatusUpdate,
};

use super::proxy_registry::ProxyRegistry;
use super::server_registry::ServerRegistry;

pub struct RegistryService {
    bus: Arc<dyn MessageBus>,
    servers: Arc<ServerRegistry>,
    proxies: Arc<ProxyRegistry>,
    metrics: Arc<CoreMetrics>,
    config: RegistryConfig,
}

impl RegistryService {
    pub async fn start(
        bus: Arc<dyn MessageBus>,
        servers: Arc<ServerRegistry>,
        proxies: Arc<ProxyRegistry>,
        metrics: Arc<CoreMetrics>,
        config: RegistryConfig,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            bus,
            servers,
            proxies,
            metrics,
            config,
        });
        service.subscribe_channels().await;
        service
    }

    async fn subscribe_channels(self: &Arc<Self>) {
        let service = self.clone();
        let _ = self
            .bus
            .subscribe(
                channels::SERVER_REGISTRATION_REQUEST,
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_registration(envelope).await }
                }),
            )
            .await;

        let service = self.clone();
        let _ = self
            .bus
            .subscribe(
                channels::SERVER_HEARTBEAT,
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_server_heartbeat(envelope).await }
                }),
            )
            .await;

        let service = self.clone();
        let _ = self
            .bus
            .subscribe(
                channels::REGISTRY_SLOT_STATUS,
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_slot_status(envelope).await }
                }),
            )
            .await;

        let service = self.clone();
        let _ = self
            .bus
            .subscribe(
                channels::SERVER_REMOVAL,
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_server_removal(envelope).await }
                }),
            )
            .await;

        let service = self.clone();
        let _ = self
            .bus
            .subscribe(
                channels::PROXY_ANNOUNCE,
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_proxy_announce(envelope).await }
                }),
            )
            .await;

        let service = self.clone();
        let _ = self
            .bus
            .subscribe(
                channels::PROXY_HEARTBEAT,
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_proxy_heartbeat(envelope).await }
                }),
            )
            .await;

        let service = self.clone();
        let _ = self
            .bus
            .subscribe(
                channels::PROXY_SHUTDOWN,
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_proxy_shutdown(envelope).await }
                }),
            )
            .await;

        // Discovery answers both the broadcast channel and the targeted
        // form, so peers can use correlated requests against this registry.
        for channel in [
            channels::PROXY_DISCOVERY.to_string(),
            channels::targeted(channels::PROXY_DISCOVERY, self.servers.registry_id()),
        ] {
            let service = self.clone();
            let _ = self
                .bus
                .subscribe(
                    &channel,
                    handler_fn(move |envelope| {
                        let service = service.clone();
                        async move { service.on_proxy_discovery(envelope).await }
                    }),
                )
                .await;
        }
    }

    async fn on_registration(&self, envelope: crate::bus::Envelope) {
        let request = match envelope.message {
            Message::ServerRegistrationRequest(request) => request,
            other => {
                self.unexpected(&other, channels::SERVER_REGISTRATION_REQUEST);
                return;
            }
        };

        let response = match self.servers.register(&request) {
            Ok(assigned_server_id) => {
                CoreMetrics::increment(&self.metrics.servers_registered);
                ServerRegistrationResponse {
                    success: true,
                    assigned_server_id: Some(assigned_server_id),
                    proxy_id: Some(self.servers.registry_id().to_string()),
                    reason: None,
                }
            }
            Err(reason) => {
                CoreMetrics::increment(&self.metrics.registration_failures);
                tracing::warn!(temp_id = %request.temp_id, %reason, "Rejected server registration");
                ServerRegistrationResponse {
                    success: false,
                    assigned_server_id: None,
                    proxy_id: None,
                    reason: Some(reason),
                }
            }
        };

        if let Err(error) = self
            .bus
            .send(
                &request.temp_id,
                channels::SERVER_REGISTRATION_RESPONSE,
                Message::ServerRegistrationResponse(response),
            )
            .await
        {
            tracing::error!(%error, "Failed to publish registration response");
        }
    }

    async fn on_server_heartbeat(&self, envelope: crate::bus::Envelope) {
        let heartbeat = match envelope.message {
            Message::ServerHeartbeat(heartbeat) => heartbeat,
            other => {
                self.unexpected(&other, channels::SERVER_HEARTBEAT);
                return;
            }
        };
        if !self.servers.apply_heartbeat(&heartbeat) {
            tracing::debug!(server_id = %heartbeat.server_id, "Heartbeat from unregistered server");
        }
    }

    async fn on_slot_status(&self, envelope: crate::bus::Envelope) {
        let update = match envelope.message {
            Message::SlotStatusUpdate(update) => update,
            other => {
                self.unexpected(&other, channels::REGISTRY_SLOT_STATUS);
                return;
            }
        };
        if let Err(reason) = validation::validate_slot_update(&update) {
            CoreMetrics::increment(&self.metrics.validation_errors);
            tracing::warn!(%reason, "Dropping invalid slot status update");
            return;
        }
        if self.servers.apply_slot_update(&update).is_none() {
            tracing::debug!(
                server_id = %update.server_id,
                slot_suffix = %update.slot_suffix,
                "Slot update for unknown server"
            );
        }
    }

    async fn on_server_removal(&self, envelope: crate::bus::Envelope) {
        let removal = match envelope.message {
            Message::ServerRemoval(removal) => removal,
            other => {
                self.unexpected(&other, channels::SERVER_REMOVAL);
                return;
            }
        };
        // Self-published removals come back around; remove_server is a no-op then.
        if let Some(record) = self.servers.remove_server(&removal.server_id) {
            tracing::info!(
                server_id = %removal.server_id,
                reason = removal.reason.as_deref().unwrap_or("unspecified"),
                "Server removed"
            );
            self.fault_slots_of(&record).await;
        }
    }

    async fn on_proxy_announce(&self, envelope: crate::bus::Envelope) {
        let announce = match envelope.message {
            Message::ProxyAnnounce(announce) => announce,
            other => {
                self.unexpected(&other, channels::PROXY_ANNOUNCE);
                return;
            }
        };
        self.proxies.apply_announce(&announce);
    }

    async fn on_proxy_heartbeat(&self, envelope: crate::bus::Envelope) {
        let heartbeat = match envelope.message {
            Message::ProxyHeartbeat(heartbeat) => heartbeat,
            other => {
                self.unexpected(&other, channels::PROXY_HEARTBEAT);
                return;
            }
        };
        if !self.proxies.apply_heartbeat(&heartbeat) {
            tracing::debug!(proxy_id = %heartbeat.proxy_id, "Heartbeat from unannounced proxy");
        }
    }

    async fn on_proxy_shutdown(&self, envelope: crate::bus::Envelope) {
        let shutdown = match envelope.message {
            Message::ProxyShutdown(shutdown) => shutdown,
            other => {
                self.unexpected(&other, channels::PROXY_SHUTDOWN);
                return;
            }
        };
        if self.proxies.remove(&shutdown.proxy_id).is_some() {
            tracing::info!(proxy_id = %shutdown.proxy_id, "Proxy shut down");
        }
    }

    async fn on_proxy_discovery(&self, envelope: crate::bus::Envelope) {
        if !matches!(envelope.message, Message::ProxyDiscoveryRequest(_)) {
            self.unexpected(&envelope.message, channels::PROXY_DISCOVERY);
            return;
        }
        let response = ProxyDiscoveryResponse {
            proxies: self.proxies.known_proxies(),
        };
        if let Err(error) = self
            .bus
            .reply(
                &envelope,
                channels::PROXY_DISCOVERY_RESPONSE,
                Message::ProxyDiscoveryResponse(response),
            )
            .await
        {
            tracing::error!(%error, "Failed to publish discovery response");
        }
    }

    /// Broadcast a FAULTED update for every slot of a removed server.
    async fn fault_slots_of(&self, record: &super::server_registry::ServerRecord) {
        let publishes = record.slots.values().map(|slot| {
            let update = SlotStatusUpdate {
                server_id: record.server_id.clone(),
                slot_id: Some(slot.slot_id.clone()),
                slot_suffix: slot.slot_suffix.clone(),
                game_type: slot.game_type.clone(),
                status: SlotStatus::Faulted,
                max_players: slot.max_players,
                online_players: slot.online_players,
                metadata: slot.metadata.clone(),
            };
            async move {
                if let Err(error) = self
                    .bus
                    .broadcast(
                        channels::REGISTRY_SLOT_STATUS,
                        Message::SlotStatusUpdate(update),
                    )
                    .await
                {
                    tracing::error!(%error, "Failed to fault slot of removed server");
                }
            }
        });
        join_all(publishes).await;
    }

    /// Periodic eviction of stale servers and proxies.
    pub fn spawn_eviction_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(service.config.eviction_sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.evict_stale().await;
            }
        })
    }

    async fn evict_stale(&self) {
        for server_id in self.servers.collect_stale(self.config.server_timeout()) {
            let Some(record) = self.servers.remove_server(&server_id) else {
                continue;
            };
            CoreMetrics::increment(&self.metrics.servers_evicted);
            tracing::info!(%server_id, "Evicting server with stale heartbeat");

            let removal = ServerRemoval {
                server_id: server_id.clone(),
                reason: Some("heartbeat-timeout".to_string()),
            };
            if let Err(error) = self
                .bus
                .broadcast(channels::SERVER_REMOVAL, Message::ServerRemoval(removal))
                .await
            {
                tracing::error!(%error, %server_id, "Failed to broadcast server removal");
            }
            self.fault_slots_of(&record).await;
        }

        for proxy_id in self.proxies.collect_stale(self.config.proxy_timeout()) {
            if self.proxies.remove(&proxy_id).is_some() {
                CoreMetrics::increment(&self.metrics.proxies_evicted);
                tracing::info!(%proxy_id, "Evicting proxy with stale heartbeat");
            }
        }
    }

    fn unexpected(&self, message: &Message, channel: &str) {
        CoreMetrics::increment(&self.metrics.validation_errors);
        tracing::warn!(kind = message.kind(), %channel, "Unexpected message type; dropping");
    }

    pub fn servers(&self) -> &Arc<ServerRegistry> {
        &self.servers
    }

    pub fn proxies(&self) -> &Arc<ProxyRegistry> {
        &self.proxies
    }

    /// One immediate sweep, for deterministic tests.
    pub async fn run_eviction_once(&self) {
        self.evict_stale().await;
    }
}
