//! Shared fixtures for the integration suites: a fully wired in-process
//! fabric, channel capture logs, and scripted backends.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use slotmesh::backend::BackendHost;
use slotmesh::bus::{channels, handler_fn, Envelope, InMemoryBus, MessageBus};
use slotmesh::config::{BackendConfig, RegistryConfig, RoutingConfig};
use slotmesh::kv::InMemoryKeyValueStore;
use slotmesh::metrics::CoreMetrics;
use slotmesh::protocol::{
    AckStatus, Message, PlayerId, PlayerReservationResponse, PlayerRouteAck, PlayerRouteCommand,
    PlayerSlotRequest, ProxyAnnounce, ProxyKind, RequestId, ServerRegistrationRequest,
    SlotProvisionCommand, SlotStatus, SlotStatusUpdate,
};
use slotmesh::provision::{ProvisionTrigger, SlotProvisioner};
use slotmesh::registry::{ProxyRegistry, RegistryService, ServerRegistry};
use slotmesh::routing::{PlayerRoutingService, ProxyDirectory, SlotDirectory};
use uuid::Uuid;

pub const REGISTRY_ID: &str = "registry-test";

#[allow(dead_code)]
pub struct TestFabric {
    pub metrics: Arc<CoreMetrics>,
    pub bus: Arc<InMemoryBus>,
    pub servers: Arc<ServerRegistry>,
    pub proxies: Arc<ProxyRegistry>,
    pub registry: Arc<RegistryService>,
    pub provisioner: Arc<SlotProvisioner>,
    pub routing: Arc<PlayerRoutingService>,
}

#[allow(dead_code)]
pub async fn fabric() -> TestFabric {
    fabric_with(RoutingConfig::default(), RegistryConfig::default()).await
}

/// Wire the full control plane onto one in-memory bus, in the same
/// subscription order as the daemon (registry merges before routing reads).
pub async fn fabric_with(
    routing_config: RoutingConfig,
    registry_config: RegistryConfig,
) -> TestFabric {
    let metrics = Arc::new(CoreMetrics::new());
    let bus = InMemoryBus::with_metrics(REGISTRY_ID, metrics.clone());
    let bus_handle: Arc<dyn MessageBus> = bus.clone();

    let servers = Arc::new(ServerRegistry::new(REGISTRY_ID));
    let proxies = Arc::new(ProxyRegistry::new());

    let registry = RegistryService::start(
        bus_handle.clone(),
        servers.clone(),
        proxies.clone(),
        metrics.clone(),
        registry_config,
    )
    .await;

    let provisioner =
        SlotProvisioner::start(bus_handle.clone(), servers.clone(), metrics.clone()).await;

    let slot_directory: Arc<dyn SlotDirectory> = servers.clone();
    let proxy_directory: Arc<dyn ProxyDirectory> = proxies.clone();
    let provision_trigger: Arc<dyn ProvisionTrigger> = provisioner.clone();
    let routing = PlayerRoutingService::start(
        bus_handle,
        slot_directory,
        proxy_directory,
        provision_trigger,
        metrics.clone(),
        routing_config,
    )
    .await;

    TestFabric {
        metrics,
        bus,
        servers,
        proxies,
        registry,
        provisioner,
        routing,
    }
}

impl TestFabric {
    /// Drain the bus dispatcher and the routing worker until quiescent.
    /// Each round flushes published envelopes and then round-trips the
    /// worker's command channel.
    pub async fn settle(&self) {
        for _ in 0..6 {
            self.bus.flush().await;
            let _ = self.routing.snapshot().await;
        }
    }

    pub async fn announce_proxy(&self, proxy_id: &str) {
        self.bus
            .broadcast(
                channels::PROXY_ANNOUNCE,
                Message::ProxyAnnounce(ProxyAnnounce {
                    proxy_id: proxy_id.into(),
                    address: "10.0.1.1:25565".into(),
                    hard_cap: 500,
                    soft_cap: 400,
                    kind: ProxyKind::Mixed,
                }),
            )
            .await
            .expect("announce proxy");
        self.bus.flush().await;
    }

    /// Register a backend directly against the registry; the handshake
    /// itself is exercised in the registry suite.
    pub fn register_server(&self, server_type: &str, role: &str) -> String {
        self.servers
            .register(&ServerRegistrationRequest {
                temp_id: format!("temp-{}", Uuid::new_v4()),
                server_type: server_type.into(),
                role: role.into(),
                address: "10.0.0.2".into(),
                port: 25566,
                max_capacity: 200,
            })
            .expect("server registration")
    }

    pub async fn publish_slot(
        &self,
        server_id: &str,
        slot_suffix: &str,
        status: SlotStatus,
        max_players: u32,
        online_players: u32,
        metadata: &[(&str, &str)],
    ) {
        self.bus
            .broadcast(
                channels::REGISTRY_SLOT_STATUS,
                Message::SlotStatusUpdate(SlotStatusUpdate {
                    server_id: server_id.into(),
                    slot_id: None,
                    slot_suffix: slot_suffix.into(),
                    game_type: None,
                    status,
                    max_players,
                    online_players,
                    metadata: to_metadata(metadata),
                }),
            )
            .await
            .expect("publish slot update");
        self.settle().await;
    }

    pub async fn send_slot_request(&self, request: PlayerSlotRequest) {
        self.bus
            .broadcast(
                channels::REGISTRY_PLAYER_REQUEST,
                Message::PlayerSlotRequest(request),
            )
            .await
            .expect("publish slot request");
        self.settle().await;
    }

    pub async fn send_success_ack(
        &self,
        request_id: RequestId,
        player_id: PlayerId,
        proxy_id: &str,
        server_id: &str,
        slot_id: &str,
    ) {
        self.send_ack(PlayerRouteAck {
            request_id,
            player_id,
            proxy_id: proxy_id.into(),
            server_id: Some(server_id.into()),
            slot_id: Some(slot_id.into()),
            status: AckStatus::Success,
            reason: None,
        })
        .await;
    }

    pub async fn send_ack(&self, ack: PlayerRouteAck) {
        self.bus
            .broadcast(channels::PLAYER_ROUTE_ACK, Message::PlayerRouteAck(ack))
            .await
            .expect("publish ack");
        self.settle().await;
    }

    /// Spin up a real backend host for `server_id` on this fabric's bus.
    pub async fn start_backend(&self, server_id: &str) -> Arc<BackendHost> {
        let bus_handle: Arc<dyn MessageBus> = self.bus.clone();
        let config = BackendConfig::default();
        let host = BackendHost::start(
            bus_handle,
            server_id,
            Arc::new(InMemoryKeyValueStore::new()),
            &config,
            self.metrics.clone(),
        )
        .await;
        host.spawn_store_cleanup(&config);
        host
    }
}

pub fn to_metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[allow(dead_code)]
pub fn slot_request(
    player_id: PlayerId,
    player_name: &str,
    proxy_id: &str,
    family_id: &str,
    metadata: &[(&str, &str)],
) -> PlayerSlotRequest {
    PlayerSlotRequest {
        request_id: Uuid::new_v4(),
        player_id,
        player_name: player_name.into(),
        proxy_id: proxy_id.into(),
        family_id: family_id.into(),
        metadata: to_metadata(metadata),
    }
}

/// Captures every envelope published on one channel.
#[derive(Clone)]
pub struct MessageLog {
    entries: Arc<Mutex<Vec<Envelope>>>,
}

impl MessageLog {
    pub async fn capture(bus: &Arc<InMemoryBus>, channel: &str) -> Self {
        let log = Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        };
        let entries = log.entries.clone();
        bus.subscribe(
            channel,
            handler_fn(move |envelope| {
                let entries = entries.clone();
                async move {
                    entries.lock().unwrap().push(envelope);
                }
            }),
        )
        .await
        .expect("subscribe log");
        log
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn route_commands(&self) -> Vec<PlayerRouteCommand> {
        self.envelopes()
            .into_iter()
            .filter_map(|envelope| match envelope.message {
                Message::PlayerRouteCommand(command) => Some(*command),
                _ => None,
            })
            .collect()
    }

    #[allow(dead_code)]
    pub fn provision_commands(&self) -> Vec<SlotProvisionCommand> {
        self.envelopes()
            .into_iter()
            .filter_map(|envelope| match envelope.message {
                Message::SlotProvisionCommand(command) => Some(command),
                _ => None,
            })
            .collect()
    }
}

/// A scripted reservation responder: answers targeted reservation requests
/// with a fixed sequence of outcomes, then auto-accepts.
#[allow(dead_code)]
pub enum ReservationScript {
    Accept(&'static str),
    Reject(&'static str),
    /// Let the request time out.
    Ignore,
}

#[allow(dead_code)]
pub async fn scripted_reservations(
    bus: &Arc<InMemoryBus>,
    server_id: &str,
    script: Vec<ReservationScript>,
) {
    let script = Arc::new(Mutex::new(VecDeque::from(script)));
    let responder_bus = bus.clone();
    let server_id = server_id.to_string();
    bus.subscribe(
        &channels::targeted(channels::PLAYER_RESERVATION_REQUEST, &server_id),
        handler_fn(move |envelope| {
            let script = script.clone();
            let bus = responder_bus.clone();
            let server_id = server_id.clone();
            async move {
                let Message::PlayerReservationRequest(request) = envelope.message.clone() else {
                    return;
                };
                let outcome = script.lock().unwrap().pop_front();
                let response = match outcome {
                    Some(ReservationScript::Reject(reason)) => PlayerReservationResponse {
                        request_id: request.request_id,
                        server_id,
                        accepted: false,
                        reservation_token: None,
                        reason: Some(reason.to_string()),
                    },
                    Some(ReservationScript::Ignore) => return,
                    Some(ReservationScript::Accept(token)) => PlayerReservationResponse {
                        request_id: request.request_id,
                        server_id,
                        accepted: true,
                        reservation_token: Some(token.to_string()),
                        reason: None,
                    },
                    None => PlayerReservationResponse {
                        request_id: request.request_id,
                        server_id,
                        accepted: true,
                        reservation_token: Some(format!("tok-{}", Uuid::new_v4())),
                        reason: None,
                    },
                };
                let _ = bus
                    .reply(
                        &envelope,
                        channels::PLAYER_RESERVATION_RESPONSE,
                        Message::PlayerReservationResponse(response),
                    )
                    .await;
            }
        }),
    )
    .await
    .expect("subscribe scripted reservations");
}
