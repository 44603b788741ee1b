//! Registration handshake, heartbeat eviction, proxy discovery, and
//! environment routing over the bus.

mod test_helpers;

use std::time::Duration;

use slotmesh::bus::{channels, MessageBus};
use slotmesh::config::{RegistryConfig, RoutingConfig};
use slotmesh::protocol::{
    EnvironmentFailureMode, EnvironmentRouteRequest, Message, ProxyDiscoveryRequest, ProxyKind,
    RouteAction, ServerHeartbeat, ServerRegistrationRequest, ServerStatus, SlotStatus, SpawnPoint,
};
use test_helpers::{fabric, fabric_with, slot_request, MessageLog, REGISTRY_ID};
use uuid::Uuid;

fn registration(temp_id: &str, server_type: &str, role: &str) -> ServerRegistrationRequest {
    ServerRegistrationRequest {
        temp_id: temp_id.into(),
        server_type: server_type.into(),
        role: role.into(),
        address: "10.0.0.2".into(),
        port: 25566,
        max_capacity: 120,
    }
}

/// The handshake assigns `<type><N>` ids and answers on the requester's
/// targeted channel.
#[tokio::test]
async fn registration_handshake_assigns_permanent_ids() {
    let fabric = fabric().await;

    let response_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::SERVER_REGISTRATION_RESPONSE, "temp-abc"),
    )
    .await;

    fabric
        .bus
        .broadcast(
            channels::SERVER_REGISTRATION_REQUEST,
            Message::ServerRegistrationRequest(registration("temp-abc", "Mini", "game")),
        )
        .await
        .unwrap();
    fabric.settle().await;

    let envelopes = response_log.envelopes();
    assert_eq!(envelopes.len(), 1);
    let Message::ServerRegistrationResponse(response) = &envelopes[0].message else {
        panic!("expected a registration response");
    };
    assert!(response.success);
    assert_eq!(response.assigned_server_id.as_deref(), Some("mini1"));
    assert_eq!(response.proxy_id.as_deref(), Some(REGISTRY_ID));
    assert!(fabric.servers.contains("mini1"));
}

/// Invalid registrations are answered with a reason, not stored.
#[tokio::test]
async fn invalid_registration_is_refused() {
    let fabric = fabric().await;

    let response_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::SERVER_REGISTRATION_RESPONSE, "temp-bad"),
    )
    .await;

    let mut bad = registration("temp-bad", "Mini", "game");
    bad.max_capacity = 0;
    fabric
        .bus
        .broadcast(
            channels::SERVER_REGISTRATION_REQUEST,
            Message::ServerRegistrationRequest(bad),
        )
        .await
        .unwrap();
    fabric.settle().await;

    let envelopes = response_log.envelopes();
    assert_eq!(envelopes.len(), 1);
    let Message::ServerRegistrationResponse(response) = &envelopes[0].message else {
        panic!("expected a registration response");
    };
    assert!(!response.success);
    assert!(response.reason.is_some());
    assert_eq!(fabric.servers.server_count(), 0);
}

/// Heartbeats keep a server alive; a stale one is evicted, its slots are
/// faulted, and routing loses the in-flight work bound to them.
#[tokio::test]
async fn stale_servers_are_evicted_and_their_slots_fault() {
    let registry_config = RegistryConfig {
        server_timeout_secs: 0,
        ..RegistryConfig::default()
    };
    let fabric = fabric_with(RoutingConfig::default(), registry_config).await;
    fabric.announce_proxy("edge1").await;
    let mini1 = fabric.register_server("Mini", "game");
    fabric.start_backend(&mini1).await;

    let removal_log = MessageLog::capture(&fabric.bus, channels::SERVER_REMOVAL).await;

    fabric
        .publish_slot(
            &mini1,
            "a",
            SlotStatus::Available,
            10,
            0,
            &[("family", "bedwars")],
        )
        .await;
    fabric
        .send_slot_request(slot_request(Uuid::new_v4(), "A", "edge1", "bedwars", &[]))
        .await;
    assert_eq!(fabric.routing.snapshot().await.unwrap().in_flight_routes, 1);

    // server_timeout 0 makes every heartbeat immediately stale.
    fabric.registry.run_eviction_once().await;
    fabric.settle().await;

    assert!(!fabric.servers.contains(&mini1), "server evicted");
    assert_eq!(removal_log.len(), 1, "removal broadcast");

    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.in_flight_routes, 0, "route pulled back");
    assert!(routing.pending_occupancy.is_empty());
    assert_eq!(
        routing.queued_requests.get("bedwars"),
        Some(&1),
        "player requeued, not dropped"
    );
}

/// Heartbeats refresh liveness and merge status and player counts.
#[tokio::test]
async fn heartbeats_merge_server_state() {
    let fabric = fabric().await;
    let mini1 = fabric.register_server("Mini", "game");

    fabric
        .bus
        .broadcast(
            channels::SERVER_HEARTBEAT,
            Message::ServerHeartbeat(ServerHeartbeat {
                server_id: mini1.clone(),
                tps: Some(19.8),
                player_count: 37,
                max_capacity: Some(150),
                uptime_secs: Some(3600),
                status: Some(ServerStatus::Available),
            }),
        )
        .await
        .unwrap();
    fabric.settle().await;

    let record = fabric.servers.get(&mini1).unwrap();
    assert_eq!(record.current_player_count, 37);
    assert_eq!(record.max_capacity, 150);
    assert_eq!(record.status, ServerStatus::Available);
}

/// Discovery answers a correlated request with every live proxy; missing
/// `type` fields default to MIXED.
#[tokio::test]
async fn proxy_discovery_lists_known_proxies() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    fabric.announce_proxy("edge2").await;
    fabric.settle().await;

    let response = fabric
        .bus
        .request(
            REGISTRY_ID,
            channels::PROXY_DISCOVERY,
            Message::ProxyDiscoveryRequest(ProxyDiscoveryRequest::default()),
            Duration::from_secs(1),
        )
        .await
        .expect("discovery answers");

    let Message::ProxyDiscoveryResponse(discovery) = response.message else {
        panic!("expected a discovery response");
    };
    let mut ids: Vec<_> = discovery
        .proxies
        .iter()
        .map(|proxy| proxy.proxy_id.clone())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["edge1".to_string(), "edge2".to_string()]);
    assert!(discovery
        .proxies
        .iter()
        .all(|proxy| proxy.kind == ProxyKind::Mixed));
}

/// A proxy that says goodbye disappears from the registry.
#[tokio::test]
async fn proxy_shutdown_removes_the_record() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    assert!(fabric.proxies.is_known("edge1"));

    fabric
        .bus
        .broadcast(
            channels::PROXY_SHUTDOWN,
            Message::ProxyShutdown(slotmesh::protocol::ProxyShutdown {
                proxy_id: "edge1".into(),
            }),
        )
        .await
        .unwrap();
    fabric.settle().await;

    assert!(!fabric.proxies.is_known("edge1"));
}

/// Environment routing picks the least-loaded server of the requested role
/// and emits the env-form slot id.
#[tokio::test]
async fn environment_route_selects_least_loaded_server() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let busy = fabric.register_server("Hub", "lobby");
    let idle = fabric.register_server("Hub", "lobby");

    for (server_id, players) in [(&busy, 90u32), (&idle, 5u32)] {
        fabric
            .bus
            .broadcast(
                channels::SERVER_HEARTBEAT,
                Message::ServerHeartbeat(ServerHeartbeat {
                    server_id: server_id.to_string(),
                    tps: None,
                    player_count: players,
                    max_capacity: Some(100),
                    uptime_secs: None,
                    status: Some(ServerStatus::Available),
                }),
            )
            .await
            .unwrap();
    }
    fabric.settle().await;

    let proxy_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::PLAYER_ROUTE_COMMAND, "edge1"),
    )
    .await;
    let server_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::SERVER_PLAYER_ROUTE, &idle),
    )
    .await;

    fabric
        .bus
        .broadcast(
            channels::REGISTRY_ENVIRONMENT_ROUTE_REQUEST,
            Message::EnvironmentRouteRequest(EnvironmentRouteRequest {
                request_id: Uuid::new_v4(),
                player_id: Uuid::new_v4(),
                player_name: "A".into(),
                proxy_id: "edge1".into(),
                target_environment_id: "lobby".into(),
                target_server_id: None,
                world_name: Some("hub".into()),
                spawn: SpawnPoint {
                    x: 0.5,
                    y: 80.0,
                    z: 0.5,
                    yaw: 0.0,
                    pitch: 0.0,
                },
                failure_mode: EnvironmentFailureMode::KickOnFail,
                origin_server_id: None,
            }),
        )
        .await
        .unwrap();
    fabric.settle().await;

    let commands = proxy_log.route_commands();
    assert_eq!(commands.len(), 1);
    let command = &commands[0];
    assert_eq!(command.action, RouteAction::Route);
    assert_eq!(command.server_id.as_deref(), Some(idle.as_str()));
    assert_eq!(
        command.slot_id.as_deref(),
        Some(format!("env:lobby:{idle}").as_str())
    );
    assert_eq!(command.slot_suffix.as_deref(), Some("env"));
    assert_eq!(command.target_world.as_deref(), Some("hub"));
    assert_eq!(server_log.route_commands().len(), 1, "backend copy sent");
}

/// No server of the role + KICK_ON_FAIL → the player is disconnected with
/// `environment-unavailable`.
#[tokio::test]
async fn environment_route_kicks_when_unavailable() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;

    let proxy_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::PLAYER_ROUTE_COMMAND, "edge1"),
    )
    .await;

    fabric
        .bus
        .broadcast(
            channels::REGISTRY_ENVIRONMENT_ROUTE_REQUEST,
            Message::EnvironmentRouteRequest(EnvironmentRouteRequest {
                request_id: Uuid::new_v4(),
                player_id: Uuid::new_v4(),
                player_name: "A".into(),
                proxy_id: "edge1".into(),
                target_environment_id: "lobby".into(),
                target_server_id: None,
                world_name: None,
                spawn: SpawnPoint::default(),
                failure_mode: EnvironmentFailureMode::KickOnFail,
                origin_server_id: None,
            }),
        )
        .await
        .unwrap();
    fabric.settle().await;

    let commands = proxy_log.route_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].action, RouteAction::Disconnect);
    assert_eq!(commands[0].reason(), Some("environment-unavailable"));
}
