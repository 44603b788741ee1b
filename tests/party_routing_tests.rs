//! Party reservation allocation, member dispatch, and release accounting.

mod test_helpers;

use slotmesh::bus::{channels, MessageBus};
use slotmesh::protocol::{
    meta_keys, Message, PartyReservationClaimed, PartyReservationCreated,
    PartyReservationSnapshot, PlayerId, RouteAction, SlotStatus,
};
use test_helpers::{fabric, slot_request, MessageLog, TestFabric};
use uuid::Uuid;

const FAMILY_DUELS: &[(&str, &str)] = &[
    ("family", "duels"),
    ("team.count", "2"),
    ("team.max", "4"),
];

fn party_snapshot(players: &[PlayerId]) -> PartyReservationSnapshot {
    PartyReservationSnapshot {
        reservation_id: Uuid::new_v4(),
        party_id: Uuid::new_v4(),
        target_server_id: None,
        tokens: players
            .iter()
            .map(|player| (*player, format!("pt-{player}")))
            .collect(),
        variant_id: None,
        assigned_team_index: None,
    }
}

async fn send_party_created(fabric: &TestFabric, snapshot: PartyReservationSnapshot, family: &str) {
    fabric
        .bus
        .broadcast(
            channels::PARTY_RESERVATION_CREATED,
            Message::PartyReservationCreated(PartyReservationCreated {
                reservation: snapshot,
                family_id: family.into(),
                variant_id: None,
            }),
        )
        .await
        .unwrap();
    fabric.settle().await;
}

fn member_request(
    player: PlayerId,
    reservation: &PartyReservationSnapshot,
    family: &str,
) -> slotmesh::protocol::PlayerSlotRequest {
    let reservation_id = reservation.reservation_id.to_string();
    let token = reservation.tokens[&player].clone();
    slot_request(
        player,
        "member",
        "edge1",
        family,
        &[
            (meta_keys::PARTY_RESERVATION_ID, reservation_id.as_str()),
            (meta_keys::PARTY_TOKEN_ID, token.as_str()),
        ],
    )
}

/// Four players land together on team 0 of a team slot; all acks release
/// the allocation.
#[tokio::test]
async fn team_party_allocates_dispatches_and_releases() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mini2 = fabric.register_server("Mini", "game");
    fabric.start_backend(&mini2).await;

    let proxy_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::PLAYER_ROUTE_COMMAND, "edge1"),
    )
    .await;

    fabric
        .publish_slot(&mini2, "b", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;

    let players: Vec<PlayerId> = (0..4).map(|_| Uuid::new_v4()).collect();
    let snapshot = party_snapshot(&players);
    let slot_id = format!("{mini2}:b");

    send_party_created(&fabric, snapshot.clone(), "duels").await;

    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.active_parties, 1);
    assert_eq!(
        routing.pending_occupancy.get(&slot_id.to_lowercase()),
        Some(&4),
        "whole party held up front"
    );

    let mut request_ids = Vec::new();
    for player in &players {
        let request = member_request(*player, &snapshot, "duels");
        request_ids.push((request.request_id, *player));
        fabric.send_slot_request(request).await;
    }

    let commands = proxy_log.route_commands();
    assert_eq!(commands.len(), 4);
    for command in &commands {
        assert_eq!(command.action, RouteAction::Route);
        assert_eq!(command.slot_id.as_deref(), Some(slot_id.as_str()));
        assert_eq!(
            command.metadata.get(meta_keys::TEAM_INDEX),
            Some(&"0".to_string()),
            "party shares team 0"
        );
        assert!(command.metadata.contains_key(meta_keys::PARTY_ID));
    }

    for (request_id, player) in request_ids {
        fabric
            .send_success_ack(request_id, player, "edge1", &mini2, &slot_id)
            .await;
    }

    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.active_parties, 0, "released after all members acked");
    assert!(routing.pending_occupancy.is_empty());
}

/// Duplicate creation messages for the same reservation hold seats once.
#[tokio::test]
async fn duplicate_party_creation_is_idempotent() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mini2 = fabric.register_server("Mini", "game");
    fabric
        .publish_slot(&mini2, "b", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;

    let players: Vec<PlayerId> = (0..4).map(|_| Uuid::new_v4()).collect();
    let snapshot = party_snapshot(&players);
    let slot_id = format!("{mini2}:b");

    send_party_created(&fabric, snapshot.clone(), "duels").await;
    send_party_created(&fabric, snapshot, "duels").await;

    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.active_parties, 1);
    assert_eq!(routing.pending_occupancy.get(&slot_id.to_lowercase()), Some(&4));
}

/// A member with the wrong claim token is disconnected.
#[tokio::test]
async fn party_token_mismatch_disconnects() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mini2 = fabric.register_server("Mini", "game");
    fabric
        .publish_slot(&mini2, "b", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;

    let players: Vec<PlayerId> = (0..2).map(|_| Uuid::new_v4()).collect();
    let snapshot = party_snapshot(&players);
    send_party_created(&fabric, snapshot.clone(), "duels").await;

    let proxy_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::PLAYER_ROUTE_COMMAND, "edge1"),
    )
    .await;

    let reservation_id = snapshot.reservation_id.to_string();
    fabric
        .send_slot_request(slot_request(
            players[0],
            "member",
            "edge1",
            "duels",
            &[
                (meta_keys::PARTY_RESERVATION_ID, reservation_id.as_str()),
                (meta_keys::PARTY_TOKEN_ID, "forged"),
            ],
        ))
        .await;

    let commands = proxy_log.route_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].action, RouteAction::Disconnect);
    assert_eq!(commands[0].reason(), Some("party-token-mismatch"));
}

/// A player missing from the token map is rejected outright.
#[tokio::test]
async fn party_token_missing_disconnects() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mini2 = fabric.register_server("Mini", "game");
    fabric
        .publish_slot(&mini2, "b", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;

    let players: Vec<PlayerId> = (0..2).map(|_| Uuid::new_v4()).collect();
    let snapshot = party_snapshot(&players);
    send_party_created(&fabric, snapshot.clone(), "duels").await;

    let proxy_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::PLAYER_ROUTE_COMMAND, "edge1"),
    )
    .await;

    let stranger = Uuid::new_v4();
    let reservation_id = snapshot.reservation_id.to_string();
    fabric
        .send_slot_request(slot_request(
            stranger,
            "stranger",
            "edge1",
            "duels",
            &[
                (meta_keys::PARTY_RESERVATION_ID, reservation_id.as_str()),
                (meta_keys::PARTY_TOKEN_ID, "pt-whatever"),
            ],
        ))
        .await;

    let commands = proxy_log.route_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].reason(), Some("party-token-missing"));
}

/// Without an eligible slot the party queues and provisioning is asked with
/// the reservation attached.
#[tokio::test]
async fn party_without_slot_queues_and_provisions() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mega1 = fabric.register_server("Mega", "game");

    fabric
        .bus
        .broadcast(
            channels::SLOT_FAMILY_ADVERTISEMENT,
            Message::SlotFamilyAdvertisement(slotmesh::protocol::SlotFamilyAdvertisement {
                server_id: mega1.clone(),
                families: vec![slotmesh::protocol::FamilyCapacity {
                    family_id: "duels".into(),
                    max_slots: 2,
                }],
            }),
        )
        .await
        .unwrap();
    fabric.settle().await;

    let provision_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::SLOT_PROVISION_COMMAND, &mega1),
    )
    .await;

    let players: Vec<PlayerId> = (0..3).map(|_| Uuid::new_v4()).collect();
    let snapshot = party_snapshot(&players);
    send_party_created(&fabric, snapshot.clone(), "duels").await;

    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.queued_parties, 1);
    assert_eq!(routing.active_parties, 0);

    let provisions = provision_log.provision_commands();
    assert_eq!(provisions.len(), 1);
    assert_eq!(
        provisions[0].metadata.get(meta_keys::PARTY_RESERVATION_ID),
        Some(&snapshot.reservation_id.to_string())
    );
    assert_eq!(
        provisions[0].metadata.get(meta_keys::PARTY_SIZE),
        Some(&"3".to_string())
    );
}

/// Two parties on one two-team slot take team 0 and team 1; a third party
/// must wait.
#[tokio::test]
async fn team_indexes_are_assigned_lowest_first() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mini2 = fabric.register_server("Mini", "game");
    fabric
        .publish_slot(&mini2, "b", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;

    let first: Vec<PlayerId> = (0..2).map(|_| Uuid::new_v4()).collect();
    let second: Vec<PlayerId> = (0..2).map(|_| Uuid::new_v4()).collect();
    let third: Vec<PlayerId> = (0..2).map(|_| Uuid::new_v4()).collect();

    send_party_created(&fabric, party_snapshot(&first), "duels").await;
    send_party_created(&fabric, party_snapshot(&second), "duels").await;
    send_party_created(&fabric, party_snapshot(&third), "duels").await;

    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.active_parties, 2, "both teams taken");
    assert_eq!(routing.queued_parties, 1, "third party waits");
    let slot_id = format!("{mini2}:b");
    assert_eq!(
        routing.pending_occupancy.get(&slot_id.to_lowercase()),
        Some(&4),
        "two held parties of two"
    );
}

/// Claim failures release the allocation and return unclaimed seats.
#[tokio::test]
async fn claim_failures_settle_the_allocation() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mini2 = fabric.register_server("Mini", "game");
    fabric
        .publish_slot(&mini2, "b", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;

    let players: Vec<PlayerId> = (0..2).map(|_| Uuid::new_v4()).collect();
    let snapshot = party_snapshot(&players);
    send_party_created(&fabric, snapshot.clone(), "duels").await;

    for (index, player) in players.iter().enumerate() {
        fabric
            .bus
            .broadcast(
                channels::PARTY_RESERVATION_CLAIMED,
                Message::PartyReservationClaimed(PartyReservationClaimed {
                    reservation_id: snapshot.reservation_id,
                    player_id: *player,
                    success: index == 0,
                    reason: (index != 0).then(|| "left-party".to_string()),
                }),
            )
            .await
            .unwrap();
    }
    fabric.settle().await;

    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.active_parties, 0, "settled by claims");
    assert!(routing.pending_occupancy.is_empty(), "held seats returned");
    let metrics = fabric.metrics.snapshot().await;
    assert_eq!(metrics.parties.releases, 1);
}

/// A roster lock already on the slot when members arrive refuses every
/// dispatch; the refusals settle as claim failures and the allocation
/// releases instead of leaking its seats and team index.
#[tokio::test]
async fn roster_locked_members_settle_as_claim_failures() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mini2 = fabric.register_server("Mini", "game");
    fabric
        .publish_slot(&mini2, "b", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;

    let players: Vec<PlayerId> = (0..2).map(|_| Uuid::new_v4()).collect();
    let snapshot = party_snapshot(&players);
    let slot_id = format!("{mini2}:b");
    send_party_created(&fabric, snapshot.clone(), "duels").await;
    assert_eq!(fabric.routing.snapshot().await.unwrap().active_parties, 1);

    // A match starts on the slot with an unrelated roster before any party
    // member shows up.
    fabric
        .bus
        .broadcast(
            channels::MATCH_ROSTER_CREATED,
            Message::MatchRosterCreated(slotmesh::protocol::MatchRosterCreated {
                slot_id: slot_id.clone(),
                match_id: Uuid::new_v4(),
                players: vec![Uuid::new_v4()],
            }),
        )
        .await
        .unwrap();
    fabric.settle().await;

    let proxy_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::PLAYER_ROUTE_COMMAND, "edge1"),
    )
    .await;

    for player in &players {
        fabric
            .send_slot_request(member_request(*player, &snapshot, "duels"))
            .await;
    }

    let commands = proxy_log.route_commands();
    assert_eq!(commands.len(), 2);
    for command in &commands {
        assert_eq!(command.action, RouteAction::Disconnect);
        assert_eq!(command.reason(), Some("match-roster-locked"));
    }

    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.active_parties, 0, "allocation released, not leaked");
    assert!(routing.pending_occupancy.is_empty(), "held seats returned");
    let metrics = fabric.metrics.snapshot().await;
    assert_eq!(metrics.parties.releases, 1);
    assert_eq!(metrics.rosters.locks_enforced, 2);
}

/// A faulted slot sends the allocation back to the queue front and its
/// waiting members follow the re-allocation.
#[tokio::test]
async fn faulted_slot_requeues_the_party() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mini2 = fabric.register_server("Mini", "game");
    fabric
        .publish_slot(&mini2, "b", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;

    let players: Vec<PlayerId> = (0..2).map(|_| Uuid::new_v4()).collect();
    let snapshot = party_snapshot(&players);
    send_party_created(&fabric, snapshot.clone(), "duels").await;
    assert_eq!(fabric.routing.snapshot().await.unwrap().active_parties, 1);

    fabric
        .publish_slot(&mini2, "b", SlotStatus::Faulted, 8, 0, FAMILY_DUELS)
        .await;

    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.active_parties, 0);
    assert_eq!(routing.queued_parties, 1, "waiting at the queue front");
    assert!(routing.pending_occupancy.is_empty());

    // A second slot brings the party back.
    fabric
        .publish_slot(&mini2, "c", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;
    let routing = fabric.routing.snapshot().await.unwrap();
    assert_eq!(routing.active_parties, 1);
    assert_eq!(routing.queued_parties, 0);
    let new_slot = format!("{mini2}:c");
    assert_eq!(routing.pending_occupancy.get(&new_slot.to_lowercase()), Some(&2));
}

/// Members arriving before the allocation wait and dispatch when it lands.
#[tokio::test]
async fn early_members_wait_for_the_allocation() {
    let fabric = fabric().await;
    fabric.announce_proxy("edge1").await;
    let mini2 = fabric.register_server("Mini", "game");

    let proxy_log = MessageLog::capture(
        &fabric.bus,
        &channels::targeted(channels::PLAYER_ROUTE_COMMAND, "edge1"),
    )
    .await;

    let players: Vec<PlayerId> = (0..2).map(|_| Uuid::new_v4()).collect();
    let snapshot = party_snapshot(&players);

    // Member arrives before any allocation exists.
    fabric
        .send_slot_request(member_request(players[0], &snapshot, "duels"))
        .await;
    assert!(proxy_log.route_commands().is_empty());

    // Slot appears, then the reservation is created and allocated.
    fabric
        .publish_slot(&mini2, "b", SlotStatus::Available, 8, 0, FAMILY_DUELS)
        .await;
    send_party_created(&fabric, snapshot, "duels").await;

    let commands = proxy_log.route_commands();
    assert_eq!(commands.len(), 1, "parked member dispatched on allocation");
    assert_eq!(commands[0].action, RouteAction::Route);
}
