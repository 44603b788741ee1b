use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{
    AckStatus, EnvironmentFailureMode, PlayerId, ProxyKind, RequestId, ReservationId, RouteAction,
    ServerStatus, SlotStatus, SpawnPoint,
};

/// A player's request to be routed into a slot of a family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSlotRequest {
    #[serde(alias = "request_id")]
    pub request_id: RequestId,
    #[serde(alias = "player_id")]
    pub player_id: PlayerId,
    #[serde(alias = "player_name")]
    pub player_name: String,
    #[serde(alias = "proxy_id")]
    pub proxy_id: String,
    #[serde(alias = "family_id")]
    pub family_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Registry-to-backend request to reserve one seat on a slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReservationRequest {
    #[serde(alias = "request_id")]
    pub request_id: RequestId,
    #[serde(alias = "player_id")]
    pub player_id: PlayerId,
    #[serde(alias = "player_name")]
    pub player_name: String,
    #[serde(alias = "proxy_id")]
    pub proxy_id: String,
    #[serde(alias = "server_id")]
    pub server_id: String,
    #[serde(alias = "slot_id")]
    pub slot_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Backend's answer to a reservation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReservationResponse {
    #[serde(alias = "request_id")]
    pub request_id: RequestId,
    #[serde(alias = "server_id")]
    pub server_id: String,
    pub accepted: bool,
    #[serde(
        default,
        alias = "reservation_token",
        skip_serializing_if = "Option::is_none"
    )]
    pub reservation_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Command sent to both the proxy and the backend when a player moves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRouteCommand {
    pub action: RouteAction,
    #[serde(alias = "request_id")]
    pub request_id: RequestId,
    #[serde(alias = "player_id")]
    pub player_id: PlayerId,
    #[serde(alias = "player_name")]
    pub player_name: String,
    #[serde(alias = "proxy_id")]
    pub proxy_id: String,
    #[serde(default, alias = "server_id", skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, alias = "slot_id", skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
    #[serde(default, alias = "slot_suffix", skip_serializing_if = "Option::is_none")]
    pub slot_suffix: Option<String>,
    #[serde(default, alias = "target_world", skip_serializing_if = "Option::is_none")]
    pub target_world: Option<String>,
    #[serde(flatten)]
    pub spawn: SpawnPoint,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PlayerRouteCommand {
    /// The disconnect reason attached to a DISCONNECT command, if any.
    pub fn reason(&self) -> Option<&str> {
        self.metadata
            .get(super::types::meta_keys::REASON)
            .map(String::as_str)
    }
}

/// Acknowledgement of a route command, emitted once the move settled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRouteAck {
    #[serde(alias = "request_id")]
    pub request_id: RequestId,
    #[serde(alias = "player_id")]
    pub player_id: PlayerId,
    #[serde(alias = "proxy_id")]
    pub proxy_id: String,
    #[serde(default, alias = "server_id", skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, alias = "slot_id", skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Backend handshake: request a permanent server id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerRegistrationRequest {
    #[serde(alias = "temp_id")]
    pub temp_id: String,
    #[serde(rename = "type", alias = "server_type")]
    pub server_type: String,
    pub role: String,
    pub address: String,
    pub port: u16,
    #[serde(alias = "max_capacity")]
    pub max_capacity: u32,
}

/// Registry's answer to a registration request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerRegistrationResponse {
    pub success: bool,
    #[serde(
        default,
        alias = "assigned_server_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_server_id: Option<String>,
    #[serde(default, alias = "proxy_id", skip_serializing_if = "Option::is_none")]
    pub proxy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Periodic backend liveness report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerHeartbeat {
    #[serde(alias = "server_id")]
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tps: Option<f64>,
    #[serde(default, alias = "player_count")]
    pub player_count: u32,
    #[serde(default, alias = "max_capacity", skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<u32>,
    #[serde(default, alias = "uptime_secs", skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServerStatus>,
}

/// Notification that a backend left the fabric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerRemoval {
    #[serde(alias = "server_id")]
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Slot lifecycle report merged into the registry's slot map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatusUpdate {
    #[serde(alias = "server_id")]
    pub server_id: String,
    #[serde(default, alias = "slot_id", skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
    #[serde(alias = "slot_suffix")]
    pub slot_suffix: String,
    #[serde(default, alias = "game_type", skip_serializing_if = "Option::is_none")]
    pub game_type: Option<String>,
    pub status: SlotStatus,
    #[serde(default, alias = "max_players")]
    pub max_players: u32,
    #[serde(default, alias = "online_players")]
    pub online_players: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One family a backend can host, with its concurrent-slot budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FamilyCapacity {
    #[serde(alias = "family_id")]
    pub family_id: String,
    #[serde(default, alias = "max_slots")]
    pub max_slots: u32,
}

/// Backend advertisement of the families it can provision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotFamilyAdvertisement {
    #[serde(alias = "server_id")]
    pub server_id: String,
    #[serde(default)]
    pub families: Vec<FamilyCapacity>,
}

/// Command asking a backend to spin up a slot for a family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotProvisionCommand {
    #[serde(alias = "family_id")]
    pub family_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Snapshot of a party reservation, as shipped between services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartyReservationSnapshot {
    #[serde(alias = "reservation_id")]
    pub reservation_id: ReservationId,
    #[serde(alias = "party_id")]
    pub party_id: Uuid,
    #[serde(
        default,
        alias = "target_server_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_server_id: Option<String>,
    /// Per-member claim tokens, keyed by player id.
    #[serde(default)]
    pub tokens: HashMap<PlayerId, String>,
    #[serde(default, alias = "variant_id", skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    #[serde(
        default,
        alias = "assigned_team_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_team_index: Option<u32>,
}

impl PartyReservationSnapshot {
    pub fn party_size(&self) -> usize {
        self.tokens.len()
    }
}

/// A party reservation was created and needs slot seats held for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartyReservationCreated {
    pub reservation: PartyReservationSnapshot,
    #[serde(alias = "family_id")]
    pub family_id: String,
    #[serde(default, alias = "variant_id", skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
}

/// One party member claimed (or failed to claim) their reserved seat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartyReservationClaimed {
    #[serde(alias = "reservation_id")]
    pub reservation_id: ReservationId,
    #[serde(alias = "player_id")]
    pub player_id: PlayerId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A match started: its roster is locked for the slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchRosterCreated {
    #[serde(alias = "slot_id")]
    pub slot_id: String,
    #[serde(alias = "match_id")]
    pub match_id: Uuid,
    #[serde(default)]
    pub players: Vec<PlayerId>,
}

/// The match ended: the roster lock is lifted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchRosterEnded {
    #[serde(alias = "slot_id")]
    pub slot_id: String,
}

/// Route a player to a non-game server selected by role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRouteRequest {
    #[serde(alias = "request_id")]
    pub request_id: RequestId,
    #[serde(alias = "player_id")]
    pub player_id: PlayerId,
    #[serde(default, alias = "player_name")]
    pub player_name: String,
    #[serde(alias = "proxy_id")]
    pub proxy_id: String,
    #[serde(alias = "target_environment_id")]
    pub target_environment_id: String,
    #[serde(
        default,
        alias = "target_server_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_server_id: Option<String>,
    #[serde(default, alias = "world_name", skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    #[serde(flatten)]
    pub spawn: SpawnPoint,
    #[serde(default, alias = "failure_mode")]
    pub failure_mode: EnvironmentFailureMode,
    #[serde(
        default,
        alias = "origin_server_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub origin_server_id: Option<String>,
}

/// Edge proxy self-registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyAnnounce {
    #[serde(alias = "proxy_id")]
    pub proxy_id: String,
    pub address: String,
    #[serde(default, alias = "hard_cap")]
    pub hard_cap: u32,
    #[serde(default, alias = "soft_cap")]
    pub soft_cap: u32,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: ProxyKind,
}

/// Periodic proxy liveness report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyHeartbeat {
    #[serde(alias = "proxy_id")]
    pub proxy_id: String,
    #[serde(default, alias = "player_count")]
    pub player_count: u32,
}

/// A proxy is draining and leaving the fabric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyShutdown {
    #[serde(alias = "proxy_id")]
    pub proxy_id: String,
}

/// Ask the registry for the set of known proxies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDiscoveryRequest {}

/// One known proxy, as reported by discovery.
///
/// Older proxies omit `type`; those deserialize as `Mixed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    #[serde(alias = "proxy_id")]
    pub proxy_id: String,
    pub address: String,
    #[serde(default, alias = "player_count")]
    pub player_count: u32,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: ProxyKind,
}

/// Discovery answer listing every live proxy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDiscoveryResponse {
    #[serde(default)]
    pub proxies: Vec<ProxyInfo>,
}

/// Every payload that crosses the message bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    PlayerSlotRequest(PlayerSlotRequest),
    PlayerReservationRequest(PlayerReservationRequest),
    PlayerReservationResponse(PlayerReservationResponse),
    PlayerRouteCommand(Box<PlayerRouteCommand>),
    PlayerRouteAck(PlayerRouteAck),
    ServerRegistrationRequest(ServerRegistrationRequest),
    ServerRegistrationResponse(ServerRegistrationResponse),
    ServerHeartbeat(ServerHeartbeat),
    ServerRemoval(ServerRemoval),
    SlotStatusUpdate(SlotStatusUpdate),
    SlotFamilyAdvertisement(SlotFamilyAdvertisement),
    SlotProvisionCommand(SlotProvisionCommand),
    PartyReservationCreated(PartyReservationCreated),
    PartyReservationClaimed(PartyReservationClaimed),
    MatchRosterCreated(MatchRosterCreated),
    MatchRosterEnded(MatchRosterEnded),
    EnvironmentRouteRequest(EnvironmentRouteRequest),
    ProxyAnnounce(ProxyAnnounce),
    ProxyHeartbeat(ProxyHeartbeat),
    ProxyShutdown(ProxyShutdown),
    ProxyDiscoveryRequest(ProxyDiscoveryRequest),
    ProxyDiscoveryResponse(ProxyDiscoveryResponse),
}

impl Message {
    /// Discriminator name, for logging and guard messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayerSlotRequest(_) => "PlayerSlotRequest",
            Self::PlayerReservationRequest(_) => "PlayerReservationRequest",
            Self::PlayerReservationResponse(_) => "PlayerReservationResponse",
            Self::PlayerRouteCommand(_) => "PlayerRouteCommand",
            Self::PlayerRouteAck(_) => "PlayerRouteAck",
            Self::ServerRegistrationRequest(_) => "ServerRegistrationRequest",
            Self::ServerRegistrationResponse(_) => "ServerRegistrationResponse",
            Self::ServerHeartbeat(_) => "ServerHeartbeat",
            Self::ServerRemoval(_) => "ServerRemoval",
            Self::SlotStatusUpdate(_) => "SlotStatusUpdate",
            Self::SlotFamilyAdvertisement(_) => "SlotFamilyAdvertisement",
            Self::SlotProvisionCommand(_) => "SlotProvisionCommand",
            Self::PartyReservationCreated(_) => "PartyReservationCreated",
            Self::PartyReservationClaimed(_) => "PartyReservationClaimed",
            Self::MatchRosterCreated(_) => "MatchRosterCreated",
            Self::MatchRosterEnded(_) => "MatchRosterEnded",
            Self::EnvironmentRouteRequest(_) => "EnvironmentRouteRequest",
            Self::ProxyAnnounce(_) => "ProxyAnnounce",
            Self::ProxyHeartbeat(_) => "ProxyHeartbeat",
            Self::ProxyShutdown(_) => "ProxyShutdown",
            Self::ProxyDiscoveryRequest(_) => "ProxyDiscoveryRequest",
            Self::ProxyDiscoveryResponse(_) => "ProxyDiscoveryResponse",
        }
    }
}
