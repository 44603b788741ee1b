//! Channel names used by the core. These are wire-level contract: peers in
//! other processes subscribe to the same strings.

pub const REGISTRY_PLAYER_REQUEST: &str = "registry.player.request";
pub const REGISTRY_SLOT_STATUS: &str = "registry.slot.status";
pub const PLAYER_ROUTE_COMMAND: &str = "player.route.command";
pub const PLAYER_ROUTE_ACK: &str = "player.route.ack";
pub const PLAYER_RESERVATION_REQUEST: &str = "player.reservation.request";
pub const PLAYER_RESERVATION_RESPONSE: &str = "player.reservation.response";
pub const PARTY_RESERVATION_CREATED: &str = "party.reservation.created";
pub const PARTY_RESERVATION_CLAIMED: &str = "party.reservation.claimed";
pub const MATCH_ROSTER_CREATED: &str = "match.roster.created";
pub const MATCH_ROSTER_ENDED: &str = "match.roster.ended";
pub const REGISTRY_ENVIRONMENT_ROUTE_REQUEST: &str = "registry.environment.route.request";
pub const SERVER_REGISTRATION_REQUEST: &str = "server.registration.request";
pub const SERVER_REGISTRATION_RESPONSE: &str = "server.registration.response";
pub const SERVER_HEARTBEAT: &str = "server.heartbeat";
pub const SERVER_REMOVAL: &str = "server.removal";
pub const SLOT_FAMILY_ADVERTISEMENT: &str = "slot.family.advertisement";
pub const SLOT_PROVISION_COMMAND: &str = "slot.provision.command";
pub const PROXY_ANNOUNCE: &str = "proxy.announce";
pub const PROXY_HEARTBEAT: &str = "proxy.heartbeat";
pub const PROXY_SHUTDOWN: &str = "proxy.shutdown";
pub const PROXY_DISCOVERY: &str = "proxy.discovery";
pub const PROXY_DISCOVERY_RESPONSE: &str = "proxy.discovery.response";

/// Per-server route channel; the backend pre-stages the handoff from it.
pub const SERVER_PLAYER_ROUTE: &str = "server.player.route";

/// Targeted form of a channel, delivered only to `target_id`.
pub fn targeted(channel: &str, target_id: &str) -> String {
    format!("{channel}:{target_id}")
}
