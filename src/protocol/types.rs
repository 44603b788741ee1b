use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = Uuid;
/// Unique identifier for routing requests
pub type RequestId = Uuid;
/// Unique identifier for party reservations
pub type ReservationId = Uuid;

/// Prefix carried by server ids that have not completed registration yet.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Slot-id prefix for environment (non-game) routes.
pub const ENV_SLOT_PREFIX: &str = "env";

/// Slot suffix used on environment route commands.
pub const ENV_SLOT_SUFFIX: &str = "env";

/// Lifecycle status of a registered backend server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    #[default]
    Provisioning,
    Running,
    Available,
    Draining,
    Dead,
}

impl ServerStatus {
    /// Whether the server may receive new slots or environment routes.
    pub fn is_accepting(self) -> bool {
        matches!(self, Self::Running | Self::Available)
    }
}

/// Lifecycle status of a logical slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    #[default]
    Provisioning,
    Available,
    Allocated,
    InGame,
    Cooldown,
    Faulted,
}

impl SlotStatus {
    /// Players may only be dispatched into AVAILABLE or ALLOCATED slots.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Self::Available | Self::Allocated)
    }
}

/// Kind of traffic an edge proxy carries.
///
/// Older proxies do not advertise a kind; those deserialize as `Mixed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyKind {
    #[default]
    Mixed,
    Game,
    Lobby,
}

/// What to do with the player when an environment route cannot be satisfied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentFailureMode {
    /// Disconnect the player with `environment-unavailable`.
    #[default]
    KickOnFail,
    /// Drop the request and leave the player where they are.
    Ignore,
}

/// Action carried by a route command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteAction {
    Route,
    Disconnect,
}

/// Outcome reported by a route acknowledgement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    Success,
    Failed,
}

/// Spawn position attached to route commands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct SpawnPoint {
    #[serde(default, rename = "spawnX")]
    pub x: f64,
    #[serde(default, rename = "spawnY")]
    pub y: f64,
    #[serde(default, rename = "spawnZ")]
    pub z: f64,
    #[serde(default, rename = "spawnYaw")]
    pub yaw: f32,
    #[serde(default, rename = "spawnPitch")]
    pub pitch: f32,
}

/// Metadata keys recognized by the core.
pub mod meta_keys {
    pub const FAMILY: &str = "family";
    pub const VARIANT: &str = "variant";
    pub const FAMILY_VARIANT: &str = "familyVariant";
    pub const GAME_TYPE: &str = "gameType";
    pub const CURRENT_SLOT_ID: &str = "currentSlotId";
    pub const PARTY_RESERVATION_ID: &str = "partyReservationId";
    pub const PARTY_TOKEN_ID: &str = "partyTokenId";
    pub const PARTY_ID: &str = "partyId";
    pub const RESERVATION_TOKEN: &str = "reservationToken";
    pub const TEAM_INDEX: &str = "team.index";
    pub const TEAM_COUNT: &str = "team.count";
    pub const TEAM_MAX: &str = "team.max";
    pub const TARGET_WORLD: &str = "targetWorld";
    pub const SPAWN_X: &str = "spawnX";
    pub const SPAWN_Y: &str = "spawnY";
    pub const SPAWN_Z: &str = "spawnZ";
    pub const SPAWN_YAW: &str = "spawnYaw";
    pub const SPAWN_PITCH: &str = "spawnPitch";
    pub const REASON: &str = "reason";
    pub const ENVIRONMENT: &str = "environment";
    pub const TARGET_SERVER: &str = "targetServer";
    pub const ROUTE_TYPE: &str = "routeType";
    pub const ORIGIN_SERVER: &str = "originServer";
    pub const PARTY_SIZE: &str = "partySize";
}

/// Compose a slot id from its owning server and suffix.
pub fn slot_id(server_id: &str, slot_suffix: &str) -> String {
    format!("{server_id}:{slot_suffix}")
}

/// Compose the synthetic slot id used on environment route commands.
pub fn environment_slot_id(environment_id: &str, server_id: &str) -> String {
    format!("{ENV_SLOT_PREFIX}:{environment_id}:{server_id}")
}

/// Owning server of a slot id, if the id is well formed.
pub fn server_of_slot(slot_id: &str) -> Option<&str> {
    slot_id.split(':').next().filter(|part| !part.is_empty())
}
