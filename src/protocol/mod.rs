//! Wire protocol for the slotmesh fabric.
//!
//! Every payload that crosses the message bus lives here, as a serde type
//! tagged with a `type` discriminator. Field names are camelCase on the wire
//! with snake_case accepted on inbound messages; unknown fields are ignored.

pub mod messages;
pub mod reasons;
pub mod types;
pub mod validation;

pub use messages::{
    EnvironmentRouteRequest, FamilyCapacity, MatchRosterCreated, MatchRosterEnded, Message,
    PartyReservationClaimed, PartyReservationCreated, PartyReservationSnapshot,
    PlayerReservationRequest, PlayerReservationResponse, PlayerRouteAck, PlayerRouteCommand,
    PlayerSlotRequest, ProxyAnnounce, ProxyDiscoveryRequest, ProxyDiscoveryResponse,
    ProxyHeartbeat, ProxyInfo, ProxyShutdown, ServerHeartbeat, ServerRegistrationRequest,
    ServerRegistrationResponse, ServerRemoval, SlotFamilyAdvertisement, SlotProvisionCommand,
    SlotStatusUpdate,
};

pub use types::{
    environment_slot_id, meta_keys, server_of_slot, slot_id, AckStatus, EnvironmentFailureMode,
    PlayerId, ProxyKind, RequestId, ReservationId, RouteAction, ServerStatus, SlotStatus,
    SpawnPoint, ENV_SLOT_PREFIX, ENV_SLOT_SUFFIX, TEMP_ID_PREFIX,
};
