use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::protocol::{
    meta_keys, PartyReservationSnapshot, PlayerId, PlayerSlotRequest, ReservationId,
};
use crate::registry::SlotRecord;

/// A routing attempt that is queued or between dispatch attempts.
#[derive(Debug, Clone)]
pub struct PlayerRequestContext {
    pub request: PlayerSlotRequest,
    pub created_at: DateTime<Utc>,
    pub last_enqueued_at: DateTime<Utc>,
    pub retries: u32,
    /// The slot the player is currently on; never re-chosen.
    pub blocked_slot_id: Option<String>,
    /// Requested variant filter, resolved from the request metadata.
    pub variant_id: Option<String>,
}

impl PlayerRequestContext {
    /// Build a context from an inbound request. `active_slot` is the
    /// player's last observed slot, used when the request does not carry a
    /// `currentSlotId` of its own.
    pub fn new(request: PlayerSlotRequest, active_slot: Option<String>) -> Self {
        let now = Utc::now();
        let blocked_slot_id = request
            .metadata
            .get(meta_keys::CURRENT_SLOT_ID)
            .cloned()
            .or(active_slot);
        let variant_id = [
            meta_keys::VARIANT,
            meta_keys::FAMILY_VARIANT,
            meta_keys::GAME_TYPE,
        ]
        .iter()
        .find_map(|key| request.metadata.get(*key))
        .filter(|value| !value.trim().is_empty())
        .cloned();

        Self {
            request,
            created_at: now,
            last_enqueued_at: now,
            retries: 0,
            blocked_slot_id,
            variant_id,
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Whether the context has spent longer than `max_wait` in the system.
    pub fn exceeded_wait(&self, max_wait: std::time::Duration) -> bool {
        self.age().to_std().unwrap_or_default() >= max_wait
    }

    /// The party reservation this request belongs to, when present.
    pub fn party_reservation_id(&self) -> Option<ReservationId> {
        self.request
            .metadata
            .get(meta_keys::PARTY_RESERVATION_ID)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    pub fn variant(&self) -> &str {
        self.variant_id.as_deref().unwrap_or("")
    }
}

/// A dispatched route awaiting its acknowledgement.
pub struct InFlightRoute {
    pub context: PlayerRequestContext,
    pub slot_id: String,
    pub server_id: String,
    pub party_reservation_id: Option<ReservationId>,
    pub dispatched_at: Instant,
    pub timeout: tokio::task::JoinHandle<()>,
}

/// A reservation request awaiting the backend's response.
pub struct PendingReservation {
    pub context: PlayerRequestContext,
    pub slot: SlotRecord,
    pub timeout: tokio::task::JoinHandle<()>,
}

/// Seats held on one slot for a party reservation.
#[derive(Debug, Clone)]
pub struct PartyAllocation {
    pub snapshot: PartyReservationSnapshot,
    pub slot_id: String,
    pub server_id: String,
    pub family_id: String,
    pub variant_id: Option<String>,
    pub party_size: u32,
    /// −1 when the slot is not team-based
    pub team_index: i32,
    /// Members whose route command went out at least once
    pub dispatched: HashSet<PlayerId>,
    /// Members whose route was acknowledged SUCCESS
    pub completed: HashSet<PlayerId>,
    /// Members that claimed their seat on the backend
    pub claimed: HashSet<PlayerId>,
    pub claim_failures: HashMap<PlayerId, String>,
    /// Seats still held for members that have not dispatched yet
    pub held_seats: u32,
}

impl PartyAllocation {
    /// Release condition from claim accounting.
    pub fn claims_settled(&self) -> bool {
        (self.claimed.len() + self.claim_failures.len()) as u32 >= self.party_size
    }

    /// Release condition from route acknowledgements: every member either
    /// acknowledged their route or can no longer arrive.
    pub fn fully_completed(&self) -> bool {
        (self.completed.len() + self.claim_failures.len()) as u32 >= self.party_size
    }
}

/// A party reservation waiting for an eligible slot.
#[derive(Debug, Clone)]
pub struct QueuedPartyReservation {
    pub snapshot: PartyReservationSnapshot,
    pub family_id: String,
    pub variant_id: Option<String>,
}

/// The locked roster of an in-game slot.
#[derive(Debug, Clone)]
pub struct MatchRosterSnapshot {
    pub match_id: Uuid,
    pub players: HashSet<PlayerId>,
    pub updated_at: DateTime<Utc>,
}
