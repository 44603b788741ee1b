use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use uuid::Uuid;

use crate::protocol::{PlayerId, RequestId, ReservationId, SlotStatus};

use super::context::{
    InFlightRoute, MatchRosterSnapshot, PartyAllocation, PendingReservation,
    PlayerRequestContext, QueuedPartyReservation,
};

/// All mutable routing state. Owned by the single worker task; no internal
/// locking.
#[derive(Default)]
pub struct RoutingState {
    /// FIFO queue per lowercase family id
    pub pending_queues: HashMap<String, VecDeque<PlayerRequestContext>>,
    /// Dispatched-but-unacked routes by request id
    pub in_flight: HashMap<RequestId, InFlightRoute>,
    /// Reserved-but-not-yet-acked seats per lowercase slot id
    pub pending_occupancy: HashMap<String, u32>,
    /// Outstanding reservation attempts per lowercase slot id
    pub reserving: HashMap<String, u32>,
    /// Parked reservation RPCs by reservation request id
    pub pending_reservations: HashMap<Uuid, PendingReservation>,
    /// Live party allocations by reservation id
    pub active_parties: HashMap<ReservationId, PartyAllocation>,
    /// Parties waiting for an eligible slot, per lowercase family id
    pub pending_party_reservations: HashMap<String, VecDeque<QueuedPartyReservation>>,
    /// Party member requests that arrived before their allocation
    pub pending_party_player_requests: HashMap<ReservationId, VecDeque<PlayerRequestContext>>,
    /// Roster locks per lowercase slot id
    pub match_rosters: HashMap<String, MatchRosterSnapshot>,
    /// Last observed slot per player
    pub player_active_slots: HashMap<PlayerId, String>,
    /// Last status seen per lowercase slot id, for replay no-ops
    pub known_slot_status: HashMap<String, SlotStatus>,
    /// Request ids currently anywhere in the pipeline, for duplicate delivery
    pub active_requests: HashSet<RequestId>,
}

/// Lowercase key used for slot-indexed state maps; blocked-slot and
/// occupancy matching are case-insensitive.
pub fn slot_key(slot_id: &str) -> String {
    slot_id.to_ascii_lowercase()
}

impl RoutingState {
    pub fn occupancy(&self, slot_id: &str) -> u32 {
        self.pending_occupancy
            .get(&slot_key(slot_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn reserving_count(&self, slot_id: &str) -> u32 {
        self.reserving.get(&slot_key(slot_id)).copied().unwrap_or(0)
    }

    /// Seats already spoken for on a slot: reserved seats plus in-flight
    /// reservation attempts.
    pub fn committed_seats(&self, slot_id: &str) -> u32 {
        self.occupancy(slot_id) + self.reserving_count(slot_id)
    }

    pub fn occupancy_add(&mut self, slot_id: &str, seats: u32) {
        if seats > 0 {
            *self.pending_occupancy.entry(slot_key(slot_id)).or_insert(0) += seats;
        }
    }

    pub fn occupancy_sub(&mut self, slot_id: &str, seats: u32) {
        let key = slot_key(slot_id);
        if let Some(count) = self.pending_occupancy.get_mut(&key) {
            *count = count.saturating_sub(seats);
            if *count == 0 {
                self.pending_occupancy.remove(&key);
            }
        }
    }

    pub fn reserving_add(&mut self, slot_id: &str) {
        *self.reserving.entry(slot_key(slot_id)).or_insert(0) += 1;
    }

    pub fn reserving_sub(&mut self, slot_id: &str) {
        let key = slot_key(slot_id);
        if let Some(count) = self.reserving.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.reserving.remove(&key);
            }
        }
    }

    /// Team indexes already taken by allocations on a slot.
    pub fn used_team_indexes(&self, slot_id: &str) -> HashSet<i32> {
        let key = slot_key(slot_id);
        self.active_parties
            .values()
            .filter(|allocation| slot_key(&allocation.slot_id) == key && allocation.team_index >= 0)
            .map(|allocation| allocation.team_index)
            .collect()
    }

    pub fn roster_allows(&self, slot_id: &str, player_id: &PlayerId) -> bool {
        match self.match_rosters.get(&slot_key(slot_id)) {
            Some(roster) => roster.players.contains(player_id),
            None => true,
        }
    }

    /// Consistent view for observers.
    pub fn snapshot(&self, accepting: bool) -> RoutingSnapshot {
        RoutingSnapshot {
            accepting,
            queued_requests: self
                .pending_queues
                .iter()
                .map(|(family, queue)| (family.clone(), queue.len()))
                .collect(),
            in_flight_routes: self.in_flight.len(),
            pending_reservations: self.pending_reservations.len(),
            pending_occupancy: self.pending_occupancy.clone(),
            active_parties: self.active_parties.len(),
            queued_parties: self
                .pending_party_reservations
                .values()
                .map(VecDeque::len)
                .sum(),
            match_rosters: self.match_rosters.len(),
            tracked_players: self.player_active_slots.len(),
        }
    }
}

/// Serialized view of the routing state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingSnapshot {
    pub accepting: bool,
    pub queued_requests: HashMap<String, usize>,
    pub in_flight_routes: usize,
    pub pending_reservations: usize,
    pub pending_occupancy: HashMap<String, u32>,
    pub active_parties: usize,
    pub queued_parties: usize,
    pub match_rosters: usize,
    pub tracked_players: usize,
}
