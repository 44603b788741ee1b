//! Slot eligibility rules.

use crate::protocol::PlayerId;
use crate::registry::SlotRecord;

use super::state::{slot_key, RoutingState};

/// Whether `slot` can take one more player for the given request shape.
///
/// All of the following must hold: the slot is dispatchable, the variant
/// filter matches, the slot is not the player's current slot, there is seat
/// room left after pending commitments, and any roster lock admits the
/// player. (Family matching happens upstream, when slots are collected.)
pub fn slot_eligible(
    state: &RoutingState,
    slot: &SlotRecord,
    player_id: &PlayerId,
    variant_id: &str,
    blocked_slot_id: Option<&str>,
) -> bool {
    if !slot.status.is_dispatchable() {
        return false;
    }
    if !slot.variant_matches(variant_id) {
        return false;
    }
    if blocked_slot_id.is_some_and(|blocked| slot_key(blocked) == slot_key(&slot.slot_id)) {
        return false;
    }
    if !has_seat_room(state, slot, 1) {
        return false;
    }
    state.roster_allows(&slot.slot_id, player_id)
}

/// Whether `seats` more players fit, counting pending commitments.
/// `maxPlayers == 0` means uncapped.
pub fn has_seat_room(state: &RoutingState, slot: &SlotRecord, seats: u32) -> bool {
    if slot.max_players == 0 {
        return true;
    }
    slot.online_players + state.committed_seats(&slot.slot_id) + seats <= slot.max_players
}

/// Whether a party of `party_size` fits: seat room, per-team cap, and a free
/// team when the slot is team-based.
pub fn slot_fits_party(state: &RoutingState, slot: &SlotRecord, party_size: u32) -> bool {
    if !has_seat_room(state, slot, party_size) {
        return false;
    }
    if let Some(team_max) = slot.team_max() {
        if party_size > team_max {
            return false;
        }
    }
    let team_count = slot.team_count();
    if team_count > 0 {
        let used = state.used_team_indexes(&slot.slot_id).len() as u32;
        if used >= team_count {
            return false;
        }
    }
    true
}

/// Lowest unused team index on a slot, when team-based.
pub fn pick_team_index(state: &RoutingState, slot: &SlotRecord) -> Option<i32> {
    let team_count = slot.team_count();
    if team_count == 0 {
        return Some(-1);
    }
    let used = state.used_team_indexes(&slot.slot_id);
    (0..team_count as i32).find(|index| !used.contains(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{meta_keys, SlotStatus};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn slot(slot_id: &str, status: SlotStatus, max: u32, online: u32) -> SlotRecord {
        SlotRecord {
            slot_id: slot_id.to_string(),
            server_id: "mini1".into(),
            slot_suffix: slot_id.split(':').nth(1).unwrap_or("a").to_string(),
            game_type: Some("bedwars".into()),
            status,
            max_players: max,
            online_players: online,
            metadata: HashMap::from([
                (meta_keys::FAMILY.to_string(), "bedwars".to_string()),
                (meta_keys::VARIANT.to_string(), "solo".to_string()),
            ]),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn dispatchable_statuses_only() {
        let state = RoutingState::default();
        let player = Uuid::new_v4();
        for (status, expected) in [
            (SlotStatus::Available, true),
            (SlotStatus::Allocated, true),
            (SlotStatus::InGame, false),
            (SlotStatus::Faulted, false),
        ] {
            let slot = slot("mini1:a", status, 10, 0);
            assert_eq!(
                slot_eligible(&state, &slot, &player, "", None),
                expected,
                "status {status:?}"
            );
        }
    }

    #[test]
    fn blocked_slot_is_skipped_case_insensitively() {
        let state = RoutingState::default();
        let player = Uuid::new_v4();
        let slot = slot("mini1:a", SlotStatus::Available, 10, 0);
        assert!(!slot_eligible(&state, &slot, &player, "", Some("MINI1:A")));
        assert!(slot_eligible(&state, &slot, &player, "", Some("mini1:b")));
    }

    #[test]
    fn capacity_counts_pending_commitments() {
        let mut state = RoutingState::default();
        let player = Uuid::new_v4();
        let slot = slot("mini1:a", SlotStatus::Available, 2, 1);
        assert!(slot_eligible(&state, &slot, &player, "", None));

        state.occupancy_add("mini1:a", 1);
        assert!(
            !slot_eligible(&state, &slot, &player, "", None),
            "online + pending reach capacity"
        );
    }

    #[test]
    fn zero_capacity_means_uncapped() {
        let mut state = RoutingState::default();
        let player = Uuid::new_v4();
        let slot = slot("mini1:a", SlotStatus::Available, 0, 5_000);
        state.occupancy_add("mini1:a", 5_000);
        assert!(slot_eligible(&state, &slot, &player, "", None));
        assert!(slot_fits_party(&state, &slot, 1_000));
    }

    #[test]
    fn party_fit_honors_team_caps() {
        let state = RoutingState::default();
        let mut team_slot = slot("mini2:b", SlotStatus::Available, 8, 0);
        team_slot
            .metadata
            .insert(meta_keys::TEAM_COUNT.to_string(), "2".to_string());
        team_slot
            .metadata
            .insert(meta_keys::TEAM_MAX.to_string(), "4".to_string());

        assert!(slot_fits_party(&state, &team_slot, 4));
        assert!(!slot_fits_party(&state, &team_slot, 5), "over team.max");
    }

    #[test]
    fn team_index_assignment_picks_lowest_free() {
        let state = RoutingState::default();
        let mut team_slot = slot("mini2:b", SlotStatus::Available, 8, 0);
        team_slot
            .metadata
            .insert(meta_keys::TEAM_COUNT.to_string(), "2".to_string());
        assert_eq!(pick_team_index(&state, &team_slot), Some(0));

        let plain = slot("mini1:a", SlotStatus::Available, 10, 0);
        assert_eq!(pick_team_index(&state, &plain), Some(-1));
    }
}
