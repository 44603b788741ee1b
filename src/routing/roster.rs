//! Match roster locks.
//!
//! The routing service never creates rosters; it consumes them. While a
//! roster is stored for a slot, only its members may be routed there.

use std::collections::HashSet;

use crate::protocol::{MatchRosterCreated, MatchRosterEnded};

use super::context::MatchRosterSnapshot;
use super::state::slot_key;
use super::RoutingWorker;

impl RoutingWorker {
    pub(crate) fn on_roster_created(&mut self, created: MatchRosterCreated) {
        let key = slot_key(&created.slot_id);
        let players: HashSet<_> = created.players.iter().copied().collect();
        tracing::info!(
            slot_id = %created.slot_id,
            match_id = %created.match_id,
            players = players.len(),
            "Match roster locked"
        );
        for player_id in &players {
            self.state
                .player_active_slots
                .insert(*player_id, created.slot_id.clone());
        }
        self.state.match_rosters.insert(
            key,
            MatchRosterSnapshot {
                match_id: created.match_id,
                players,
                updated_at: chrono::Utc::now(),
            },
        );
    }

    pub(crate) fn on_roster_ended(&mut self, ended: MatchRosterEnded) {
        let key = slot_key(&ended.slot_id);
        if self.state.match_rosters.remove(&key).is_some() {
            tracing::info!(slot_id = %ended.slot_id, "Match roster lifted");
        }
        self.state
            .player_active_slots
            .retain(|_, slot_id| slot_key(slot_id) != key);
    }
}
