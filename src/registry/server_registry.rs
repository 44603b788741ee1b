use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::protocol::{
    meta_keys, slot_id, validation, ServerHeartbeat, ServerRegistrationRequest, ServerStatus,
    SlotStatus, SlotStatusUpdate, SpawnPoint, TEMP_ID_PREFIX,
};

/// A logical slot hosted by one backend server.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlotRecord {
    pub slot_id: String,
    pub server_id: String,
    pub slot_suffix: String,
    pub game_type: Option<String>,
    pub status: SlotStatus,
    pub max_players: u32,
    pub online_players: u32,
    pub metadata: HashMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl SlotRecord {
    pub fn family(&self) -> Option<&str> {
        self.metadata.get(meta_keys::FAMILY).map(String::as_str)
    }

    pub fn variant(&self) -> Option<&str> {
        self.metadata.get(meta_keys::VARIANT).map(String::as_str)
    }

    /// Case-insensitive family match.
    pub fn family_matches(&self, family_id: &str) -> bool {
        self.family()
            .is_some_and(|family| family.eq_ignore_ascii_case(family_id))
    }

    /// A requested variant matches the slot's `variant` metadata, its game
    /// type, or its `familyVariant` metadata, case-insensitively.
    pub fn variant_matches(&self, variant_id: &str) -> bool {
        if variant_id.trim().is_empty() {
            return true;
        }
        let candidates = [
            self.variant(),
            self.game_type.as_deref(),
            self.metadata
                .get(meta_keys::FAMILY_VARIANT)
                .map(String::as_str),
        ];
        candidates
            .into_iter()
            .flatten()
            .any(|candidate| candidate.eq_ignore_ascii_case(variant_id))
    }

    /// Per-team seat cap, when the slot is team-based.
    pub fn team_max(&self) -> Option<u32> {
        self.metadata
            .get(meta_keys::TEAM_MAX)
            .and_then(|raw| raw.parse().ok())
    }

    /// Number of teams on the slot: explicit `team.count`, otherwise derived
    /// from the seat cap. Zero means the slot is not team-based.
    pub fn team_count(&self) -> u32 {
        if let Some(count) = self
            .metadata
            .get(meta_keys::TEAM_COUNT)
            .and_then(|raw| raw.parse().ok())
        {
            return count;
        }
        match self.team_max() {
            Some(team_max) => self.max_players / team_max.max(1),
            None => 0,
        }
    }

    /// Spawn position advertised in the slot metadata.
    pub fn spawn(&self) -> SpawnPoint {
        let parse_f64 = |key: &str| {
            self.metadata
                .get(key)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or_default()
        };
        let parse_f32 = |key: &str| {
            self.metadata
                .get(key)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or_default()
        };
        SpawnPoint {
            x: parse_f64(meta_keys::SPAWN_X),
            y: parse_f64(meta_keys::SPAWN_Y),
            z: parse_f64(meta_keys::SPAWN_Z),
            yaw: parse_f32(meta_keys::SPAWN_YAW),
            pitch: parse_f32(meta_keys::SPAWN_PITCH),
        }
    }

    pub fn target_world(&self) -> Option<&str> {
        self.metadata
            .get(meta_keys::TARGET_WORLD)
            .map(String::as_str)
    }
}

/// A registered backend server and its slots.
#[derive(Debug, Clone, Serialize)]
pub struct ServerRecord {
    pub server_id: String,
    pub server_type: String,
    pub role: String,
    pub address: String,
    pub port: u16,
    pub max_capacity: u32,
    pub current_player_count: u32,
    pub status: ServerStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    /// Slots keyed by suffix
    pub slots: HashMap<String, SlotRecord>,
}

/// Cross-service view of one server, copied on read.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServerSummary {
    pub server_id: String,
    pub role: String,
    pub status: ServerStatus,
    pub current_player_count: u32,
    pub max_capacity: u32,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl From<&ServerRecord> for ServerSummary {
    fn from(record: &ServerRecord) -> Self {
        Self {
            server_id: record.server_id.clone(),
            role: record.role.clone(),
            status: record.status,
            current_player_count: record.current_player_count,
            max_capacity: record.max_capacity,
            last_heartbeat_at: record.last_heartbeat_at,
        }
    }
}

/// Result of merging one slot status update.
#[derive(Debug, Clone)]
pub struct SlotUpdateOutcome {
    pub snapshot: SlotRecord,
    pub previous_status: Option<SlotStatus>,
}

/// Registry of backend servers, updated by registration, heartbeat, slot
/// status, and removal messages.
pub struct ServerRegistry {
    servers: DashMap<String, ServerRecord>,
    type_counters: DashMap<String, u64>,
    registry_id: String,
}

impl ServerRegistry {
    pub fn new(registry_id: impl Into<String>) -> Self {
        Self {
            servers: DashMap::new(),
            type_counters: DashMap::new(),
            registry_id: registry_id.into(),
        }
    }

    /// Identifier this registry reports in registration responses.
    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }

    /// Registration handshake: validate, assign a permanent id, store the
    /// record. Re-registration under an already-permanent id keeps the
    /// server's existing slots.
    pub fn register(&self, request: &ServerRegistrationRequest) -> Result<String, String> {
        validation::validate_registration(request)?;

        let assigned_id = if request.temp_id.starts_with(TEMP_ID_PREFIX) {
            let mut counter = self
                .type_counters
                .entry(request.server_type.to_lowercase())
                .or_insert(0);
            *counter += 1;
            format!("{}{}", request.server_type.to_lowercase(), *counter)
        } else {
            request.temp_id.clone()
        };

        let now = Utc::now();
        let mut record = self
            .servers
            .remove(&assigned_id)
            .map(|(_, existing)| existing)
            .unwrap_or_else(|| ServerRecord {
                server_id: assigned_id.clone(),
                server_type: request.server_type.clone(),
                role: request.role.clone(),
                address: request.address.clone(),
                port: request.port,
                max_capacity: request.max_capacity,
                current_player_count: 0,
                status: ServerStatus::Running,
                last_heartbeat_at: now,
                registered_at: now,
                slots: HashMap::new(),
            });
        record.server_type = request.server_type.clone();
        record.role = request.role.clone();
        record.address = request.address.clone();
        record.port = request.port;
        record.max_capacity = request.max_capacity;
        record.status = ServerStatus::Running;
        record.last_heartbeat_at = now;
        self.servers.insert(assigned_id.clone(), record);

        tracing::info!(server_id = %assigned_id, server_type = %request.server_type, "Server registered");
        Ok(assigned_id)
    }

    /// Merge a heartbeat; returns false when the server is unknown.
    pub fn apply_heartbeat(&self, heartbeat: &ServerHeartbeat) -> bool {
        let Some(mut record) = self.servers.get_mut(&heartbeat.server_id) else {
            return false;
        };
        record.last_heartbeat_at = Utc::now();
        record.current_player_count = heartbeat.player_count;
        if let Some(max_capacity) = heartbeat.max_capacity {
            record.max_capacity = max_capacity;
        }
        if let Some(status) = heartbeat.status {
            record.status = status;
        }
        true
    }

    /// Merge one slot status update into the owning server's slot map,
    /// creating the slot when missing. Returns `None` for unknown servers.
    pub fn apply_slot_update(&self, update: &SlotStatusUpdate) -> Option<SlotUpdateOutcome> {
        let mut record = self.servers.get_mut(&update.server_id)?;
        let full_slot_id = update
            .slot_id
            .clone()
            .unwrap_or_else(|| slot_id(&update.server_id, &update.slot_suffix));

        let now = Utc::now();
        let previous_status;
        let snapshot = match record.slots.get_mut(&update.slot_suffix) {
            Some(slot) => {
                previous_status = Some(slot.status);
                slot.status = update.status;
                slot.max_players = update.max_players;
                slot.online_players = update.online_players;
                if update.game_type.is_some() {
                    slot.game_type = update.game_type.clone();
                }
                for (key, value) in &update.metadata {
                    slot.metadata.insert(key.clone(), value.clone());
                }
                slot.updated_at = now;
                slot.clone()
            }
            None => {
                previous_status = None;
                let slot = SlotRecord {
                    slot_id: full_slot_id,
                    server_id: update.server_id.clone(),
                    slot_suffix: update.slot_suffix.clone(),
                    game_type: update.game_type.clone(),
                    status: update.status,
                    max_players: update.max_players,
                    online_players: update.online_players,
                    metadata: update.metadata.clone(),
                    updated_at: now,
                };
                record.slots.insert(update.slot_suffix.clone(), slot.clone());
                slot
            }
        };

        Some(SlotUpdateOutcome {
            snapshot,
            previous_status,
        })
    }

    /// Remove a server, returning its record (with slots) when it existed.
    pub fn remove_server(&self, server_id: &str) -> Option<ServerRecord> {
        self.servers.remove(server_id).map(|(_, record)| record)
    }

    /// Server ids whose heartbeat is older than `timeout`.
    pub fn collect_stale(&self, timeout: std::time::Duration) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(90));
        self.servers
            .iter()
            .filter(|entry| entry.last_heartbeat_at < cutoff)
            .map(|entry| entry.server_id.clone())
            .collect()
    }

    pub fn contains(&self, server_id: &str) -> bool {
        self.servers.contains_key(server_id)
    }

    pub fn get(&self, server_id: &str) -> Option<ServerRecord> {
        self.servers.get(server_id).map(|entry| entry.clone())
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Copy-on-read view of every server.
    pub fn snapshot(&self) -> Vec<ServerRecord> {
        self.servers.iter().map(|entry| entry.clone()).collect()
    }

    /// Copy-on-read view of one slot by its full id.
    pub fn slot(&self, slot_id: &str) -> Option<SlotRecord> {
        let server_id = crate::protocol::server_of_slot(slot_id)?;
        let record = self.servers.get(server_id)?;
        record
            .slots
            .values()
            .find(|slot| slot.slot_id.eq_ignore_ascii_case(slot_id))
            .cloned()
    }

    /// All slots of a family, across servers, copy-on-read.
    pub fn slots_in_family(&self, family_id: &str) -> Vec<SlotRecord> {
        self.servers
            .iter()
            .flat_map(|entry| {
                entry
                    .slots
                    .values()
                    .filter(|slot| slot.family_matches(family_id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Slots of a family hosted by one specific server.
    pub fn slots_on_server(&self, server_id: &str, family_id: &str) -> Vec<SlotRecord> {
        self.servers
            .get(server_id)
            .map(|record| {
                record
                    .slots
                    .values()
                    .filter(|slot| slot.family_matches(family_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn server_summary(&self, server_id: &str) -> Option<ServerSummary> {
        self.servers
            .get(server_id)
            .map(|record| ServerSummary::from(&*record))
    }

    /// Servers whose role matches, case-insensitively.
    pub fn servers_with_role(&self, role: &str) -> Vec<ServerSummary> {
        self.servers
            .iter()
            .filter(|entry| entry.role.eq_ignore_ascii_case(role))
            .map(|entry| ServerSummary::from(&*entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registration(temp_id: &str, server_type: &str) -> ServerRegistrationRequest {
        ServerRegistrationRequest {
            temp_id: temp_id.into(),
            server_type: server_type.into(),
            role: "game".into(),
            address: "10.0.0.2".into(),
            port: 25566,
            max_capacity: 100,
        }
    }

    fn slot_update(server_id: &str, suffix: &str, status: SlotStatus) -> SlotStatusUpdate {
        SlotStatusUpdate {
            server_id: server_id.into(),
            slot_id: None,
            slot_suffix: suffix.into(),
            game_type: Some("bedwars".into()),
            status,
            max_players: 10,
            online_players: 0,
            metadata: HashMap::from([(meta_keys::FAMILY.to_string(), "bedwars".to_string())]),
        }
    }

    #[test]
    fn temp_ids_get_monotonic_per_type_ids() {
        let registry = ServerRegistry::new("registry-test");
        assert_eq!(
            registry.register(&registration("temp-a", "Mini")).unwrap(),
            "mini1"
        );
        assert_eq!(
            registry.register(&registration("temp-b", "Mini")).unwrap(),
            "mini2"
        );
        assert_eq!(
            registry.register(&registration("temp-c", "Mega")).unwrap(),
            "mega1"
        );
    }

    #[test]
    fn permanent_ids_are_reused_and_slots_survive() {
        let registry = ServerRegistry::new("registry-test");
        let id = registry.register(&registration("temp-a", "Mini")).unwrap();
        registry
            .apply_slot_update(&slot_update(&id, "a", SlotStatus::Available))
            .unwrap();

        let again = registry.register(&registration(&id, "Mini")).unwrap();
        assert_eq!(again, id);
        assert_eq!(registry.get(&id).unwrap().slots.len(), 1);
    }

    #[test]
    fn invalid_registration_is_rejected() {
        let registry = ServerRegistry::new("registry-test");
        let mut bad = registration("temp-a", "Mini");
        bad.max_capacity = 0;
        assert!(registry.register(&bad).is_err());
        assert_eq!(registry.server_count(), 0);
    }

    #[test]
    fn slot_updates_merge_and_report_previous_status() {
        let registry = ServerRegistry::new("registry-test");
        let id = registry.register(&registration("temp-a", "Mini")).unwrap();

        let first = registry
            .apply_slot_update(&slot_update(&id, "a", SlotStatus::Provisioning))
            .unwrap();
        assert_eq!(first.previous_status, None);
        assert_eq!(first.snapshot.slot_id, format!("{id}:a"));

        let second = registry
            .apply_slot_update(&slot_update(&id, "a", SlotStatus::Available))
            .unwrap();
        assert_eq!(second.previous_status, Some(SlotStatus::Provisioning));
        assert_eq!(second.snapshot.status, SlotStatus::Available);
    }

    #[test]
    fn unknown_server_slot_update_is_ignored() {
        let registry = ServerRegistry::new("registry-test");
        assert!(registry
            .apply_slot_update(&slot_update("ghost1", "a", SlotStatus::Available))
            .is_none());
    }

    #[test]
    fn stale_servers_are_collected() {
        let registry = ServerRegistry::new("registry-test");
        let id = registry.register(&registration("temp-a", "Mini")).unwrap();
        assert!(registry.collect_stale(Duration::from_secs(60)).is_empty());

        registry.servers.get_mut(&id).unwrap().last_heartbeat_at =
            Utc::now() - chrono::Duration::seconds(120);
        assert_eq!(registry.collect_stale(Duration::from_secs(60)), vec![id]);
    }

    #[test]
    fn variant_matching_covers_all_sources() {
        let mut update = slot_update("mini1", "a", SlotStatus::Available);
        update.metadata.insert(
            meta_keys::VARIANT.to_string(),
            "Solo".to_string(),
        );
        let registry = ServerRegistry::new("registry-test");
        let id = registry.register(&registration("temp-a", "Mini")).unwrap();
        update.server_id = id;
        let outcome = registry.apply_slot_update(&update).unwrap();
        let slot = outcome.snapshot;

        assert!(slot.variant_matches("solo"));
        assert!(slot.variant_matches("BEDWARS"), "game type also matches");
        assert!(slot.variant_matches(""), "blank matches anything");
        assert!(!slot.variant_matches("doubles"));
    }

    #[test]
    fn team_counts_derive_from_metadata() {
        let registry = ServerRegistry::new("registry-test");
        let id = registry.register(&registration("temp-a", "Mini")).unwrap();
        let mut update = slot_update(&id, "b", SlotStatus::Available);
        update.max_players = 8;
        update
            .metadata
            .insert(meta_keys::TEAM_MAX.to_string(), "4".to_string());
        let slot = registry.apply_slot_update(&update).unwrap().snapshot;
        assert_eq!(slot.team_count(), 2, "derived from maxPlayers / team.max");

        let mut explicit = slot_update(&id, "c", SlotStatus::Available);
        explicit
            .metadata
            .insert(meta_keys::TEAM_COUNT.to_string(), "3".to_string());
        let slot = registry.apply_slot_update(&explicit).unwrap().snapshot;
        assert_eq!(slot.team_count(), 3);
    }
}
