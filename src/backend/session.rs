//! Minimal per-player session records.
//!
//! Just enough durable state that a reconnecting player resumes their
//! session or is cleaned up: per-environment spans, the last slot they were
//! routed into, and the client protocol version observed at join.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::PlayerId;

/// One span spent in an environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSegment {
    pub environment_id: String,
    pub entered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSessionRecord {
    pub session_id: Uuid,
    pub player_id: PlayerId,
    pub server_id: String,
    #[serde(default)]
    pub segments: Vec<EnvironmentSegment>,
    /// Last slot the player was handed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_slot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_protocol_version: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionRecordStore {
    sessions: RwLock<HashMap<PlayerId, PlayerSessionRecord>>,
}

impl SessionRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume the player's session or start a fresh one, linking the slot
    /// they arrived into.
    pub async fn resume_or_create(
        &self,
        player_id: PlayerId,
        server_id: &str,
        slot_id: Option<&str>,
        client_protocol_version: Option<u32>,
    ) -> PlayerSessionRecord {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let record = sessions
            .entry(player_id)
            .or_insert_with(|| PlayerSessionRecord {
                session_id: Uuid::new_v4(),
                player_id,
                server_id: server_id.to_string(),
                segments: Vec::new(),
                last_slot_id: None,
                client_protocol_version: None,
                started_at: now,
                updated_at: now,
            });
        record.server_id = server_id.to_string();
        if let Some(slot_id) = slot_id {
            record.last_slot_id = Some(slot_id.to_string());
        }
        if client_protocol_version.is_some() {
            record.client_protocol_version = client_protocol_version;
        }
        record.updated_at = now;
        record.clone()
    }

    /// Open a new environment span, closing the previous one.
    pub async fn record_environment(&self, player_id: &PlayerId, environment_id: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(record) = sessions.get_mut(player_id) else {
            return;
        };
        let now = Utc::now();
        if let Some(open) = record
            .segments
            .iter_mut()
            .rev()
            .find(|segment| segment.exited_at.is_none())
        {
            open.exited_at = Some(now);
        }
        record.segments.push(EnvironmentSegment {
            environment_id: environment_id.to_string(),
            entered_at: now,
            exited_at: None,
        });
        record.updated_at = now;
    }

    pub async fn get(&self, player_id: &PlayerId) -> Option<PlayerSessionRecord> {
        self.sessions.read().await.get(player_id).cloned()
    }

    /// Remove the player's session, closing any open span.
    pub async fn end_session(&self, player_id: &PlayerId) -> Option<PlayerSessionRecord> {
        let mut sessions = self.sessions.write().await;
        let mut record = sessions.remove(player_id)?;
        let now = Utc::now();
        if let Some(open) = record
            .segments
            .iter_mut()
            .rev()
            .find(|segment| segment.exited_at.is_none())
        {
            open.exited_at = Some(now);
        }
        record.updated_at = now;
        Some(record)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resume_keeps_the_session_id() {
        let store = SessionRecordStore::new();
        let player = Uuid::new_v4();

        let first = store
            .resume_or_create(player, "mini1", Some("mini1:a"), Some(770))
            .await;
        let second = store
            .resume_or_create(player, "mini1", Some("mini1:b"), None)
            .await;

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.last_slot_id.as_deref(), Some("mini1:b"));
        assert_eq!(second.client_protocol_version, Some(770), "version sticks");
    }

    #[tokio::test]
    async fn environment_spans_close_in_order() {
        let store = SessionRecordStore::new();
        let player = Uuid::new_v4();
        store.resume_or_create(player, "hub1", None, None).await;

        store.record_environment(&player, "lobby").await;
        store.record_environment(&player, "arcade").await;

        let record = store.get(&player).await.unwrap();
        assert_eq!(record.segments.len(), 2);
        assert!(record.segments[0].exited_at.is_some());
        assert!(record.segments[1].exited_at.is_none());
    }

    #[tokio::test]
    async fn ending_a_session_closes_the_open_span() {
        let store = SessionRecordStore::new();
        let player = Uuid::new_v4();
        store.resume_or_create(player, "hub1", None, None).await;
        store.record_environment(&player, "lobby").await;

        let ended = store.end_session(&player).await.unwrap();
        assert!(ended.segments[0].exited_at.is_some());
        assert_eq!(store.session_count().await, 0);
        assert!(store.end_session(&player).await.is_none());
    }
}
