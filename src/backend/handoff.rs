//! Session handoff store.
//!
//! When a backend receives a route command it must accept, it stages a
//! short-lived handoff record in the shared KV store under
//! `player.handoff:<playerId>`. The record is consulted (and consumed) when
//! the player actually connects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kv::{self, KeyValueStore};
use crate::protocol::PlayerId;

const KEY_PREFIX: &str = "player.handoff:";

/// The expected arrival of one player at one slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRecord {
    pub player_id: PlayerId,
    pub server_id: String,
    pub slot_id: String,
    pub reservation_token: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct HandoffStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl HandoffStore {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(player_id: &PlayerId) -> String {
        format!("{KEY_PREFIX}{player_id}")
    }

    /// Stage the expected arrival of a player; overwrites any previous
    /// record for the same player.
    pub async fn stage(
        &self,
        player_id: PlayerId,
        server_id: &str,
        slot_id: &str,
        reservation_token: &str,
        metadata: HashMap<String, String>,
    ) -> Result<HandoffRecord> {
        let now = Utc::now();
        let record = HandoffRecord {
            player_id,
            server_id: server_id.to_string(),
            slot_id: slot_id.to_string(),
            reservation_token: reservation_token.to_string(),
            metadata,
            issued_at: now,
            expires_at: now
                + chrono::Duration::from_std(self.ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(15)),
        };
        kv::put_json(&*self.store, &Self::key(&player_id), &record, Some(self.ttl)).await?;
        tracing::debug!(%player_id, %slot_id, "Handoff staged");
        Ok(record)
    }

    /// Read without consuming.
    pub async fn peek(&self, player_id: &PlayerId) -> Result<Option<HandoffRecord>> {
        kv::get_json(&*self.store, &Self::key(player_id)).await
    }

    /// Consume the record for an arriving player.
    pub async fn take(&self, player_id: &PlayerId) -> Result<Option<HandoffRecord>> {
        kv::remove_json(&*self.store, &Self::key(player_id)).await
    }

    /// Drop expired records from the underlying store.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        self.store.cleanup_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKeyValueStore;
    use uuid::Uuid;

    fn store(ttl: Duration) -> HandoffStore {
        HandoffStore::new(Arc::new(InMemoryKeyValueStore::new()), ttl)
    }

    #[tokio::test]
    async fn staged_records_are_taken_once() {
        let handoffs = store(Duration::from_secs(15));
        let player = Uuid::new_v4();
        handoffs
            .stage(player, "mini1", "mini1:a", "T1", HashMap::new())
            .await
            .unwrap();

        let record = handoffs.take(&player).await.unwrap().unwrap();
        assert_eq!(record.slot_id, "mini1:a");
        assert_eq!(record.reservation_token, "T1");
        assert!(handoffs.take(&player).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_handoffs_are_invisible() {
        let handoffs = store(Duration::from_millis(5));
        let player = Uuid::new_v4();
        handoffs
            .stage(player, "mini1", "mini1:a", "T1", HashMap::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handoffs.peek(&player).await.unwrap().is_none());
        assert!(handoffs.take(&player).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restaging_overwrites_the_previous_record() {
        let handoffs = store(Duration::from_secs(15));
        let player = Uuid::new_v4();
        handoffs
            .stage(player, "mini1", "mini1:a", "T1", HashMap::new())
            .await
            .unwrap();
        handoffs
            .stage(player, "mini1", "mini1:b", "T2", HashMap::new())
            .await
            .unwrap();

        let record = handoffs.take(&player).await.unwrap().unwrap();
        assert_eq!(record.slot_id, "mini1:b");
    }
}
