//! Backend reservation service.
//!
//! Issues single-use, TTL'd tokens proving a seat is held for one player.
//! Consumption is remove-and-return under one lock, so a token can never be
//! spent twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::metrics::CoreMetrics;
use crate::protocol::{PlayerId, PlayerReservationRequest, PlayerReservationResponse};

/// One issued reservation.
#[derive(Debug, Clone)]
pub struct ReservationRecord {
    pub token: String,
    pub player_id: PlayerId,
    pub slot_id: String,
    pub expires_at: DateTime<Utc>,
}

impl ReservationRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub struct ReservationService {
    server_id: String,
    ttl: Duration,
    records: Mutex<HashMap<String, ReservationRecord>>,
    metrics: Arc<CoreMetrics>,
}

impl ReservationService {
    pub fn new(server_id: impl Into<String>, ttl: Duration, metrics: Arc<CoreMetrics>) -> Self {
        Self {
            server_id: server_id.into(),
            ttl,
            records: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Handle one reservation request: GC expired records, mint a token,
    /// store it, answer. Any validation failure becomes a rejection, never
    /// a crash.
    pub async fn issue(&self, request: &PlayerReservationRequest) -> PlayerReservationResponse {
        if let Err(reason) = Self::validate(request) {
            tracing::warn!(request_id = %request.request_id, %reason, "Rejecting reservation request");
            return PlayerReservationResponse {
                request_id: request.request_id,
                server_id: self.server_id.clone(),
                accepted: false,
                reservation_token: None,
                reason: Some(reason),
            };
        }

        let token = generate_token();
        let record = ReservationRecord {
            token: token.clone(),
            player_id: request.player_id,
            slot_id: request.slot_id.clone(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(15)),
        };

        {
            let mut records = self.records.lock().await;
            let now = Utc::now();
            let before = records.len();
            records.retain(|_, record| !record.is_expired(now));
            let expired = before - records.len();
            if expired > 0 {
                self.metrics
                    .reservations_expired
                    .fetch_add(expired as u64, std::sync::atomic::Ordering::Relaxed);
            }
            records.insert(token.clone(), record);
        }

        tracing::debug!(
            request_id = %request.request_id,
            player_id = %request.player_id,
            slot_id = %request.slot_id,
            "Reservation issued"
        );
        PlayerReservationResponse {
            request_id: request.request_id,
            server_id: self.server_id.clone(),
            accepted: true,
            reservation_token: Some(token),
            reason: None,
        }
    }

    /// Remove-and-return consumption: false when the token is missing,
    /// expired, or bound to a different player.
    pub async fn consume(&self, token: &str, player_id: &PlayerId) -> bool {
        let mut records = self.records.lock().await;
        let Some(record) = records.remove(token) else {
            return false;
        };
        if record.is_expired(Utc::now()) {
            CoreMetrics::increment(&self.metrics.reservations_expired);
            return false;
        }
        if record.player_id != *player_id {
            // Token belongs to someone else; it stays burned.
            tracing::warn!(%player_id, expected = %record.player_id, "Reservation token player mismatch");
            return false;
        }
        CoreMetrics::increment(&self.metrics.reservations_consumed);
        true
    }

    /// Drop expired records; returns how many were removed.
    pub async fn gc_expired(&self) -> usize {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let expired = before - records.len();
        if expired > 0 {
            self.metrics
                .reservations_expired
                .fetch_add(expired as u64, std::sync::atomic::Ordering::Relaxed);
        }
        expired
    }

    pub async fn outstanding(&self) -> usize {
        self.records.lock().await.len()
    }

    fn validate(request: &PlayerReservationRequest) -> Result<(), String> {
        if request.slot_id.trim().is_empty() {
            return Err("slotId cannot be blank".to_string());
        }
        if request.player_id.is_nil() {
            return Err("playerId cannot be the nil UUID".to_string());
        }
        Ok(())
    }
}

/// Random 128-bit token, URL-safe base64 on the wire.
fn generate_token() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 16]>())
}
