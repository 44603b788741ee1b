//! Backend host glue.
//!
//! The in-scope slice of a game server process: answer reservation requests
//! targeted at this server, pre-stage handoffs from route commands, and
//! validate arriving players against both stores.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};

use crate::bus::{channels, handler_fn, MessageBus};
use crate::config::BackendConfig;
use crate::kv::KeyValueStore;
use crate::metrics::CoreMetrics;
use crate::protocol::{meta_keys, Message, PlayerId, RouteAction};

use super::handoff::HandoffStore;
use super::reservation::ReservationService;
use super::session::SessionRecordStore;

/// Outcome of an arriving player's validation.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "decision")]
pub enum JoinDecision {
    Accepted {
        slot_id: String,
        session_id: uuid::Uuid,
    },
    Rejected {
        reason: String,
    },
}

pub struct BackendHost {
    server_id: String,
    bus: Arc<dyn MessageBus>,
    reservations: Arc<ReservationService>,
    handoffs: Arc<HandoffStore>,
    sessions: Arc<SessionRecordStore>,
}

impl BackendHost {
    pub async fn start(
        bus: Arc<dyn MessageBus>,
        server_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        config: &BackendConfig,
        metrics: Arc<CoreMetrics>,
    ) -> Arc<Self> {
        let server_id = server_id.into();
        let host = Arc::new(Self {
            reservations: Arc::new(ReservationService::new(
                server_id.clone(),
                config.reservation_ttl(),
                metrics,
            )),
            handoffs: Arc::new(HandoffStore::new(store, config.handoff_ttl())),
            sessions: Arc::new(SessionRecordStore::new()),
            server_id,
            bus,
        });

        let service = host.clone();
        let _ = host
            .bus
            .subscribe(
                &channels::targeted(channels::PLAYER_RESERVATION_REQUEST, &host.server_id),
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_reservation_request(envelope).await }
                }),
            )
            .await;

        let service = host.clone();
        let _ = host
            .bus
            .subscribe(
                &channels::targeted(channels::SERVER_PLAYER_ROUTE, &host.server_id),
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_route_command(envelope).await }
                }),
            )
            .await;

        host
    }

    async fn on_reservation_request(&self, envelope: crate::bus::Envelope) {
        let Message::PlayerReservationRequest(request) = envelope.message.clone() else {
            tracing::warn!(kind = envelope.message.kind(), "Unexpected message on reservation channel");
            return;
        };
        let response = self.reservations.issue(&request).await;
        if let Err(error) = self
            .bus
            .reply(
                &envelope,
                channels::PLAYER_RESERVATION_RESPONSE,
                Message::PlayerReservationResponse(response),
            )
            .await
        {
            tracing::error!(%error, "Failed to publish reservation response");
        }
    }

    /// A route command addressed to this server: stage the handoff the
    /// player's join will be validated against.
    async fn on_route_command(&self, envelope: crate::bus::Envelope) {
        let command = match envelope.message {
            Message::PlayerRouteCommand(command) => command,
            other => {
                tracing::warn!(kind = other.kind(), "Unexpected message on route channel");
                return;
            }
        };
        if command.action != RouteAction::Route {
            return;
        }
        let Some(slot_id) = command.slot_id.clone() else {
            tracing::warn!(request_id = %command.request_id, "Route command without slotId");
            return;
        };

        // Environment routes carry no reservation; they open a session
        // segment instead of a handoff.
        if command.metadata.get(meta_keys::ROUTE_TYPE).map(String::as_str) == Some("environment") {
            if let Some(environment) = command.metadata.get(meta_keys::ENVIRONMENT) {
                self.sessions
                    .resume_or_create(command.player_id, &self.server_id, None, None)
                    .await;
                self.sessions
                    .record_environment(&command.player_id, environment)
                    .await;
            }
            return;
        }

        let Some(token) = command.metadata.get(meta_keys::RESERVATION_TOKEN).cloned() else {
            tracing::warn!(request_id = %command.request_id, "Route command without reservation token");
            return;
        };

        if let Err(error) = self
            .handoffs
            .stage(
                command.player_id,
                &self.server_id,
                &slot_id,
                &token,
                command.metadata.clone(),
            )
            .await
        {
            tracing::error!(%error, player_id = %command.player_id, "Failed to stage handoff");
        }
    }

    /// Validate an arriving player: a live handoff must exist and its
    /// reservation token must consume. Accepting resumes or creates the
    /// player's session.
    pub async fn handle_player_join(
        &self,
        player_id: PlayerId,
        client_protocol_version: Option<u32>,
    ) -> JoinDecision {
        let handoff = match self.handoffs.take(&player_id).await {
            Ok(Some(handoff)) => handoff,
            Ok(None) => {
                return JoinDecision::Rejected {
                    reason: "handoff-missing".to_string(),
                }
            }
            Err(error) => {
                tracing::error!(%error, %player_id, "Handoff lookup failed");
                return JoinDecision::Rejected {
                    reason: "handoff-unavailable".to_string(),
                };
            }
        };

        if !self
            .reservations
            .consume(&handoff.reservation_token, &player_id)
            .await
        {
            return JoinDecision::Rejected {
                reason: "reservation-invalid".to_string(),
            };
        }

        let session = self
            .sessions
            .resume_or_create(
                player_id,
                &self.server_id,
                Some(&handoff.slot_id),
                client_protocol_version,
            )
            .await;
        tracing::info!(%player_id, slot_id = %handoff.slot_id, "Player join accepted");
        JoinDecision::Accepted {
            slot_id: handoff.slot_id,
            session_id: session.session_id,
        }
    }

    /// Periodic GC of expired reservations and handoffs.
    pub fn spawn_store_cleanup(self: &Arc<Self>, config: &BackendConfig) -> tokio::task::JoinHandle<()> {
        let host = self.clone();
        let sweep = config.store_cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = interval(sweep);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reservations = host.reservations.gc_expired().await;
                let handoffs = host.handoffs.cleanup_expired().await.unwrap_or(0);
                if reservations + handoffs > 0 {
                    tracing::debug!(reservations, handoffs, "Backend store sweep");
                }
            }
        })
    }

    pub fn reservations(&self) -> &Arc<ReservationService> {
        &self.reservations
    }

    pub fn handoffs(&self) -> &Arc<HandoffStore> {
        &self.handoffs
    }

    pub fn sessions(&self) -> &Arc<SessionRecordStore> {
        &self.sessions
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}
