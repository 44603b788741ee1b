//! Environment routing: place a player on a non-game server selected by
//! role, bypassing family/variant logic entirely.

use std::collections::HashMap;

use crate::bus::channels;
use crate::metrics::CoreMetrics;
use crate::protocol::{
    environment_slot_id, meta_keys, reasons, EnvironmentFailureMode, EnvironmentRouteRequest,
    Message, PlayerRouteCommand, RouteAction, ENV_SLOT_SUFFIX,
};
use crate::registry::ServerSummary;

use super::RoutingWorker;

impl RoutingWorker {
    pub(crate) async fn on_environment_request(&mut self, request: EnvironmentRouteRequest) {
        if !self.accepting {
            tracing::warn!(request_id = %request.request_id, "Rejecting environment route during shutdown");
            return;
        }

        let target = match &request.target_server_id {
            Some(server_id) => self
                .slots
                .server_summary(server_id)
                .filter(|summary| summary.role.eq_ignore_ascii_case(&request.target_environment_id))
                .filter(|summary| Self::accepts_players(summary)),
            None => self.select_environment_server(&request.target_environment_id),
        };

        let Some(server) = target else {
            CoreMetrics::increment(&self.metrics.environment_route_failures);
            tracing::warn!(
                request_id = %request.request_id,
                environment = %request.target_environment_id,
                "No environment server available"
            );
            if request.failure_mode == EnvironmentFailureMode::KickOnFail {
                self.send_disconnect(
                    request.request_id,
                    request.player_id,
                    &request.player_name,
                    &request.proxy_id,
                    reasons::ENVIRONMENT_UNAVAILABLE,
                )
                .await;
            }
            return;
        };

        let slot_id = environment_slot_id(&request.target_environment_id, &server.server_id);
        let mut metadata = HashMap::from([
            (
                meta_keys::ENVIRONMENT.to_string(),
                request.target_environment_id.clone(),
            ),
            (
                meta_keys::TARGET_SERVER.to_string(),
                server.server_id.clone(),
            ),
            (
                meta_keys::ROUTE_TYPE.to_string(),
                "environment".to_string(),
            ),
        ]);
        if let Some(origin) = &request.origin_server_id {
            metadata.insert(meta_keys::ORIGIN_SERVER.to_string(), origin.clone());
        }

        let command = PlayerRouteCommand {
            action: RouteAction::Route,
            request_id: request.request_id,
            player_id: request.player_id,
            player_name: request.player_name.clone(),
            proxy_id: request.proxy_id.clone(),
            server_id: Some(server.server_id.clone()),
            slot_id: Some(slot_id),
            slot_suffix: Some(ENV_SLOT_SUFFIX.to_string()),
            target_world: request.world_name.clone(),
            spawn: request.spawn,
            metadata,
        };

        CoreMetrics::increment(&self.metrics.environment_routes);
        tracing::info!(
            request_id = %request.request_id,
            environment = %request.target_environment_id,
            server_id = %server.server_id,
            "Environment route dispatched"
        );

        if let Err(error) = self
            .bus
            .send(
                &request.proxy_id,
                channels::PLAYER_ROUTE_COMMAND,
                Message::PlayerRouteCommand(Box::new(command.clone())),
            )
            .await
        {
            tracing::error!(%error, proxy_id = %request.proxy_id, "Failed to publish environment route");
        }
        if let Err(error) = self
            .bus
            .send(
                &server.server_id,
                channels::SERVER_PLAYER_ROUTE,
                Message::PlayerRouteCommand(Box::new(command)),
            )
            .await
        {
            tracing::error!(%error, server_id = %server.server_id, "Failed to publish environment route");
        }
    }

    fn accepts_players(summary: &ServerSummary) -> bool {
        summary.status.is_accepting()
            && (summary.max_capacity == 0
                || summary.current_player_count < summary.max_capacity)
    }

    /// Least-loaded server of the requested role.
    fn select_environment_server(&self, environment_id: &str) -> Option<ServerSummary> {
        let mut candidates: Vec<ServerSummary> = self
            .slots
            .servers_with_role(environment_id)
            .into_iter()
            .filter(Self::accepts_players)
            .collect();
        candidates.sort_by(|a, b| {
            let load = |summary: &ServerSummary| {
                f64::from(summary.current_player_count) / f64::from(summary.max_capacity.max(1))
            };
            load(a)
                .partial_cmp(&load(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.server_id.cmp(&b.server_id))
        });
        candidates.into_iter().next()
    }
}
