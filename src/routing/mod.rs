//! Player routing service.
//!
//! One worker task owns all routing state and consumes a command channel;
//! bus handlers validate inbound messages and enqueue commands. Timers are
//! commands the worker schedules against itself, so every mutation happens
//! on the worker and the state maps need no locks.

pub mod context;
pub mod eligibility;
pub mod state;

mod environment;
mod party;
mod queue;
mod roster;

pub use context::{
    InFlightRoute, MatchRosterSnapshot, PartyAllocation, PendingReservation,
    PlayerRequestContext, QueuedPartyReservation,
};
pub use state::{slot_key, RoutingSnapshot, RoutingState};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{channels, handler_fn, MessageBus};
use crate::config::RoutingConfig;
use crate::metrics::CoreMetrics;
use crate::protocol::{
    meta_keys, reasons, validation, AckStatus, EnvironmentRouteRequest, MatchRosterCreated,
    MatchRosterEnded, Message, PartyReservationClaimed, PartyReservationCreated,
    PlayerReservationRequest, PlayerReservationResponse, PlayerRouteAck, PlayerRouteCommand,
    PlayerSlotRequest, RequestId, RouteAction, SlotStatusUpdate, SpawnPoint,
};
use crate::provision::ProvisionTrigger;
use crate::registry::{ProxyRegistry, ServerRegistry, ServerSummary, SlotRecord};

/// Read-only slot/server view the routing service works against.
pub trait SlotDirectory: Send + Sync {
    fn slot(&self, slot_id: &str) -> Option<SlotRecord>;
    fn slots_in_family(&self, family_id: &str) -> Vec<SlotRecord>;
    fn slots_on_server(&self, server_id: &str, family_id: &str) -> Vec<SlotRecord>;
    fn server_summary(&self, server_id: &str) -> Option<ServerSummary>;
    fn servers_with_role(&self, role: &str) -> Vec<ServerSummary>;
}

impl SlotDirectory for ServerRegistry {
    fn slot(&self, slot_id: &str) -> Option<SlotRecord> {
        ServerRegistry::slot(self, slot_id)
    }

    fn slots_in_family(&self, family_id: &str) -> Vec<SlotRecord> {
        ServerRegistry::slots_in_family(self, family_id)
    }

    fn slots_on_server(&self, server_id: &str, family_id: &str) -> Vec<SlotRecord> {
        ServerRegistry::slots_on_server(self, server_id, family_id)
    }

    fn server_summary(&self, server_id: &str) -> Option<ServerSummary> {
        ServerRegistry::server_summary(self, server_id)
    }

    fn servers_with_role(&self, role: &str) -> Vec<ServerSummary> {
        ServerRegistry::servers_with_role(self, role)
    }
}

/// Read-only proxy membership view.
pub trait ProxyDirectory: Send + Sync {
    fn is_known_proxy(&self, proxy_id: &str) -> bool;
}

impl ProxyDirectory for ProxyRegistry {
    fn is_known_proxy(&self, proxy_id: &str) -> bool {
        self.is_known(proxy_id)
    }
}

/// Work items consumed by the routing worker.
pub enum RoutingCommand {
    PlayerRequest(PlayerSlotRequest),
    SlotStatus(SlotStatusUpdate),
    RouteAck(PlayerRouteAck),
    ReservationResponse(PlayerReservationResponse),
    ReservationTimeout { reservation_request_id: Uuid },
    RouteTimeout { request_id: RequestId },
    PartyCreated(PartyReservationCreated),
    PartyClaimed(PartyReservationClaimed),
    RosterCreated(MatchRosterCreated),
    RosterEnded(MatchRosterEnded),
    EnvironmentRequest(EnvironmentRouteRequest),
    SweepQueues,
    Snapshot(oneshot::Sender<RoutingSnapshot>),
    Shutdown,
}

/// Handle to the routing worker.
pub struct PlayerRoutingService {
    commands: mpsc::UnboundedSender<RoutingCommand>,
    worker: tokio::task::JoinHandle<()>,
    shutdown: CancellationToken,
}

impl PlayerRoutingService {
    pub async fn start(
        bus: Arc<dyn MessageBus>,
        slots: Arc<dyn SlotDirectory>,
        proxies: Arc<dyn ProxyDirectory>,
        provisioner: Arc<dyn ProvisionTrigger>,
        metrics: Arc<CoreMetrics>,
        config: RoutingConfig,
    ) -> Arc<Self> {
        let (commands, rx) = mpsc::unbounded_channel();

        let worker = RoutingWorker {
            bus: bus.clone(),
            slots,
            proxies,
            provisioner,
            metrics: metrics.clone(),
            config: config.clone(),
            commands: commands.clone(),
            state: RoutingState::default(),
            accepting: true,
        };
        let worker_handle = tokio::spawn(worker.run(rx));

        let shutdown = CancellationToken::new();
        let sweep_commands = commands.clone();
        let sweep_token = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval(config.queue_sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = sweep_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if sweep_commands.send(RoutingCommand::SweepQueues).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let service = Arc::new(Self {
            commands,
            worker: worker_handle,
            shutdown,
        });
        service.subscribe_channels(bus, metrics).await;
        service
    }

    async fn subscribe_channels(self: &Arc<Self>, bus: Arc<dyn MessageBus>, metrics: Arc<CoreMetrics>) {
        let forward = |commands: mpsc::UnboundedSender<RoutingCommand>,
                       metrics: Arc<CoreMetrics>,
                       channel: &'static str| {
            handler_fn(move |envelope: crate::bus::Envelope| {
                let commands = commands.clone();
                let metrics = metrics.clone();
                async move {
                    let command = match envelope.message {
                        Message::PlayerSlotRequest(request) => {
                            if let Err(reason) = validation::validate_slot_request(&request) {
                                CoreMetrics::increment(&metrics.validation_errors);
                                tracing::warn!(%reason, "Dropping invalid player slot request");
                                return;
                            }
                            RoutingCommand::PlayerRequest(request)
                        }
                        Message::SlotStatusUpdate(update) => {
                            if let Err(reason) = validation::validate_slot_update(&update) {
                                CoreMetrics::increment(&metrics.validation_errors);
                                tracing::warn!(%reason, "Dropping invalid slot status update");
                                return;
                            }
                            RoutingCommand::SlotStatus(update)
                        }
                        Message::PlayerRouteAck(ack) => {
                            if let Err(reason) = validation::validate_route_ack(&ack) {
                                CoreMetrics::increment(&metrics.validation_errors);
                                tracing::warn!(%reason, "Dropping invalid route ack");
                                return;
                            }
                            RoutingCommand::RouteAck(ack)
                        }
                        Message::PlayerReservationResponse(response) => {
                            RoutingCommand::ReservationResponse(response)
                        }
                        Message::PartyReservationCreated(created) => {
                            RoutingCommand::PartyCreated(created)
                        }
                        Message::PartyReservationClaimed(claimed) => {
                            RoutingCommand::PartyClaimed(claimed)
                        }
                        Message::MatchRosterCreated(created) => {
                            RoutingCommand::RosterCreated(created)
                        }
                        Message::MatchRosterEnded(ended) => RoutingCommand::RosterEnded(ended),
                        Message::EnvironmentRouteRequest(request) => {
                            RoutingCommand::EnvironmentRequest(request)
                        }
                        other => {
                            CoreMetrics::increment(&metrics.validation_errors);
                            tracing::warn!(kind = other.kind(), %channel, "Unexpected message type; dropping");
                            return;
                        }
                    };
                    let _ = commands.send(command);
                }
            })
        };

        for channel in [
            channels::REGISTRY_PLAYER_REQUEST,
            channels::REGISTRY_SLOT_STATUS,
            channels::PLAYER_ROUTE_ACK,
            channels::PLAYER_RESERVATION_RESPONSE,
            channels::PARTY_RESERVATION_CREATED,
            channels::PARTY_RESERVATION_CLAIMED,
            channels::MATCH_ROSTER_CREATED,
            channels::MATCH_ROSTER_ENDED,
            channels::REGISTRY_ENVIRONMENT_ROUTE_REQUEST,
        ] {
            let _ = bus
                .subscribe(channel, forward(self.commands.clone(), metrics.clone(), channel))
                .await;
        }
    }

    /// Enqueue a command directly; used by tests and wiring.
    pub fn command(&self, command: RoutingCommand) {
        let _ = self.commands.send(command);
    }

    /// Consistent snapshot of the routing state.
    pub async fn snapshot(&self) -> Option<RoutingSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(RoutingCommand::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Stop accepting new requests; in-flight work keeps timing out.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let _ = self.commands.send(RoutingCommand::Shutdown);
    }
}

impl Drop for PlayerRoutingService {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.worker.abort();
    }
}

pub(crate) struct RoutingWorker {
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) slots: Arc<dyn SlotDirectory>,
    pub(crate) proxies: Arc<dyn ProxyDirectory>,
    pub(crate) provisioner: Arc<dyn ProvisionTrigger>,
    pub(crate) metrics: Arc<CoreMetrics>,
    pub(crate) config: RoutingConfig,
    pub(crate) commands: mpsc::UnboundedSender<RoutingCommand>,
    pub(crate) state: RoutingState,
    pub(crate) accepting: bool,
}

impl RoutingWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoutingCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                RoutingCommand::PlayerRequest(request) => self.on_player_request(request).await,
                RoutingCommand::SlotStatus(update) => self.on_slot_status(update).await,
                RoutingCommand::RouteAck(ack) => self.on_route_ack(ack).await,
                RoutingCommand::ReservationResponse(response) => {
                    self.on_reservation_response(response).await;
                }
                RoutingCommand::ReservationTimeout {
                    reservation_request_id,
                } => self.on_reservation_timeout(reservation_request_id).await,
                RoutingCommand::RouteTimeout { request_id } => {
                    self.on_route_timeout(request_id).await;
                }
                RoutingCommand::PartyCreated(created) => self.on_party_created(created).await,
                RoutingCommand::PartyClaimed(claimed) => self.on_party_claimed(claimed).await,
                RoutingCommand::RosterCreated(created) => self.on_roster_created(created),
                RoutingCommand::RosterEnded(ended) => self.on_roster_ended(ended),
                RoutingCommand::EnvironmentRequest(request) => {
                    self.on_environment_request(request).await;
                }
                RoutingCommand::SweepQueues => self.sweep_expired().await,
                RoutingCommand::Snapshot(reply) => {
                    let _ = reply.send(self.state.snapshot(self.accepting));
                }
                RoutingCommand::Shutdown => {
                    tracing::info!("Routing worker suspending new request intake");
                    self.accepting = false;
                }
            }
        }
        tracing::info!("Routing worker stopped");
    }

    fn spawn_timer(
        &self,
        delay: std::time::Duration,
        command_factory: impl FnOnce() -> RoutingCommand + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(command_factory());
        })
    }

    async fn on_player_request(&mut self, request: PlayerSlotRequest) {
        CoreMetrics::increment(&self.metrics.slot_requests_received);
        if !self.accepting {
            tracing::warn!(request_id = %request.request_id, "Rejecting request during shutdown");
            return;
        }
        if self.state.active_requests.contains(&request.request_id) {
            CoreMetrics::increment(&self.metrics.slot_requests_deduplicated);
            tracing::debug!(request_id = %request.request_id, "Duplicate slot request ignored");
            return;
        }

        if request
            .metadata
            .get(meta_keys::PARTY_RESERVATION_ID)
            .is_some()
        {
            self.on_party_member_request(request).await;
            return;
        }

        if !self.proxies.is_known_proxy(&request.proxy_id) {
            tracing::warn!(
                request_id = %request.request_id,
                proxy_id = %request.proxy_id,
                "Request from unknown proxy"
            );
            self.send_disconnect(
                request.request_id,
                request.player_id,
                &request.player_name,
                &request.proxy_id,
                reasons::UNKNOWN_PROXY,
            )
            .await;
            return;
        }

        let active_slot = self.state.player_active_slots.get(&request.player_id).cloned();
        let context = PlayerRequestContext::new(request, active_slot);
        self.state.active_requests.insert(context.request.request_id);
        self.try_route(context).await;
    }

    /// Find a slot now, or queue and ask for provisioning.
    pub(crate) async fn try_route(&mut self, context: PlayerRequestContext) {
        match self.find_available_slot(&context) {
            Some(slot) => self.begin_reservation(context, slot).await,
            None => {
                let family = context.request.family_id.clone();
                let metadata = self.provision_metadata(&context);
                self.enqueue(context);
                self.provisioner.request_provision(&family, metadata).await;
            }
        }
    }

    fn find_available_slot(&self, context: &PlayerRequestContext) -> Option<SlotRecord> {
        let mut candidates = self.slots.slots_in_family(&context.request.family_id);
        candidates.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        candidates.into_iter().find(|slot| {
            eligibility::slot_eligible(
                &self.state,
                slot,
                &context.request.player_id,
                context.variant(),
                context.blocked_slot_id.as_deref(),
            )
        })
    }

    pub(crate) fn enqueue(&mut self, mut context: PlayerRequestContext) {
        CoreMetrics::increment(&self.metrics.requests_queued);
        context.last_enqueued_at = chrono::Utc::now();
        let family = context.request.family_id.to_lowercase();
        tracing::debug!(
            request_id = %context.request.request_id,
            %family,
            retries = context.retries,
            "Queued request"
        );
        self.state
            .pending_queues
            .entry(family)
            .or_default()
            .push_back(context);
    }

    pub(crate) fn provision_metadata(&self, context: &PlayerRequestContext) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        if let Some(variant) = &context.variant_id {
            metadata.insert(meta_keys::VARIANT.to_string(), variant.clone());
        }
        metadata.insert(meta_keys::PARTY_SIZE.to_string(), "1".to_string());
        metadata
    }

    /// Issue the reservation RPC and park the context until the backend
    /// answers or the timer fires.
    pub(crate) async fn begin_reservation(&mut self, context: PlayerRequestContext, slot: SlotRecord) {
        let reservation_request_id = Uuid::new_v4();
        let request = PlayerReservationRequest {
            request_id: reservation_request_id,
            player_id: context.request.player_id,
            player_name: context.request.player_name.clone(),
            proxy_id: context.request.proxy_id.clone(),
            server_id: slot.server_id.clone(),
            slot_id: slot.slot_id.clone(),
            metadata: context.request.metadata.clone(),
        };

        CoreMetrics::increment(&self.metrics.reservations_requested);
        let timeout = self.spawn_timer(self.config.reservation_timeout(), move || {
            RoutingCommand::ReservationTimeout {
                reservation_request_id,
            }
        });
        self.state.reserving_add(&slot.slot_id);
        self.state.pending_reservations.insert(
            reservation_request_id,
            PendingReservation {
                context,
                slot: slot.clone(),
                timeout,
            },
        );

        if let Err(error) = self
            .bus
            .send(
                &slot.server_id,
                channels::PLAYER_RESERVATION_REQUEST,
                Message::PlayerReservationRequest(request),
            )
            .await
        {
            tracing::error!(%error, server_id = %slot.server_id, "Failed to publish reservation request");
            if let Some(pending) = self.state.pending_reservations.remove(&reservation_request_id)
            {
                pending.timeout.abort();
                self.state.reserving_sub(&slot.slot_id);
                Box::pin(self.retry_request(pending.context, reasons::CONNECTION_FAILED))
                    .await;
            }
        }
    }

    async fn on_reservation_response(&mut self, response: PlayerReservationResponse) {
        let Some(pending) = self.state.pending_reservations.remove(&response.request_id) else {
            tracing::debug!(request_id = %response.request_id, "Late or foreign reservation response");
            return;
        };
        pending.timeout.abort();
        self.state.reserving_sub(&pending.slot.slot_id);

        let token = response
            .reservation_token
            .as_deref()
            .filter(|token| !token.trim().is_empty());
        if response.accepted {
            if let Some(token) = token {
                CoreMetrics::increment(&self.metrics.reservations_granted);
                let token = token.to_string();
                self.dispatch(pending.context, &pending.slot, &token, false, None, None)
                    .await;
                return;
            }
        }

        CoreMetrics::increment(&self.metrics.reservations_rejected);
        let reason = if response.accepted {
            reasons::RESERVATION_MISSING_TOKEN.to_string()
        } else {
            response
                .reason
                .unwrap_or_else(|| reasons::RESERVATION_REJECTED.to_string())
        };
        self.retry_request(pending.context, &reason).await;
    }

    async fn on_reservation_timeout(&mut self, reservation_request_id: Uuid) {
        let Some(pending) = self
            .state
            .pending_reservations
            .remove(&reservation_request_id)
        else {
            return;
        };
        CoreMetrics::increment(&self.metrics.reservations_timed_out);
        self.state.reserving_sub(&pending.slot.slot_id);
        tracing::warn!(
            request_id = %pending.context.request.request_id,
            slot_id = %pending.slot.slot_id,
            "Reservation timed out"
        );
        self.retry_request(pending.context, reasons::RESERVATION_TIMEOUT)
            .await;
    }

    /// Emit the route command pair and start the ack timer.
    ///
    /// `pre_reserved` marks dispatches whose seat is already counted in the
    /// slot's pending occupancy (party allocations hold their seats up
    /// front). Returns false when the dispatch was refused.
    pub(crate) async fn dispatch(
        &mut self,
        context: PlayerRequestContext,
        slot: &SlotRecord,
        reservation_token: &str,
        pre_reserved: bool,
        team_index: Option<i32>,
        party_id: Option<Uuid>,
    ) -> bool {
        let request = &context.request;
        if !self.state.roster_allows(&slot.slot_id, &request.player_id) {
            CoreMetrics::increment(&self.metrics.roster_locks_enforced);
            tracing::info!(
                request_id = %request.request_id,
                player_id = %request.player_id,
                slot_id = %slot.slot_id,
                "Roster lock refused dispatch"
            );
            let (request_id, player_id) = (request.request_id, request.player_id);
            let (player_name, proxy_id) = (request.player_name.clone(), request.proxy_id.clone());
            self.state.active_requests.remove(&request_id);
            self.send_disconnect(
                request_id,
                player_id,
                &player_name,
                &proxy_id,
                reasons::MATCH_ROSTER_LOCKED,
            )
            .await;
            return false;
        }

        let mut metadata = slot.metadata.clone();
        metadata.extend(request.metadata.clone());
        metadata.insert(meta_keys::FAMILY.to_string(), request.family_id.clone());
        metadata.insert(
            meta_keys::RESERVATION_TOKEN.to_string(),
            reservation_token.to_string(),
        );
        if let Some(index) = team_index.filter(|index| *index >= 0) {
            metadata.insert(meta_keys::TEAM_INDEX.to_string(), index.to_string());
        }
        if let Some(party_id) = party_id {
            metadata.insert(meta_keys::PARTY_ID.to_string(), party_id.to_string());
        }

        let command = PlayerRouteCommand {
            action: RouteAction::Route,
            request_id: request.request_id,
            player_id: request.player_id,
            player_name: request.player_name.clone(),
            proxy_id: request.proxy_id.clone(),
            server_id: Some(slot.server_id.clone()),
            slot_id: Some(slot.slot_id.clone()),
            slot_suffix: Some(slot.slot_suffix.clone()),
            target_world: slot.target_world().map(str::to_string),
            spawn: slot.spawn(),
            metadata,
        };
        self.send_route_command(&command).await;

        if !pre_reserved {
            self.state.occupancy_add(&slot.slot_id, 1);
        }

        let request_id = request.request_id;
        let timeout = self.spawn_timer(self.config.route_timeout(), move || {
            RoutingCommand::RouteTimeout { request_id }
        });
        let party_reservation_id = context.party_reservation_id();
        self.state.in_flight.insert(
            request_id,
            InFlightRoute {
                context,
                slot_id: slot.slot_id.clone(),
                server_id: slot.server_id.clone(),
                party_reservation_id,
                dispatched_at: Instant::now(),
                timeout,
            },
        );
        CoreMetrics::increment(&self.metrics.routes_dispatched);
        tracing::info!(
            request_id = %request_id,
            slot_id = %slot.slot_id,
            pre_reserved,
            "Dispatched route"
        );
        true
    }

    /// Both peers get the same command: the proxy moves the client, the
    /// backend pre-stages the handoff.
    async fn send_route_command(&self, command: &PlayerRouteCommand) {
        if let Err(error) = self
            .bus
            .send(
                &command.proxy_id,
                channels::PLAYER_ROUTE_COMMAND,
                Message::PlayerRouteCommand(Box::new(command.clone())),
            )
            .await
        {
            tracing::error!(%error, proxy_id = %command.proxy_id, "Failed to publish proxy route command");
        }
        if let Some(server_id) = &command.server_id {
            if let Err(error) = self
                .bus
                .send(
                    server_id,
                    channels::SERVER_PLAYER_ROUTE,
                    Message::PlayerRouteCommand(Box::new(command.clone())),
                )
                .await
            {
                tracing::error!(%error, %server_id, "Failed to publish server route command");
            }
        }
    }

    async fn on_route_ack(&mut self, ack: PlayerRouteAck) {
        let Some(route) = self.state.in_flight.remove(&ack.request_id) else {
            tracing::debug!(request_id = %ack.request_id, "Ack for unknown or settled route");
            return;
        };
        route.timeout.abort();
        self.state.occupancy_sub(&route.slot_id, 1);
        self.metrics
            .record_route_latency(route.dispatched_at.elapsed())
            .await;

        match ack.status {
            AckStatus::Success => {
                CoreMetrics::increment(&self.metrics.routes_acked);
                self.state
                    .player_active_slots
                    .insert(ack.player_id, route.slot_id.clone());
                self.state.active_requests.remove(&ack.request_id);
                if let Some(reservation_id) = route.party_reservation_id {
                    self.on_party_member_completed(reservation_id, ack.player_id)
                        .await;
                }
            }
            AckStatus::Failed => {
                CoreMetrics::increment(&self.metrics.route_failures);
                let reason = ack
                    .reason
                    .unwrap_or_else(|| reasons::ROUTE_TRANSIENT.to_string());
                tracing::warn!(
                    request_id = %ack.request_id,
                    slot_id = %route.slot_id,
                    %reason,
                    "Route failed"
                );
                if reasons::is_retryable(&reason) {
                    self.retry_request(route.context, &reason).await;
                } else {
                    self.terminate(route.context, &reason).await;
                }
            }
        }
    }

    async fn on_route_timeout(&mut self, request_id: RequestId) {
        let Some(route) = self.state.in_flight.remove(&request_id) else {
            return;
        };
        CoreMetrics::increment(&self.metrics.route_timeouts);
        self.state.occupancy_sub(&route.slot_id, 1);
        tracing::warn!(%request_id, slot_id = %route.slot_id, "Route timed out unacknowledged");
        self.retry_request(route.context, reasons::ROUTE_TIMEOUT)
            .await;
    }

    /// Bounded retry: queue-wait budget first, then the retry counter.
    pub(crate) async fn retry_request(&mut self, mut context: PlayerRequestContext, reason: &str) {
        if context.exceeded_wait(self.config.max_queue_wait()) {
            CoreMetrics::increment(&self.metrics.queue_timeouts);
            self.terminate(context, reasons::QUEUE_TIMEOUT).await;
            return;
        }
        context.retries += 1;
        if context.retries > self.config.max_route_retries {
            tracing::warn!(
                request_id = %context.request.request_id,
                retries = context.retries,
                %reason,
                "Retry budget exhausted"
            );
            self.terminate(context, reason).await;
            return;
        }
        CoreMetrics::increment(&self.metrics.route_retries);

        if context.party_reservation_id().is_some() {
            self.requeue_party_member(context).await;
            return;
        }

        // Re-attempt immediately: an eligible slot may still be there (e.g.
        // a transient reservation rejection); otherwise queue and provision.
        self.try_route(context).await;
    }

    /// Terminal per-request failure: drop tracking, disconnect the player.
    pub(crate) async fn terminate(&mut self, context: PlayerRequestContext, reason: &str) {
        self.state
            .active_requests
            .remove(&context.request.request_id);
        self.send_disconnect(
            context.request.request_id,
            context.request.player_id,
            &context.request.player_name,
            &context.request.proxy_id,
            reason,
        )
        .await;
    }

    pub(crate) async fn send_disconnect(
        &self,
        request_id: RequestId,
        player_id: crate::protocol::PlayerId,
        player_name: &str,
        proxy_id: &str,
        reason: &str,
    ) {
        CoreMetrics::increment(&self.metrics.disconnects_sent);
        let command = PlayerRouteCommand {
            action: RouteAction::Disconnect,
            request_id,
            player_id,
            player_name: player_name.to_string(),
            proxy_id: proxy_id.to_string(),
            server_id: None,
            slot_id: None,
            slot_suffix: None,
            target_world: None,
            spawn: SpawnPoint::default(),
            metadata: HashMap::from([(meta_keys::REASON.to_string(), reason.to_string())]),
        };
        tracing::info!(%request_id, %player_id, %reason, "Disconnecting player");
        if let Err(error) = self
            .bus
            .send(
                proxy_id,
                channels::PLAYER_ROUTE_COMMAND,
                Message::PlayerRouteCommand(Box::new(command)),
            )
            .await
        {
            tracing::error!(%error, %proxy_id, "Failed to publish disconnect command");
        }
    }
}
