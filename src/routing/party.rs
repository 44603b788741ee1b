//! Party reservation allocation and member dispatch.
//!
//! An allocation holds the whole party's seats on one slot up front; members
//! then arrive individually and consume their held seat when dispatched. A
//! slot that leaves service sends the allocation back to the front of the
//! family's party queue.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::metrics::CoreMetrics;
use crate::protocol::{
    meta_keys, reasons, PartyReservationClaimed, PartyReservationCreated, PlayerId,
    PlayerSlotRequest, ReservationId,
};
use crate::registry::SlotRecord;

use super::context::{PartyAllocation, PlayerRequestContext, QueuedPartyReservation};
use super::eligibility;
use super::RoutingWorker;

impl RoutingWorker {
    pub(crate) async fn on_party_created(&mut self, created: PartyReservationCreated) {
        let reservation_id = created.reservation.reservation_id;
        if self.party_is_known(reservation_id) {
            tracing::debug!(%reservation_id, "Duplicate party reservation ignored");
            return;
        }

        let party_size = created.reservation.party_size() as u32;
        if party_size == 0 {
            CoreMetrics::increment(&self.metrics.validation_errors);
            tracing::warn!(%reservation_id, "Party reservation without tokens; dropping");
            return;
        }

        let queued = QueuedPartyReservation {
            variant_id: created
                .variant_id
                .clone()
                .or_else(|| created.reservation.variant_id.clone()),
            family_id: created.family_id.clone(),
            snapshot: created.reservation,
        };

        // A suggested target server is tried first, then the whole fabric.
        // allocate_party re-queues by itself when no team slot is free.
        if let Some(target) = queued
            .snapshot
            .target_server_id
            .clone()
            .filter(|target| !target.trim().is_empty())
        {
            let candidates = self.slots.slots_on_server(&target, &queued.family_id);
            if let Some(slot) = self.pick_party_slot(candidates, &queued, party_size) {
                self.allocate_party(queued, &slot).await;
                return;
            }
        }

        let candidates = self.slots.slots_in_family(&queued.family_id);
        if let Some(slot) = self.pick_party_slot(candidates, &queued, party_size) {
            self.allocate_party(queued, &slot).await;
            return;
        }

        self.queue_party(queued, false).await;
    }

    fn party_is_known(&self, reservation_id: ReservationId) -> bool {
        self.state.active_parties.contains_key(&reservation_id)
            || self.state.pending_party_reservations.values().any(|queue| {
                queue
                    .iter()
                    .any(|queued| queued.snapshot.reservation_id == reservation_id)
            })
    }

    fn pick_party_slot(
        &self,
        mut candidates: Vec<SlotRecord>,
        queued: &QueuedPartyReservation,
        party_size: u32,
    ) -> Option<SlotRecord> {
        let variant = queued.variant_id.as_deref().unwrap_or("");
        candidates.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        candidates.into_iter().find(|slot| {
            slot.status.is_dispatchable()
                && slot.variant_matches(variant)
                && eligibility::slot_fits_party(&self.state, slot, party_size)
        })
    }

    /// Hold the party's seats on `slot`. Returns false when no team slot was
    /// free after all (the reservation goes back to the queue front).
    pub(crate) async fn allocate_party(
        &mut self,
        mut queued: QueuedPartyReservation,
        slot: &SlotRecord,
    ) -> bool {
        let party_size = queued.snapshot.party_size() as u32;
        let Some(team_index) = eligibility::pick_team_index(&self.state, slot) else {
            self.queue_party(queued, true).await;
            return false;
        };

        queued.snapshot.target_server_id = Some(slot.server_id.clone());
        queued.snapshot.assigned_team_index = (team_index >= 0).then_some(team_index as u32);
        let reservation_id = queued.snapshot.reservation_id;

        self.state.occupancy_add(&slot.slot_id, party_size);
        self.state.active_parties.insert(
            reservation_id,
            PartyAllocation {
                snapshot: queued.snapshot,
                slot_id: slot.slot_id.clone(),
                server_id: slot.server_id.clone(),
                family_id: queued.family_id,
                variant_id: queued.variant_id,
                party_size,
                team_index,
                dispatched: HashSet::new(),
                completed: HashSet::new(),
                claimed: HashSet::new(),
                claim_failures: HashMap::new(),
                held_seats: party_size,
            },
        );
        CoreMetrics::increment(&self.metrics.party_allocations);
        tracing::info!(
            %reservation_id,
            slot_id = %slot.slot_id,
            party_size,
            team_index,
            "Party reservation allocated"
        );

        // Members that arrived before the allocation dispatch now.
        if let Some(mut waiting) = self
            .state
            .pending_party_player_requests
            .remove(&reservation_id)
        {
            while let Some(context) = waiting.pop_front() {
                self.dispatch_party_member(context).await;
            }
        }
        true
    }

    async fn queue_party(&mut self, queued: QueuedPartyReservation, front: bool) {
        let family_key = queued.family_id.to_lowercase();
        let provision_metadata = self.party_provision_metadata(&queued);
        let family = queued.family_id.clone();

        let slot_queue = self
            .state
            .pending_party_reservations
            .entry(family_key)
            .or_default();
        if front {
            slot_queue.push_front(queued);
        } else {
            slot_queue.push_back(queued);
        }
        self.provisioner
            .request_provision(&family, provision_metadata)
            .await;
    }

    fn party_provision_metadata(
        &self,
        queued: &QueuedPartyReservation,
    ) -> HashMap<String, String> {
        let mut metadata = HashMap::from([
            (
                meta_keys::PARTY_RESERVATION_ID.to_string(),
                queued.snapshot.reservation_id.to_string(),
            ),
            (
                meta_keys::PARTY_SIZE.to_string(),
                queued.snapshot.party_size().to_string(),
            ),
        ]);
        if let Some(variant) = &queued.variant_id {
            metadata.insert(meta_keys::VARIANT.to_string(), variant.clone());
        }
        metadata
    }

    /// Entry point for a slot request carrying a party reservation id.
    pub(crate) async fn on_party_member_request(&mut self, request: PlayerSlotRequest) {
        let raw = request
            .metadata
            .get(meta_keys::PARTY_RESERVATION_ID)
            .cloned()
            .unwrap_or_default();
        if uuid::Uuid::parse_str(&raw).is_err() {
            CoreMetrics::increment(&self.metrics.validation_errors);
            tracing::warn!(
                request_id = %request.request_id,
                reservation_id = %raw,
                "Malformed party reservation id; dropping request"
            );
            return;
        }

        let active_slot = self.state.player_active_slots.get(&request.player_id).cloned();
        self.state.active_requests.insert(request.request_id);
        let context = PlayerRequestContext::new(request, active_slot);
        self.dispatch_party_member(context).await;
    }

    /// Dispatch a party member against its allocation, or park the request
    /// until the allocation exists.
    pub(crate) async fn dispatch_party_member(&mut self, context: PlayerRequestContext) {
        let Some(reservation_id) = context.party_reservation_id() else {
            // Unreachable from the party path; treat as a plain request.
            Box::pin(self.try_route(context)).await;
            return;
        };

        if !self.state.active_parties.contains_key(&reservation_id) {
            self.state
                .pending_party_player_requests
                .entry(reservation_id)
                .or_default()
                .push_back(context);
            return;
        }

        let player_id = context.request.player_id;
        let Some((expected_token, slot_id, team_index, party_id)) =
            self.state.active_parties.get(&reservation_id).map(|allocation| {
                (
                    allocation.snapshot.tokens.get(&player_id).cloned(),
                    allocation.slot_id.clone(),
                    allocation.team_index,
                    allocation.snapshot.party_id,
                )
            })
        else {
            return;
        };

        let Some(expected_token) = expected_token else {
            self.terminate(context, reasons::PARTY_TOKEN_MISSING).await;
            return;
        };
        let provided = context.request.metadata.get(meta_keys::PARTY_TOKEN_ID);
        if provided != Some(&expected_token) {
            self.terminate(context, reasons::PARTY_TOKEN_MISMATCH).await;
            return;
        }

        let slot = self.slots.slot(&slot_id);
        let dispatchable = slot
            .as_ref()
            .is_some_and(|slot| slot.status.is_dispatchable());
        if !dispatchable {
            // Allocation's slot left service underneath us.
            self.requeue_party_reservation(reservation_id).await;
            self.state
                .pending_party_player_requests
                .entry(reservation_id)
                .or_default()
                .push_back(context);
            return;
        }
        let Some(slot) = slot else { return };

        let first_dispatch = {
            let Some(allocation) = self.state.active_parties.get_mut(&reservation_id) else {
                return;
            };
            let first = allocation.dispatched.insert(player_id);
            if first {
                // Hand the held seat over to the in-flight route.
                allocation.held_seats = allocation.held_seats.saturating_sub(1);
            }
            first
        };

        let dispatched = self
            .dispatch(
                context,
                &slot,
                &expected_token,
                first_dispatch,
                Some(team_index),
                Some(party_id),
            )
            .await;
        if !dispatched {
            // The member was refused at dispatch (roster lock) and will
            // never claim their seat: return the held seat and settle them
            // as a claim failure so the allocation can still release.
            let release = {
                let Some(allocation) = self.state.active_parties.get_mut(&reservation_id)
                else {
                    return;
                };
                if first_dispatch {
                    allocation.dispatched.remove(&player_id);
                    allocation.held_seats += 1;
                }
                allocation
                    .claim_failures
                    .insert(player_id, reasons::MATCH_ROSTER_LOCKED.to_string());
                allocation.claims_settled() || allocation.fully_completed()
            };
            if release {
                self.release_party(reservation_id, false);
            }
        }
    }

    /// A retried party member re-enters through the member path, so the
    /// allocation state stays authoritative.
    pub(crate) async fn requeue_party_member(&mut self, context: PlayerRequestContext) {
        self.dispatch_party_member(context).await;
    }

    pub(crate) async fn on_party_member_completed(
        &mut self,
        reservation_id: ReservationId,
        player_id: PlayerId,
    ) {
        let release = {
            let Some(allocation) = self.state.active_parties.get_mut(&reservation_id) else {
                return;
            };
            allocation.completed.insert(player_id);
            allocation
                .fully_completed()
                .then(|| allocation.claim_failures.is_empty())
        };
        if let Some(success) = release {
            self.release_party(reservation_id, success);
        }
    }

    pub(crate) async fn on_party_claimed(&mut self, claimed: PartyReservationClaimed) {
        let settled = {
            let Some(allocation) = self.state.active_parties.get_mut(&claimed.reservation_id)
            else {
                tracing::debug!(
                    reservation_id = %claimed.reservation_id,
                    "Claim for unknown party reservation"
                );
                return;
            };
            if claimed.success {
                allocation.claimed.insert(claimed.player_id);
            } else {
                allocation.claim_failures.insert(
                    claimed.player_id,
                    claimed.reason.unwrap_or_else(|| "claim-failed".to_string()),
                );
            }
            allocation
                .claims_settled()
                .then(|| allocation.claim_failures.is_empty())
        };

        if let Some(success) = settled {
            self.release_party(claimed.reservation_id, success);
        }
    }

    /// Drop the allocation and return any seats still held.
    pub(crate) fn release_party(&mut self, reservation_id: ReservationId, success: bool) {
        let Some(allocation) = self.state.active_parties.remove(&reservation_id) else {
            return;
        };
        self.state
            .occupancy_sub(&allocation.slot_id, allocation.held_seats);
        CoreMetrics::increment(&self.metrics.party_releases);
        tracing::info!(
            %reservation_id,
            slot_id = %allocation.slot_id,
            success,
            claimed = allocation.claimed.len(),
            failures = allocation.claim_failures.len(),
            "Party reservation released"
        );
    }

    /// Send an allocation back to the front of its family queue, e.g. when
    /// its slot left service before the party finished arriving.
    pub(crate) async fn requeue_party_reservation(&mut self, reservation_id: ReservationId) {
        let Some(allocation) = self.state.active_parties.remove(&reservation_id) else {
            return;
        };
        self.state
            .occupancy_sub(&allocation.slot_id, allocation.held_seats);
        CoreMetrics::increment(&self.metrics.party_requeues);
        tracing::info!(
            %reservation_id,
            slot_id = %allocation.slot_id,
            "Party reservation sent back to the queue"
        );

        let mut snapshot = allocation.snapshot;
        snapshot.target_server_id = None;
        snapshot.assigned_team_index = None;
        self.queue_party(
            QueuedPartyReservation {
                snapshot,
                family_id: allocation.family_id,
                variant_id: allocation.variant_id,
            },
            true,
        )
        .await;
    }

    /// A slot became AVAILABLE: allocate queued parties FIFO while they fit.
    pub(crate) async fn try_allocate_pending_parties(&mut self, slot: &SlotRecord) {
        let Some(family_key) = slot.family().map(str::to_lowercase) else {
            return;
        };
        loop {
            let Some(queued) = self
                .state
                .pending_party_reservations
                .get_mut(&family_key)
                .and_then(VecDeque::pop_front)
            else {
                break;
            };

            let party_size = queued.snapshot.party_size() as u32;
            let variant = queued.variant_id.clone().unwrap_or_default();
            let fits = slot.status.is_dispatchable()
                && slot.variant_matches(&variant)
                && eligibility::slot_fits_party(&self.state, slot, party_size);
            if !fits {
                // FIFO front blocks; put it back and wait for another slot.
                self.state
                    .pending_party_reservations
                    .entry(family_key.clone())
                    .or_default()
                    .push_front(queued);
                break;
            }
            if !self.allocate_party(queued, slot).await {
                break;
            }
        }

        if self
            .state
            .pending_party_reservations
            .get(&family_key)
            .is_some_and(VecDeque::is_empty)
        {
            self.state.pending_party_reservations.remove(&family_key);
        }
    }
}
