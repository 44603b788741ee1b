//! Slot status reactions: queue draining, slot-unavailable handling, and the
//! periodic queue-wait sweep.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::metrics::CoreMetrics;
use crate::protocol::{reasons, slot_id, RequestId, ReservationId, SlotStatus, SlotStatusUpdate};
use crate::registry::SlotRecord;

use super::eligibility;
use super::state::slot_key;
use super::RoutingWorker;

impl RoutingWorker {
    pub(crate) async fn on_slot_status(&mut self, update: SlotStatusUpdate) {
        let full_slot_id = update
            .slot_id
            .clone()
            .unwrap_or_else(|| slot_id(&update.server_id, &update.slot_suffix));
        let key = slot_key(&full_slot_id);

        let previous = self.state.known_slot_status.insert(key, update.status);
        if previous == Some(update.status) {
            // Replayed update with an unchanged status is a no-op.
            return;
        }

        match update.status {
            SlotStatus::Available => {
                let slot = self
                    .slots
                    .slot(&full_slot_id)
                    .unwrap_or_else(|| slot_from_update(&update, &full_slot_id));
                self.try_allocate_pending_parties(&slot).await;
                self.drain_family_queue(&slot).await;
            }
            SlotStatus::Provisioning | SlotStatus::Cooldown | SlotStatus::Faulted => {
                self.handle_slot_unavailable(&full_slot_id, reasons::SLOT_UNAVAILABLE)
                    .await;
            }
            SlotStatus::Allocated | SlotStatus::InGame => {}
        }
    }

    /// FIFO drain of one family queue into a freshly AVAILABLE slot.
    ///
    /// At most the queue's starting length is inspected per drain, so
    /// re-appended contexts (blocked slot, variant mismatch) cannot
    /// circulate forever within one pass.
    pub(crate) async fn drain_family_queue(&mut self, slot: &SlotRecord) {
        let Some(family) = slot.family().map(str::to_lowercase) else {
            return;
        };
        let initial = self
            .state
            .pending_queues
            .get(&family)
            .map_or(0, VecDeque::len);

        for _ in 0..initial {
            if !eligibility::has_seat_room(&self.state, slot, 1) {
                break;
            }
            let Some(context) = self
                .state
                .pending_queues
                .get_mut(&family)
                .and_then(VecDeque::pop_front)
            else {
                break;
            };

            if context.exceeded_wait(self.config.max_queue_wait()) {
                CoreMetrics::increment(&self.metrics.queue_timeouts);
                self.terminate(context, reasons::QUEUE_TIMEOUT).await;
                continue;
            }

            let blocked_here = context
                .blocked_slot_id
                .as_deref()
                .is_some_and(|blocked| slot_key(blocked) == slot_key(&slot.slot_id));
            let fits = !blocked_here
                && slot.variant_matches(context.variant())
                && self
                    .state
                    .roster_allows(&slot.slot_id, &context.request.player_id);
            if fits {
                self.begin_reservation(context, slot.clone()).await;
            } else if let Some(queue) = self.state.pending_queues.get_mut(&family) {
                queue.push_back(context);
            }
        }

        if self
            .state
            .pending_queues
            .get(&family)
            .is_some_and(VecDeque::is_empty)
        {
            self.state.pending_queues.remove(&family);
        }
    }

    /// A slot left service: clear its bookkeeping and send everything bound
    /// to it back through the retry path.
    pub(crate) async fn handle_slot_unavailable(&mut self, unavailable_slot_id: &str, reason: &str) {
        let key = slot_key(unavailable_slot_id);
        tracing::info!(slot_id = %unavailable_slot_id, %reason, "Slot left service");

        self.state.pending_occupancy.remove(&key);
        self.state.reserving.remove(&key);
        self.state.match_rosters.remove(&key);

        let reservation_ids: Vec<Uuid> = self
            .state
            .pending_reservations
            .iter()
            .filter(|(_, pending)| slot_key(&pending.slot.slot_id) == key)
            .map(|(id, _)| *id)
            .collect();
        for id in reservation_ids {
            if let Some(pending) = self.state.pending_reservations.remove(&id) {
                pending.timeout.abort();
                self.retry_request(pending.context, reason).await;
            }
        }

        let request_ids: Vec<RequestId> = self
            .state
            .in_flight
            .iter()
            .filter(|(_, route)| slot_key(&route.slot_id) == key)
            .map(|(id, _)| *id)
            .collect();
        for request_id in request_ids {
            if let Some(route) = self.state.in_flight.remove(&request_id) {
                route.timeout.abort();
                self.retry_request(route.context, reason).await;
            }
        }

        let party_ids: Vec<ReservationId> = self
            .state
            .active_parties
            .iter()
            .filter(|(_, allocation)| slot_key(&allocation.slot_id) == key)
            .map(|(id, _)| *id)
            .collect();
        for reservation_id in party_ids {
            self.requeue_party_reservation(reservation_id).await;
        }
    }

    /// Periodic expiry of queued contexts; nothing waits past the budget.
    pub(crate) async fn sweep_expired(&mut self) {
        let max_wait = self.config.max_queue_wait();

        let families: Vec<String> = self.state.pending_queues.keys().cloned().collect();
        for family in families {
            let Some(mut queue) = self.state.pending_queues.remove(&family) else {
                continue;
            };
            let mut keep = VecDeque::with_capacity(queue.len());
            let mut expired = Vec::new();
            while let Some(context) = queue.pop_front() {
                if context.exceeded_wait(max_wait) {
                    expired.push(context);
                } else {
                    keep.push_back(context);
                }
            }
            if !keep.is_empty() {
                self.state.pending_queues.insert(family, keep);
            }
            for context in expired {
                CoreMetrics::increment(&self.metrics.queue_timeouts);
                self.terminate(context, reasons::QUEUE_TIMEOUT).await;
            }
        }

        let reservation_ids: Vec<ReservationId> = self
            .state
            .pending_party_player_requests
            .keys()
            .copied()
            .collect();
        for reservation_id in reservation_ids {
            let Some(mut queue) = self
                .state
                .pending_party_player_requests
                .remove(&reservation_id)
            else {
                continue;
            };
            let mut keep = VecDeque::with_capacity(queue.len());
            let mut expired = Vec::new();
            while let Some(context) = queue.pop_front() {
                if context.exceeded_wait(max_wait) {
                    expired.push(context);
                } else {
                    keep.push_back(context);
                }
            }
            if !keep.is_empty() {
                self.state
                    .pending_party_player_requests
                    .insert(reservation_id, keep);
            }
            for context in expired {
                CoreMetrics::increment(&self.metrics.queue_timeouts);
                self.terminate(context, reasons::QUEUE_TIMEOUT).await;
            }
        }
    }
}

fn slot_from_update(update: &SlotStatusUpdate, full_slot_id: &str) -> SlotRecord {
    SlotRecord {
        slot_id: full_slot_id.to_string(),
        server_id: update.server_id.clone(),
        slot_suffix: update.slot_suffix.clone(),
        game_type: update.game_type.clone(),
        status: update.status,
        max_players: update.max_players,
        online_players: update.online_players,
        metadata: update.metadata.clone(),
        updated_at: chrono::Utc::now(),
    }
}
