//! Slot provisioning.
//!
//! When routing finds no eligible slot for a family, it asks this service to
//! pick a backend advertising the family and send it a provision command. At
//! most one provision is outstanding per family; the flag clears when an
//! AVAILABLE slot for the family is observed on the bus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::bus::{channels, handler_fn, MessageBus};
use crate::metrics::CoreMetrics;
use crate::protocol::{Message, SlotProvisionCommand, SlotStatus};
use crate::registry::ServerRegistry;

/// The narrow interface routing uses to trigger provisioning.
#[async_trait]
pub trait ProvisionTrigger: Send + Sync {
    /// Ask for a slot of `family_id`; returns the chosen server id, or
    /// `None` when nothing is eligible or a provision is already in flight.
    async fn request_provision(
        &self,
        family_id: &str,
        metadata: HashMap<String, String>,
    ) -> Option<String>;
}

pub struct SlotProvisioner {
    bus: Arc<dyn MessageBus>,
    servers: Arc<ServerRegistry>,
    metrics: Arc<CoreMetrics>,
    /// Advertised families per server, keyed by lowercase family id
    advertisements: DashMap<String, HashMap<String, u32>>,
    /// Families with an outstanding provision command
    in_flight: DashMap<String, DateTime<Utc>>,
}

impl SlotProvisioner {
    pub async fn start(
        bus: Arc<dyn MessageBus>,
        servers: Arc<ServerRegistry>,
        metrics: Arc<CoreMetrics>,
    ) -> Arc<Self> {
        let provisioner = Arc::new(Self {
            bus,
            servers,
            metrics,
            advertisements: DashMap::new(),
            in_flight: DashMap::new(),
        });

        let service = provisioner.clone();
        let _ = provisioner
            .bus
            .subscribe(
                channels::SLOT_FAMILY_ADVERTISEMENT,
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_advertisement(envelope) }
                }),
            )
            .await;

        let service = provisioner.clone();
        let _ = provisioner
            .bus
            .subscribe(
                channels::REGISTRY_SLOT_STATUS,
                handler_fn(move |envelope| {
                    let service = service.clone();
                    async move { service.on_slot_status(envelope) }
                }),
            )
            .await;

        provisioner
    }

    fn on_advertisement(&self, envelope: crate::bus::Envelope) {
        let advertisement = match &envelope.message {
            Message::SlotFamilyAdvertisement(advertisement) => advertisement,
            other => {
                tracing::warn!(kind = other.kind(), "Unexpected message on advertisement channel");
                return;
            }
        };
        let families: HashMap<String, u32> = advertisement
            .families
            .iter()
            .map(|family| (family.family_id.to_lowercase(), family.max_slots))
            .collect();
        tracing::debug!(
            server_id = %advertisement.server_id,
            families = families.len(),
            "Recorded family advertisement"
        );
        self.advertisements
            .insert(advertisement.server_id.clone(), families);
    }

    fn on_slot_status(&self, envelope: crate::bus::Envelope) {
        let Message::SlotStatusUpdate(update) = envelope.message else {
            return;
        };
        if update.status != SlotStatus::Available {
            return;
        }
        if let Some(family) = update.metadata.get(crate::protocol::meta_keys::FAMILY) {
            if self.in_flight.remove(&family.to_lowercase()).is_some() {
                tracing::debug!(%family, "Provision completed; throttle cleared");
            }
        }
    }

    /// Active (non-faulted) slots a server currently hosts for a family.
    fn current_slot_count(&self, server_id: &str, family_id: &str) -> usize {
        self.servers
            .slots_on_server(server_id, family_id)
            .iter()
            .filter(|slot| slot.status != SlotStatus::Faulted)
            .count()
    }

    fn pick_backend(&self, family_id: &str) -> Option<String> {
        let family_key = family_id.to_lowercase();
        let mut best: Option<(f64, DateTime<Utc>, String)> = None;

        for entry in self.advertisements.iter() {
            let server_id = entry.key();
            let Some(&max_slots) = entry.value().get(&family_key) else {
                continue;
            };
            let Some(summary) = self.servers.server_summary(server_id) else {
                continue;
            };
            if !summary.status.is_accepting() {
                continue;
            }

            let current = self.current_slot_count(server_id, family_id) as u32;
            if max_slots > 0 && current >= max_slots {
                continue;
            }
            let ratio = f64::from(current) / f64::from(max_slots.max(1));

            let candidate = (ratio, summary.last_heartbeat_at, server_id.clone());
            let better = match &best {
                None => true,
                Some((best_ratio, best_heartbeat, _)) => {
                    ratio < *best_ratio
                        || (ratio == *best_ratio && summary.last_heartbeat_at < *best_heartbeat)
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        best.map(|(_, _, server_id)| server_id)
    }
}

#[async_trait]
impl ProvisionTrigger for SlotProvisioner {
    async fn request_provision(
        &self,
        family_id: &str,
        metadata: HashMap<String, String>,
    ) -> Option<String> {
        let family_key = family_id.to_lowercase();
        if self.in_flight.contains_key(&family_key) {
            CoreMetrics::increment(&self.metrics.provisions_throttled);
            return None;
        }

        let server_id = self.pick_backend(family_id)?;
        let command = SlotProvisionCommand {
            family_id: family_id.to_string(),
            metadata,
        };
        if let Err(error) = self
            .bus
            .send(
                &server_id,
                channels::SLOT_PROVISION_COMMAND,
                Message::SlotProvisionCommand(command),
            )
            .await
        {
            tracing::error!(%error, %server_id, family = %family_id, "Failed to send provision command");
            return None;
        }

        self.in_flight.insert(family_key, Utc::now());
        CoreMetrics::increment(&self.metrics.provisions_requested);
        tracing::info!(family = %family_id, %server_id, "Provision requested");
        Some(server_id)
    }
}
