use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

const LOWEST_DISCERNIBLE_MICROS: u64 = 1;
const HIGHEST_TRACKABLE_MICROS: u64 = 300_000_000; // 5 minutes in microseconds
const SIGNIFICANT_FIGURES: u8 = 3;

/// Metrics collection for the routing control plane.
///
/// Counters are plain relaxed atomics; route latency goes through an
/// HDR histogram guarded by a lock.
#[derive(Debug)]
pub struct CoreMetrics {
    // Routing metrics
    pub slot_requests_received: AtomicU64,
    pub slot_requests_deduplicated: AtomicU64,
    pub routes_dispatched: AtomicU64,
    pub routes_acked: AtomicU64,
    pub route_failures: AtomicU64,
    pub route_timeouts: AtomicU64,
    pub route_retries: AtomicU64,
    pub requests_queued: AtomicU64,
    pub queue_timeouts: AtomicU64,
    pub disconnects_sent: AtomicU64,

    // Reservation metrics
    pub reservations_requested: AtomicU64,
    pub reservations_granted: AtomicU64,
    pub reservations_rejected: AtomicU64,
    pub reservations_timed_out: AtomicU64,
    pub reservations_consumed: AtomicU64,
    pub reservations_expired: AtomicU64,

    // Party metrics
    pub party_allocations: AtomicU64,
    pub party_releases: AtomicU64,
    pub party_requeues: AtomicU64,

    // Roster metrics
    pub roster_locks_enforced: AtomicU64,

    // Environment routing metrics
    pub environment_routes: AtomicU64,
    pub environment_route_failures: AtomicU64,

    // Provisioning metrics
    pub provisions_requested: AtomicU64,
    pub provisions_throttled: AtomicU64,

    // Registry metrics
    pub servers_registered: AtomicU64,
    pub servers_evicted: AtomicU64,
    pub registration_failures: AtomicU64,
    pub proxies_evicted: AtomicU64,

    // Bus metrics
    pub bus_messages_published: AtomicU64,
    pub bus_dedup_hits: AtomicU64,
    pub bus_requests_timed_out: AtomicU64,

    // Error tracking
    pub validation_errors: AtomicU64,
    pub handler_errors: AtomicU64,

    route_latency: RwLock<RouteLatencyTracker>,
}

impl CoreMetrics {
    pub fn new() -> Self {
        Self {
            slot_requests_received: AtomicU64::new(0),
            slot_requests_deduplicated: AtomicU64::new(0),
            routes_dispatched: AtomicU64::new(0),
            routes_acked: AtomicU64::new(0),
            route_failures: AtomicU64::new(0),
            route_timeouts: AtomicU64::new(0),
            route_retries: AtomicU64::new(0),
            requests_queued: AtomicU64::new(0),
            queue_timeouts: AtomicU64::new(0),
            disconnects_sent: AtomicU64::new(0),
            reservations_requested: AtomicU64::new(0),
            reservations_granted: AtomicU64::new(0),
            reservations_rejected: AtomicU64::new(0),
            reservations_timed_out: AtomicU64::new(0),
            reservations_consumed: AtomicU64::new(0),
            reservations_expired: AtomicU64::new(0),
            party_allocations: AtomicU64::new(0),
            party_releases: AtomicU64::new(0),
            party_requeues: AtomicU64::new(0),
            roster_locks_enforced: AtomicU64::new(0),
            environment_routes: AtomicU64::new(0),
            environment_route_failures: AtomicU64::new(0),
            provisions_requested: AtomicU64::new(0),
            provisions_throttled: AtomicU64::new(0),
            servers_registered: AtomicU64::new(0),
            servers_evicted: AtomicU64::new(0),
            registration_failures: AtomicU64::new(0),
            proxies_evicted: AtomicU64::new(0),
            bus_messages_published: AtomicU64::new(0),
            bus_dedup_hits: AtomicU64::new(0),
            bus_requests_timed_out: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            route_latency: RwLock::new(RouteLatencyTracker::new()),
        }
    }

    #[inline]
    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the dispatch-to-ack latency of one completed route.
    pub async fn record_route_latency(&self, latency: Duration) {
        let mut tracker = self.route_latency.write().await;
        tracker.record(latency);
    }

    /// Consistent point-in-time snapshot for the status endpoint.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let latency = self.route_latency.read().await.snapshot();
        MetricsSnapshot {
            timestamp: chrono::Utc::now(),
            routing: RoutingMetrics {
                slot_requests_received: load(&self.slot_requests_received),
                slot_requests_deduplicated: load(&self.slot_requests_deduplicated),
                routes_dispatched: load(&self.routes_dispatched),
                routes_acked: load(&self.routes_acked),
                route_failures: load(&self.route_failures),
                route_timeouts: load(&self.route_timeouts),
                route_retries: load(&self.route_retries),
                requests_queued: load(&self.requests_queued),
                queue_timeouts: load(&self.queue_timeouts),
                disconnects_sent: load(&self.disconnects_sent),
            },
            reservations: ReservationMetrics {
                requested: load(&self.reservations_requested),
                granted: load(&self.reservations_granted),
                rejected: load(&self.reservations_rejected),
                timed_out: load(&self.reservations_timed_out),
                consumed: load(&self.reservations_consumed),
                expired: load(&self.reservations_expired),
            },
            parties: PartyMetrics {
                allocations: load(&self.party_allocations),
                releases: load(&self.party_releases),
                requeues: load(&self.party_requeues),
            },
            rosters: RosterMetrics {
                locks_enforced: load(&self.roster_locks_enforced),
            },
            environment: EnvironmentMetrics {
                routes: load(&self.environment_routes),
                failures: load(&self.environment_route_failures),
            },
            provisioning: ProvisioningMetrics {
                requested: load(&self.provisions_requested),
                throttled: load(&self.provisions_throttled),
            },
            registry: RegistryMetrics {
                servers_registered: load(&self.servers_registered),
                servers_evicted: load(&self.servers_evicted),
                registration_failures: load(&self.registration_failures),
                proxies_evicted: load(&self.proxies_evicted),
            },
            bus: BusMetrics {
                messages_published: load(&self.bus_messages_published),
                dedup_hits: load(&self.bus_dedup_hits),
                requests_timed_out: load(&self.bus_requests_timed_out),
            },
            errors: ErrorMetrics {
                validation_errors: load(&self.validation_errors),
                handler_errors: load(&self.handler_errors),
            },
            route_latency: latency,
        }
    }
}

impl Default for CoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// HDR-histogram wrapper tracking dispatch-to-ack route latency.
#[derive(Debug)]
pub struct RouteLatencyTracker {
    /// None only if histogram construction failed (should be rare)
    histogram: Option<Histogram<u64>>,
    clamped_samples: u64,
}

impl RouteLatencyTracker {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(
            LOWEST_DISCERNIBLE_MICROS,
            HIGHEST_TRACKABLE_MICROS,
            SIGNIFICANT_FIGURES,
        )
        .ok();
        Self {
            histogram,
            clamped_samples: 0,
        }
    }

    pub fn record(&mut self, latency: Duration) {
        let Some(histogram) = self.histogram.as_mut() else {
            return;
        };
        let mut micros = u64::try_from(latency.as_micros()).unwrap_or(HIGHEST_TRACKABLE_MICROS);
        if micros > HIGHEST_TRACKABLE_MICROS {
            micros = HIGHEST_TRACKABLE_MICROS;
            self.clamped_samples += 1;
        }
        let _ = histogram.record(micros.max(LOWEST_DISCERNIBLE_MICROS));
    }

    pub fn snapshot(&self) -> RouteLatencySnapshot {
        match &self.histogram {
            Some(histogram) => RouteLatencySnapshot {
                samples: histogram.len(),
                p50_micros: histogram.value_at_quantile(0.50),
                p90_micros: histogram.value_at_quantile(0.90),
                p99_micros: histogram.value_at_quantile(0.99),
                max_micros: histogram.max(),
                clamped_samples: self.clamped_samples,
            },
            None => RouteLatencySnapshot::default(),
        }
    }
}

impl Default for RouteLatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing: RoutingMetrics,
    pub reservations: ReservationMetrics,
    pub parties: PartyMetrics,
    pub rosters: RosterMetrics,
    pub environment: EnvironmentMetrics,
    pub provisioning: ProvisioningMetrics,
    pub registry: RegistryMetrics,
    pub bus: BusMetrics,
    pub errors: ErrorMetrics,
    pub route_latency: RouteLatencySnapshot,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoutingMetrics {
    pub slot_requests_received: u64,
    pub slot_requests_deduplicated: u64,
    pub routes_dispatched: u64,
    pub routes_acked: u64,
    pub route_failures: u64,
    pub route_timeouts: u64,
    pub route_retries: u64,
    pub requests_queued: u64,
    pub queue_timeouts: u64,
    pub disconnects_sent: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReservationMetrics {
    pub requested: u64,
    pub granted: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub consumed: u64,
    pub expired: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PartyMetrics {
    pub allocations: u64,
    pub releases: u64,
    pub requeues: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RosterMetrics {
    pub locks_enforced: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnvironmentMetrics {
    pub routes: u64,
    pub failures: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProvisioningMetrics {
    pub requested: u64,
    pub throttled: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryMetrics {
    pub servers_registered: u64,
    pub servers_evicted: u64,
    pub registration_failures: u64,
    pub proxies_evicted: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusMetrics {
    pub messages_published: u64,
    pub dedup_hits: u64,
    pub requests_timed_out: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorMetrics {
    pub validation_errors: u64,
    pub handler_errors: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RouteLatencySnapshot {
    pub samples: u64,
    pub p50_micros: u64,
    pub p90_micros: u64,
    pub p99_micros: u64,
    pub max_micros: u64,
    pub clamped_samples: u64,
}
