use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::protocol::{ProxyAnnounce, ProxyHeartbeat, ProxyInfo, ProxyKind};

/// A self-registered edge proxy.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyRecord {
    pub proxy_id: String,
    pub address: String,
    pub hard_cap: u32,
    pub soft_cap: u32,
    pub current_player_count: u32,
    pub kind: ProxyKind,
    pub last_heartbeat_at: DateTime<Utc>,
    pub announced_at: DateTime<Utc>,
}

/// Registry of live edge proxies; TTL-evicted on heartbeat staleness.
#[derive(Default)]
pub struct ProxyRegistry {
    proxies: DashMap<String, ProxyRecord>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_announce(&self, announce: &ProxyAnnounce) {
        let now = Utc::now();
        let announced_at = self
            .proxies
            .get(&announce.proxy_id)
            .map_or(now, |existing| existing.announced_at);
        self.proxies.insert(
            announce.proxy_id.clone(),
            ProxyRecord {
                proxy_id: announce.proxy_id.clone(),
                address: announce.address.clone(),
                hard_cap: announce.hard_cap,
                soft_cap: announce.soft_cap,
                current_player_count: 0,
                kind: announce.kind,
                last_heartbeat_at: now,
                announced_at,
            },
        );
        tracing::info!(proxy_id = %announce.proxy_id, address = %announce.address, "Proxy announced");
    }

    /// Merge a heartbeat; returns false when the proxy never announced.
    pub fn apply_heartbeat(&self, heartbeat: &ProxyHeartbeat) -> bool {
        let Some(mut record) = self.proxies.get_mut(&heartbeat.proxy_id) else {
            return false;
        };
        record.last_heartbeat_at = Utc::now();
        record.current_player_count = heartbeat.player_count;
        true
    }

    pub fn remove(&self, proxy_id: &str) -> Option<ProxyRecord> {
        self.proxies.remove(proxy_id).map(|(_, record)| record)
    }

    pub fn is_known(&self, proxy_id: &str) -> bool {
        self.proxies.contains_key(proxy_id)
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Proxy ids whose heartbeat is older than `timeout`.
    pub fn collect_stale(&self, timeout: std::time::Duration) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(60));
        self.proxies
            .iter()
            .filter(|entry| entry.last_heartbeat_at < cutoff)
            .map(|entry| entry.proxy_id.clone())
            .collect()
    }

    /// Discovery view of the known proxies.
    pub fn known_proxies(&self) -> Vec<ProxyInfo> {
        self.proxies
            .iter()
            .map(|entry| ProxyInfo {
                proxy_id: entry.proxy_id.clone(),
                address: entry.address.clone(),
                player_count: entry.current_player_count,
                kind: entry.kind,
            })
            .collect()
    }

    /// Copy-on-read view of every proxy record.
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.proxies.iter().map(|entry| entry.clone()).collect()
    }
}
