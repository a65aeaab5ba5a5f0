//! Per-proxy byte accounting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::observability::metrics;
use crate::proxy::Traffic;

/// Point-in-time byte totals for one proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub inbound: u64,
    pub outbound: u64,
}

#[derive(Debug, Default)]
struct Counters {
    inbound: AtomicU64,
    outbound: AtomicU64,
}

/// Thread-safe [`Traffic`] sink backed by atomic counters.
#[derive(Debug, Clone, Default)]
pub struct TrafficCounter {
    inner: Arc<DashMap<String, Counters>>,
}

impl TrafficCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals for one proxy, if it has seen any traffic.
    pub fn get(&self, proxy: &str) -> Option<TrafficStats> {
        self.inner.get(proxy).map(|c| TrafficStats {
            inbound: c.inbound.load(Ordering::Relaxed),
            outbound: c.outbound.load(Ordering::Relaxed),
        })
    }

    /// Totals for every proxy.
    pub fn snapshot(&self) -> HashMap<String, TrafficStats> {
        self.inner
            .iter()
            .map(|r| {
                let stats = TrafficStats {
                    inbound: r.value().inbound.load(Ordering::Relaxed),
                    outbound: r.value().outbound.load(Ordering::Relaxed),
                };
                (r.key().clone(), stats)
            })
            .collect()
    }

    fn add(&self, proxy: &str, bytes: u64, pick: impl Fn(&Counters) -> &AtomicU64) {
        // Fast path avoids allocating the key for proxies we already know.
        if let Some(counters) = self.inner.get(proxy) {
            pick(counters.value()).fetch_add(bytes, Ordering::Relaxed);
            return;
        }
        let counters = self.inner.entry(proxy.to_string()).or_default();
        pick(counters.value()).fetch_add(bytes, Ordering::Relaxed);
    }
}

impl Traffic for TrafficCounter {
    fn inbound(&self, proxy: &str, bytes: u64) {
        self.add(proxy, bytes, |c| &c.inbound);
        metrics::record_traffic(proxy, "in", bytes);
    }

    fn outbound(&self, proxy: &str, bytes: u64) {
        self.add(proxy, bytes, |c| &c.outbound);
        metrics::record_traffic(proxy, "out", bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_proxy() {
        let counter = TrafficCounter::new();
        counter.inbound("a", 10);
        counter.inbound("a", 5);
        counter.outbound("a", 7);
        counter.outbound("b", 1);

        assert_eq!(counter.get("a"), Some(TrafficStats { inbound: 15, outbound: 7 }));
        assert_eq!(counter.get("b"), Some(TrafficStats { inbound: 0, outbound: 1 }));
        assert_eq!(counter.get("c"), None);
        assert_eq!(counter.snapshot().len(), 2);
    }

    #[test]
    fn clones_share_counters() {
        let counter = TrafficCounter::new();
        let shared = counter.clone();
        shared.inbound("a", 3);
        assert_eq!(counter.get("a").unwrap().inbound, 3);
    }

    #[test]
    fn snapshot_serializes() {
        let counter = TrafficCounter::new();
        counter.outbound("ssh", 42);
        let json = serde_json::to_string(&counter.snapshot()).unwrap();
        assert_eq!(json, r#"{"ssh":{"inbound":0,"outbound":42}}"#);
    }
}
