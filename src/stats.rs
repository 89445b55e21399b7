use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{FailureKind, GatewayError};
use crate::response::{Response, ResponseStatus};

/// Outcome counters for one gateway instance
pub struct GatewayStats {
    start_time: Instant,
    calls: AtomicU64,
    cache_hits: AtomicU64,
    provider_attempts: AtomicU64,
    successes: AtomicU64,
    partial_successes: AtomicU64,
    quota_denied: AtomicU64,
    provider_unavailable: AtomicU64,
    rejected: AtomicU64,
    unparseable: AtomicU64,
    /// Logical calls by cache namespace
    namespaces: RwLock<HashMap<String, AtomicU64>>,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            calls: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            provider_attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            partial_successes: AtomicU64::new(0),
            quota_denied: AtomicU64::new(0),
            provider_unavailable: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            unparseable: AtomicU64::new(0),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_call(&self, namespace: &str) {
        self.calls.fetch_add(1, Ordering::Relaxed);

        {
            let read = self.namespaces.read();
            if let Some(counter) = read.get(namespace) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.provider_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the terminal outcome of a logical call
    pub fn record_outcome(&self, response: &Response) {
        match (&response.status, &response.error) {
            (ResponseStatus::Success, _) => self.successes.fetch_add(1, Ordering::Relaxed),
            (ResponseStatus::PartialSuccess, _) => {
                self.partial_successes.fetch_add(1, Ordering::Relaxed)
            }
            (ResponseStatus::Failure, Some(error)) => {
                self.failure_counter(error).fetch_add(1, Ordering::Relaxed)
            }
            (ResponseStatus::Failure, None) => {
                self.provider_unavailable.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    fn failure_counter(&self, error: &GatewayError) -> &AtomicU64 {
        match error.kind() {
            FailureKind::QuotaDenied => &self.quota_denied,
            FailureKind::ProviderUnavailable => &self.provider_unavailable,
            FailureKind::Rejected => &self.rejected,
            FailureKind::Unparseable => &self.unparseable,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn summary(&self) -> StatsSummary {
        let mut namespaces: Vec<NamespaceStats> = self
            .namespaces
            .read()
            .iter()
            .map(|(namespace, count)| NamespaceStats {
                namespace: namespace.clone(),
                calls: count.load(Ordering::Relaxed),
            })
            .collect();
        namespaces.sort_by(|a, b| a.namespace.cmp(&b.namespace));

        StatsSummary {
            uptime_seconds: self.uptime().as_secs(),
            calls: self.calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            provider_attempts: self.provider_attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            partial_successes: self.partial_successes.load(Ordering::Relaxed),
            quota_denied: self.quota_denied.load(Ordering::Relaxed),
            provider_unavailable: self.provider_unavailable.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unparseable: self.unparseable.load(Ordering::Relaxed),
            namespaces,
        }
    }
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub uptime_seconds: u64,
    pub calls: u64,
    pub cache_hits: u64,
    pub provider_attempts: u64,
    pub successes: u64,
    pub partial_successes: u64,
    pub quota_denied: u64,
    pub provider_unavailable: u64,
    pub rejected: u64,
    pub unparseable: u64,
    pub namespaces: Vec<NamespaceStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStats {
    pub namespace: String,
    pub calls: u64,
}

impl StatsSummary {
    pub fn failures(&self) -> u64 {
        self.quota_denied + self.provider_unavailable + self.rejected + self.unparseable
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
