//! HTTP response cache with surrogate-key invalidation.
//!
//! Responses tagged with a `Surrogate-Key` header are recorded by the
//! caching middleware; the purge coordinator consumes key tokens from
//! the purge bus and evicts every entry tagged with that key. `"*"`
//! wipes the whole cache.

mod middleware;

pub use middleware::cache_middleware;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Channel capacity mandated for the purge bus.
pub const PURGE_BUS_CAPACITY: usize = 100;

/// Surrogate key attached to every response for a project.
pub fn surrogate_key(username: &str, project_name: &str) -> String {
    format!("{username}-{project_name}")
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    stored_at: Instant,
}

pub struct HttpCache {
    entries: DashMap<String, CacheEntry>,
    // surrogate key -> cache keys tagged with it
    surrogates: DashMap<String, HashSet<String>>,
    ttl: Duration,
}

impl HttpCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            surrogates: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.clone())
    }

    pub fn insert(
        &self,
        key: String,
        surrogate: String,
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) {
        self.entries.insert(
            key.clone(),
            CacheEntry {
                status,
                headers,
                body,
                stored_at: Instant::now(),
            },
        );
        self.surrogates.entry(surrogate).or_default().insert(key);
    }

    /// Evicts everything tagged with the surrogate key; returns how
    /// many entries were removed.
    pub fn purge_surrogate(&self, surrogate: &str) -> usize {
        let Some((_, keys)) = self.surrogates.remove(surrogate) else {
            return 0;
        };
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Drops every entry and the whole surrogate index.
    pub fn purge_all(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.surrogates.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sending half of the purge bus. Cheap to clone; one receiver per
/// process feeds the coordinator.
#[derive(Clone)]
pub struct PurgePublisher {
    tx: mpsc::Sender<String>,
}

impl PurgePublisher {
    /// Publishes a surrogate key. When the bus is full the token is
    /// dropped with a warning: purges are idempotent and the operator
    /// can re-run the command.
    pub fn publish(&self, key: &str) {
        if let Err(e) = self.tx.try_send(key.to_string()) {
            tracing::warn!(key = key, err = %e, "purge bus full, dropping purge token");
        }
    }
}

pub fn purge_bus() -> (PurgePublisher, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(PURGE_BUS_CAPACITY);
    (PurgePublisher { tx }, rx)
}

/// Long-running purge coordinator. Runs until every publisher is
/// dropped; malformed tokens are skipped so one bad line never stalls
/// the drain.
pub async fn cache_mgmt(cache: std::sync::Arc<HttpCache>, mut rx: mpsc::Receiver<String>) {
    while let Some(token) = rx.recv().await {
        let surrogate = token.trim();
        tracing::info!(surrogate_key = surrogate, "received cache-drain item");

        if surrogate.is_empty() {
            continue;
        }
        if surrogate == "*" {
            let removed = cache.purge_all();
            tracing::info!(removed, "cleared cache and surrogate key store");
            continue;
        }

        let removed = cache.purge_surrogate(surrogate);
        tracing::info!(surrogate_key = surrogate, removed, "purged surrogate entries");
    }
}
