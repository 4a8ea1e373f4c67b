//! Two-level response cache.
//!
//! Level one is an exact match on a normalized fingerprint; level two is a
//! semantic match over stored query embeddings. Entries expire by TTL and
//! evict least-recently-used at capacity. A per-fingerprint flight lock
//! collapses concurrent identical misses into one upstream call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opal_core::OpalConfig;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::embedding::{cosine, embed};
use crate::types::Query;

const FLIGHT_MAP_SWEEP_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Exact-match cache key: SHA-256 over the lowercased, whitespace-collapsed
/// query text and conversation context. Stable across runs.
pub fn fingerprint(query: &Query) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(&query.text));
    for turn in &query.conversation_context {
        hasher.update(b"\n");
        hasher.update(normalize(turn));
    }
    hex::encode(hasher.finalize())
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn semantic_text(query: &Query) -> String {
    let mut combined = normalize(&query.text);
    for turn in &query.conversation_context {
        combined.push('\n');
        combined.push_str(&normalize(turn));
    }
    combined
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Maximum stored entries. Zero disables the cache entirely.
    pub capacity: usize,
    /// Cosine similarity at or above which a semantic lookup hits.
    pub semantic_hit_threshold: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            capacity: 256,
            semantic_hit_threshold: 0.92,
        }
    }
}

impl CacheConfig {
    pub fn from_config(config: &OpalConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.cache_ttl_secs),
            capacity: config.cache_capacity,
            semantic_hit_threshold: config.semantic_hit_threshold,
        }
    }
}

/// What the cache stores and returns.
#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub content: String,
    pub provider_used: String,
}

struct Entry {
    payload: CachedPayload,
    embedding: Vec<f32>,
    inserted: Instant,
    last_used: Instant,
}

/// Held while one caller resolves a miss; concurrent identical queries wait
/// on it and re-check the cache instead of duplicating the upstream call.
pub struct FlightGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

// ---------------------------------------------------------------------------
// ResponseCache
// ---------------------------------------------------------------------------

pub struct ResponseCache {
    entries: Mutex<HashMap<String, Entry>>,
    flights: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.capacity > 0
    }

    /// Exact lookup first, then semantic. A hit refreshes recency but not
    /// the TTL clock.
    pub fn lookup(&self, query: &Query) -> Option<CachedPayload> {
        if !self.is_enabled() {
            return None;
        }
        let now = Instant::now();
        let key = fingerprint(query);
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| now.duration_since(entry.inserted) < self.config.ttl);

        if let Some(entry) = entries.get_mut(&key) {
            entry.last_used = now;
            debug!("Exact cache hit");
            return Some(entry.payload.clone());
        }

        let probe = embed(&semantic_text(query));
        let best = entries
            .iter_mut()
            .map(|(_, entry)| {
                let similarity = cosine(&probe, &entry.embedding);
                (similarity, entry)
            })
            .filter(|(similarity, _)| *similarity >= self.config.semantic_hit_threshold)
            .max_by(|a, b| a.0.total_cmp(&b.0));

        if let Some((similarity, entry)) = best {
            entry.last_used = now;
            debug!(similarity, "Semantic cache hit");
            return Some(entry.payload.clone());
        }
        None
    }

    /// Store a resolved response. Evicts the least-recently-used entry when
    /// at capacity. No-op while disabled.
    pub fn store(&self, query: &Query, payload: CachedPayload) {
        if !self.is_enabled() {
            return;
        }
        let now = Instant::now();
        let key = fingerprint(query);
        let embedding = embed(&semantic_text(query));
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| now.duration_since(entry.inserted) < self.config.ttl);

        if !entries.contains_key(&key) && entries.len() >= self.config.capacity {
            let evict = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(evict) = evict {
                debug!("Evicting least-recently-used cache entry");
                entries.remove(&evict);
            }
        }

        entries.insert(
            key,
            Entry {
                payload,
                embedding,
                inserted: now,
                last_used: now,
            },
        );
    }

    /// Serialize resolution of one fingerprint. The caller should re-check
    /// [`Self::lookup`] after the guard is acquired; a concurrent flight may
    /// have populated the entry while this one waited. `None` while the
    /// cache is disabled.
    pub async fn begin_flight(&self, fingerprint: &str) -> Option<FlightGuard> {
        if !self.is_enabled() {
            return None;
        }
        let mutex = {
            let mut flights = self.flights.lock();
            if flights.len() > FLIGHT_MAP_SWEEP_LEN {
                flights.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(flights.entry(fingerprint.to_string()).or_default())
        };
        let guard = mutex.lock_owned().await;
        Some(FlightGuard { _guard: guard })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
