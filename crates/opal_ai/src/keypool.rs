//! API key pool.
//!
//! Per-provider credential rotation with cooldown state. Rate-limit failures
//! put a key into an exponentially growing cooldown (base doubling per
//! consecutive failure, capped); the key becomes selectable again the moment
//! the cooldown elapses. Lock scope is a single pool mutation, never a
//! request lifetime.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::types::ProviderId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Backoff parameters for key cooldowns.
#[derive(Debug, Clone)]
pub struct KeyPoolConfig {
    /// Cooldown after the first rate-limit failure on a key.
    pub backoff_base: Duration,
    /// Upper bound on any cooldown.
    pub backoff_cap: Duration,
}

impl Default for KeyPoolConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

/// All keys for one provider are cooling.
/// A normal condition under load, not a fatal error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("all API keys for {0} are cooling down")]
pub struct Exhausted(pub ProviderId);

/// A successfully acquired key. The lease carries the slot index so outcome
/// reports land on the right slot even after the cursor moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLease {
    pub provider: ProviderId,
    pub slot: usize,
    pub key: String,
}

/// Observability snapshot of one key slot.
#[derive(Debug, Clone)]
pub struct SlotStatus {
    pub cooling_remaining: Option<Duration>,
    pub consecutive_failures: u32,
    pub usage: u64,
}

struct KeySlot {
    key: String,
    cooling_until: Option<Instant>,
    consecutive_failures: u32,
    usage: u64,
}

impl KeySlot {
    fn is_available(&self, now: Instant) -> bool {
        match self.cooling_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

struct ProviderSlots {
    slots: Vec<KeySlot>,
    /// Round-robin cursor: index of the next slot to try.
    cursor: usize,
}

// ---------------------------------------------------------------------------
// KeyPool
// ---------------------------------------------------------------------------

/// Concurrent key pool. Slots are created at startup and live for the whole
/// process; only their cooling/usage state mutates.
pub struct KeyPool {
    inner: Mutex<HashMap<ProviderId, ProviderSlots>>,
    config: KeyPoolConfig,
}

impl KeyPool {
    pub fn new(config: KeyPoolConfig) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Register a provider's keys. Called once at startup per provider;
    /// replaces any previous registration.
    pub fn register(&self, provider: ProviderId, keys: Vec<String>) {
        let slots = keys
            .into_iter()
            .map(|key| KeySlot {
                key,
                cooling_until: None,
                consecutive_failures: 0,
                usage: 0,
            })
            .collect::<Vec<_>>();
        debug!(%provider, count = slots.len(), "Registered API keys");
        self.inner
            .lock()
            .insert(provider, ProviderSlots { slots, cursor: 0 });
    }

    /// Acquire a key for a provider, round-robin over available slots.
    /// Returns [`Exhausted`] when every slot is cooling (or none exist).
    pub fn acquire(&self, provider: ProviderId) -> Result<KeyLease, Exhausted> {
        let now = Instant::now();
        let mut map = self.inner.lock();
        let Some(pool) = map.get_mut(&provider) else {
            return Err(Exhausted(provider));
        };
        if pool.slots.is_empty() {
            return Err(Exhausted(provider));
        }

        let len = pool.slots.len();
        for offset in 0..len {
            let index = (pool.cursor + offset) % len;
            let slot = &mut pool.slots[index];
            if slot.is_available(now) {
                // A slot whose cooldown just elapsed is available again;
                // clear the stale timestamp so snapshots read clean.
                slot.cooling_until = None;
                slot.usage += 1;
                pool.cursor = (index + 1) % len;
                return Ok(KeyLease {
                    provider,
                    slot: index,
                    key: slot.key.clone(),
                });
            }
        }

        debug!(%provider, "Key pool exhausted, all slots cooling");
        Err(Exhausted(provider))
    }

    /// Report a rate-limit failure on a leased key. The slot enters a
    /// cooldown that doubles per consecutive failure, capped.
    pub fn report_rate_limited(&self, lease: &KeyLease) {
        let mut map = self.inner.lock();
        let Some(pool) = map.get_mut(&lease.provider) else {
            return;
        };
        let Some(slot) = pool.slots.get_mut(lease.slot) else {
            return;
        };
        slot.consecutive_failures += 1;
        let cooldown = cooldown_for(
            slot.consecutive_failures,
            self.config.backoff_base,
            self.config.backoff_cap,
        );
        slot.cooling_until = Some(Instant::now() + cooldown);
        warn!(
            provider = %lease.provider,
            slot = lease.slot,
            failures = slot.consecutive_failures,
            cooldown_ms = cooldown.as_millis() as u64,
            "Key rate-limited, cooling down"
        );
    }

    /// Report a successful call on a leased key: the failure streak resets
    /// and the backoff starts over from the base on the next failure.
    pub fn report_success(&self, lease: &KeyLease) {
        let mut map = self.inner.lock();
        if let Some(pool) = map.get_mut(&lease.provider)
            && let Some(slot) = pool.slots.get_mut(lease.slot)
        {
            slot.consecutive_failures = 0;
            slot.cooling_until = None;
        }
    }

    /// Number of currently available (non-cooling) slots for a provider.
    pub fn available_count(&self, provider: ProviderId) -> usize {
        let now = Instant::now();
        let map = self.inner.lock();
        map.get(&provider)
            .map(|pool| pool.slots.iter().filter(|s| s.is_available(now)).count())
            .unwrap_or(0)
    }

    /// Snapshot of a provider's slot states, for diagnostics and tests.
    pub fn slot_snapshot(&self, provider: ProviderId) -> Vec<SlotStatus> {
        let now = Instant::now();
        let map = self.inner.lock();
        map.get(&provider)
            .map(|pool| {
                pool.slots
                    .iter()
                    .map(|s| SlotStatus {
                        cooling_remaining: s
                            .cooling_until
                            .and_then(|until| until.checked_duration_since(now)),
                        consecutive_failures: s.consecutive_failures,
                        usage: s.usage,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Cooldown for the n-th consecutive failure: `base * 2^(n-1)`, capped.
fn cooldown_for(consecutive_failures: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(cap)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
