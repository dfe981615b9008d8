//! The aggregate-store seam.
//!
//! The sampling path keeps per-day statistics in an external key-value
//! store. The backend itself is a collaborator, not part of this crate:
//! the pipeline only needs the six hash/TTL primitives below, and assumes
//! the backend makes each one atomic. [`MemoryStore`] is a process-local
//! implementation used by tests and by deployments that run without a
//! shared store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Narrow counter/TTL interface over a day-bucketed hash-key namespace.
pub trait AggregateStore: Send + Sync {
    /// Whether `field` exists in the hash at `key`.
    fn hash_field_exists(&self, key: &str, field: &str) -> Result<bool>;

    /// Set `field` in the hash at `key`, creating the hash if needed.
    fn hash_field_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Atomically add `delta` to an integer field, returning the new value.
    /// A missing field counts as zero.
    fn hash_field_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Atomically add `delta` to a float field, returning the new value.
    fn hash_field_incr_by_float(&self, key: &str, field: &str, delta: f64) -> Result<f64>;

    /// Remaining time-to-live of `key`, or `None` when no expiry is set.
    fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Set an expiry on `key` only if none is set already. Returns whether
    /// the expiry was applied by this call. Never shortens or extends an
    /// existing expiry.
    fn expire_if_unset(&self, key: &str, ttl: Duration) -> Result<bool>;
}

#[derive(Default)]
struct MemoryStoreInner {
    hashes: HashMap<String, HashMap<String, String>>,
    deadlines: HashMap<String, Instant>,
}

/// In-process [`AggregateStore`] with deadline-based expiry.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryStoreInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

fn purge_expired(inner: &mut MemoryStoreInner) {
    let now = Instant::now();
    let expired: Vec<String> = inner
        .deadlines
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(key, _)| key.clone())
        .collect();
    for key in expired {
        inner.deadlines.remove(&key);
        inner.hashes.remove(&key);
    }
}

impl AggregateStore for MemoryStore {
    fn hash_field_exists(&self, key: &str, field: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        purge_expired(&mut inner);
        Ok(inner
            .hashes
            .get(key)
            .map(|hash| hash.contains_key(field))
            .unwrap_or(false))
    }

    fn hash_field_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        purge_expired(&mut inner);
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hash_field_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut inner = self.lock()?;
        purge_expired(&mut inner);
        let slot = inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());
        let current: i64 = slot
            .parse()
            .with_context(|| format!("field '{field}' does not hold an integer"))?;
        let next = current + delta;
        *slot = next.to_string();
        Ok(next)
    }

    fn hash_field_incr_by_float(&self, key: &str, field: &str, delta: f64) -> Result<f64> {
        let mut inner = self.lock()?;
        purge_expired(&mut inner);
        let slot = inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());
        let current: f64 = slot
            .parse()
            .with_context(|| format!("field '{field}' does not hold a number"))?;
        let next = current + delta;
        *slot = next.to_string();
        Ok(next)
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut inner = self.lock()?;
        purge_expired(&mut inner);
        Ok(inner
            .deadlines
            .get(key)
            .map(|deadline| deadline.saturating_duration_since(Instant::now())))
    }

    fn expire_if_unset(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.lock()?;
        purge_expired(&mut inner);
        if !inner.hashes.contains_key(key) || inner.deadlines.contains_key(key) {
            return Ok(false);
        }
        inner.deadlines.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }
}
