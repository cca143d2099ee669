use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::error::UsageError;

/// Atomic counter key/value store with per-key expiry.
pub trait CounterStore: Send + Sync {
    fn increment(&self, key: &str) -> Result<i64, UsageError>;
    fn increment_by_float(&self, key: &str, amount: f64) -> Result<f64, UsageError>;
    fn get(&self, key: &str) -> Result<Option<String>, UsageError>;
    /// Returns false when the key does not exist.
    fn expire(&self, key: &str, seconds: u64) -> Result<bool, UsageError>;
}

#[derive(Debug, Clone)]
struct CounterEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// Process-local counter store. Each key is updated under its shard lock, so
/// concurrent increments never lose updates.
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    entries: Arc<DashMap<String, CounterEntry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired keys. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, "purged expired usage counters");
        }
        purged
    }

    fn update<T, F>(&self, key: &str, apply: F) -> Result<T, UsageError>
    where
        F: FnOnce(&str) -> Result<(T, String), UsageError>,
    {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                value: "0".to_string(),
                expires_at: None,
            });

        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }

        let (result, value) = apply(&entry.value)?;
        entry.value = value;
        Ok(result)
    }
}

impl CounterStore for InMemoryCounterStore {
    fn increment(&self, key: &str) -> Result<i64, UsageError> {
        self.update(key, |current| {
            let parsed: i64 = current.parse().map_err(|_| UsageError::NotANumber {
                key: key.to_string(),
                value: current.to_string(),
            })?;
            let next = parsed.saturating_add(1);
            Ok((next, next.to_string()))
        })
    }

    fn increment_by_float(&self, key: &str, amount: f64) -> Result<f64, UsageError> {
        if !amount.is_finite() {
            return Err(UsageError::InvalidMetric(format!(
                "increment for {key} is not finite"
            )));
        }
        self.update(key, |current| {
            let parsed: f64 = current.parse().map_err(|_| UsageError::NotANumber {
                key: key.to_string(),
                value: current.to_string(),
            })?;
            let next = parsed + amount;
            Ok((next, next.to_string()))
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, UsageError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    fn expire(&self, key: &str, seconds: u64) -> Result<bool, UsageError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + Duration::from_secs(seconds));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn missing_key_reads_none() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.get("usage:api_calls:nobody:2024-01").unwrap(), None);
        assert!(!store.expire("usage:api_calls:nobody:2024-01", 60).unwrap());
    }

    #[test]
    fn increments_integers_and_floats() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.increment("runs").unwrap(), 1);
        assert_eq!(store.increment("runs").unwrap(), 2);
        assert_eq!(store.get("runs").unwrap().as_deref(), Some("2"));

        assert_eq!(store.increment_by_float("credits", 1.5).unwrap(), 1.5);
        assert_eq!(store.increment_by_float("credits", 2.25).unwrap(), 3.75);
        assert_eq!(store.get("credits").unwrap().as_deref(), Some("3.75"));
    }

    #[test]
    fn integer_increment_rejects_float_value() {
        let store = InMemoryCounterStore::new();
        store.increment_by_float("mixed", 0.5).unwrap();
        assert!(matches!(
            store.increment("mixed"),
            Err(UsageError::NotANumber { .. })
        ));
    }

    #[test]
    fn expired_keys_restart_from_zero() {
        let store = InMemoryCounterStore::new();
        store.increment("short").unwrap();
        assert!(store.expire("short", 0).unwrap());
        assert_eq!(store.get("short").unwrap(), None);
        assert_eq!(store.increment("short").unwrap(), 1);

        store.increment("gone").unwrap();
        store.expire("gone", 0).unwrap();
        assert_eq!(store.purge_expired(), 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = InMemoryCounterStore::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        store.increment("hot").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("hot").unwrap().as_deref(), Some("2000"));
    }
}
