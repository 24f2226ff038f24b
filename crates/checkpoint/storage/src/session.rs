//! Ephemeral key-value store backing gate sessions.
//!
//! Values are integers with a time-to-live. The store is the only mutable
//! state shared between engine instances, so implementations must make each
//! individual operation atomic. Sequences of operations are not.

use crate::{SessionResult, SessionStoreError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Shared expiring counter store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current value of `key`, `None` if missing or expired.
    async fn get(&self, key: &str) -> SessionResult<Option<i64>>;

    /// Overwrite `key` with `value`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> SessionResult<()>;

    /// Decrement a live key by one, keeping its remaining expiry.
    ///
    /// Returns the new value, or `None` when the key is missing or expired.
    /// A missing key is never created.
    async fn decrement(&self, key: &str) -> SessionResult<Option<i64>>;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: i64,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local session store.
///
/// Expiry follows `tokio::time`, so tests running with a paused clock can
/// advance past the TTL deterministically. Suitable for single-instance
/// deployments and tests; several engine instances need a shared backend.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    slots: DashMap<String, Slot>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &str) -> SessionResult<Option<i64>> {
        let now = Instant::now();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value))
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> SessionResult<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| SessionStoreError::Unavailable(format!("ttl {ttl:?} overflows")))?;
        self.slots
            .insert(key.to_string(), Slot { value, expires_at });
        Ok(())
    }

    async fn decrement(&self, key: &str) -> SessionResult<Option<i64>> {
        let now = Instant::now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_live(now) {
                    occupied.remove();
                    return Ok(None);
                }
                let slot = occupied.get_mut();
                slot.value -= 1;
                Ok(Some(slot.value))
            }
            Entry::Vacant(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let store = InMemorySessionStore::new();
        store
            .set_with_ttl("active_gate:1", 9, Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(store.get("active_gate:1").await.unwrap(), Some(9));

        tokio::time::advance(Duration::from_secs(14)).await;
        assert_eq!(store.get("active_gate:1").await.unwrap(), Some(9));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("active_gate:1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn decrement_keeps_expiry_and_never_resurrects() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.decrement("active_gate_count:1").await.unwrap(), None);
        assert_eq!(store.get("active_gate_count:1").await.unwrap(), None);

        store
            .set_with_ttl("active_gate_count:1", 2, Duration::from_secs(15))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.decrement("active_gate_count:1").await.unwrap(), Some(1));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.decrement("active_gate_count:1").await.unwrap(), None);
        assert_eq!(store.get("active_gate_count:1").await.unwrap(), None);
    }
}
