//! Key-value storage seam for OAuth state and server-side sessions.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;

pub const STATE_PREFIX: &str = "state:";
pub const SESSION_PREFIX: &str = "session:";
pub const USER_SESSIONS_PREFIX: &str = "user-sessions:";

pub fn state_key(value: &str) -> String {
    format!("{}{}", STATE_PREFIX, value)
}

pub fn session_key(token: &str) -> String {
    format!("{}{}", SESSION_PREFIX, token)
}

pub fn user_sessions_key(user_id: &str) -> String {
    format!("{}{}", USER_SESSIONS_PREFIX, user_id)
}

/// Single-key atomic KV store. Values are opaque strings (JSON in practice).
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Returns the value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes the value; `ttl_secs` bounds its lifetime when given.
    async fn put(&self, key: &str, value: String, ttl_secs: Option<u64>) -> Result<()>;

    /// Removes the key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Reads and removes the key.
    ///
    /// The default is a plain get followed by delete and is only as atomic as
    /// the two calls; stores with a compare-and-delete primitive should
    /// override it.
    async fn take(&self, key: &str) -> Result<Option<String>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<i64>,
}

impl Entry {
    // Alive through the expiry second itself.
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| now <= at)
    }
}

/// Process-local [`Storage`] backed by a `DashMap`.
#[derive(Clone)]
pub struct InMemoryStorage {
    entries: Arc<DashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStorage {
    /// Creates an empty store using the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store that evaluates TTLs against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Arc::new(DashMap::new()), clock }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.unix();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.unix();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.unix();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.value().is_live(now))
            .map(|entry| entry.value().value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl_secs: Option<u64>) -> Result<()> {
        let expires_at = ttl_secs.map(|ttl| self.clock.unix() + ttl as i64);
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.unix();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(_, entry)| entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[tokio::test]
    async fn ttl_is_inclusive_of_expiry_second() {
        let clock = FixedClock::at_unix(1_000);
        let store = InMemoryStorage::with_clock(Arc::new(clock.clone()));
        store.put("k", "v".into(), Some(10)).await.unwrap();
        clock.advance_secs(10);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        clock.advance_secs(1);
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn take_removes_value() {
        let store = InMemoryStorage::new();
        store.put("k", "v".into(), None).await.unwrap();
        assert_eq!(store.take("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.take("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
