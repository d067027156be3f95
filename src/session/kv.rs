use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::session::{Session, SessionPolicy, SessionStore};
use crate::storage::{Storage, session_key, user_sessions_key};

/// Sessions persisted in a [`Storage`], with an optional `user -> tokens`
/// index for signing a user out everywhere.
///
/// Index updates are read-modify-write on a single key. Two sign-ins for
/// the same user racing on a store without transactions can drop an index
/// entry; [`sweep_user_index`](Self::sweep_user_index) repairs the other
/// direction (entries for sessions that are gone).
#[derive(Clone)]
pub struct KvSessionStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    index_by_user: bool,
}

impl KvSessionStore {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, policy: SessionPolicy) -> Self {
        Self { storage, clock, policy, index_by_user: true }
    }

    pub fn with_user_index(mut self, enabled: bool) -> Self {
        self.index_by_user = enabled;
        self
    }

    async fn read_index(&self, user_id: &str) -> Result<Vec<String>> {
        let raw = self.storage.get(&user_sessions_key(user_id)).await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()).unwrap_or_default())
    }

    async fn write_index(&self, user_id: &str, tokens: &[String]) -> Result<()> {
        let key = user_sessions_key(user_id);
        if tokens.is_empty() {
            return self.storage.delete(&key).await;
        }
        let json = serde_json::to_string(tokens).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.storage.put(&key, json, None).await
    }

    async fn write_session(&self, session: &Session) -> Result<()> {
        let ttl = (session.expires_at - self.clock.now()).num_seconds().max(0) as u64;
        let json = serde_json::to_string(session).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.storage.put(&session_key(&session.session_token), json, Some(ttl)).await
    }

    async fn unindex(&self, user_id: &str, token: &str) -> Result<()> {
        if !self.index_by_user {
            return Ok(());
        }
        let mut tokens = self.read_index(user_id).await?;
        let before = tokens.len();
        tokens.retain(|t| t != token);
        if tokens.len() != before {
            self.write_index(user_id, &tokens).await?;
        }
        Ok(())
    }

    /// Tokens currently indexed for `user_id`.
    pub async fn user_session_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        self.read_index(user_id).await
    }

    /// Deletes every indexed session of `user_id`, then the index itself.
    /// Deletes are idempotent, so a cancelled call can simply be repeated.
    #[instrument(skip(self), level = "debug")]
    pub async fn invalidate_all_for_user(&self, user_id: &str) -> Result<usize> {
        if !self.index_by_user {
            return Err(AuthError::Unsupported("per-user session index is disabled".into()));
        }
        let tokens = self.read_index(user_id).await?;
        for token in &tokens {
            self.storage.delete(&session_key(token)).await?;
        }
        self.storage.delete(&user_sessions_key(user_id)).await?;
        debug!(count = tokens.len(), "user sessions invalidated");
        Ok(tokens.len())
    }

    /// Drops index entries whose session record no longer exists.
    /// Returns how many were removed.
    #[instrument(skip(self), level = "debug")]
    pub async fn sweep_user_index(&self, user_id: &str) -> Result<usize> {
        let tokens = self.read_index(user_id).await?;
        let mut live = Vec::with_capacity(tokens.len());
        for token in &tokens {
            if self.storage.get(&session_key(token)).await?.is_some() {
                live.push(token.clone());
            }
        }
        let removed = tokens.len() - live.len();
        if removed > 0 {
            self.write_index(user_id, &live).await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    #[instrument(skip(self, data), level = "debug")]
    async fn create_session(&self, user_id: &str, data: Option<Value>) -> Result<Session> {
        let session = self.policy.mint(user_id, data, self.clock.now());
        // Index first: a stale entry is swept later, a missing one would
        // survive sign-out everywhere.
        if self.index_by_user {
            let mut tokens = self.read_index(user_id).await?;
            tokens.push(session.session_token.clone());
            self.write_index(user_id, &tokens).await?;
        }
        self.write_session(&session).await?;
        debug!("session created");
        Ok(session)
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>> {
        if token.is_empty() {
            return Ok(None);
        }
        let Some(raw) = self.storage.get(&session_key(token)).await? else {
            return Ok(None);
        };
        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(_) => {
                warn!("unreadable session record dropped");
                self.storage.delete(&session_key(token)).await?;
                return Ok(None);
            }
        };
        if session.is_expired(self.clock.now()) {
            self.storage.delete(&session_key(token)).await?;
            self.unindex(&session.user_id, token).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn touch_session(&self, session: Session) -> Result<Session> {
        match self.policy.renew(&session, self.clock.now()) {
            Some(renewed) => {
                self.write_session(&renewed).await?;
                Ok(renewed)
            }
            None => Ok(session),
        }
    }

    #[instrument(skip(self, token), level = "debug")]
    async fn invalidate_session(&self, token: &str) -> Result<()> {
        let Some(raw) = self.storage.take(&session_key(token)).await? else {
            return Ok(());
        };
        if let Ok(session) = serde_json::from_str::<Session>(&raw) {
            self.unindex(&session.user_id, token).await?;
        }
        Ok(())
    }

    fn cookie_value(&self, session: &Session) -> Result<String> {
        Ok(session.session_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::InMemoryStorage;
    use chrono::Duration;

    fn store(clock: &FixedClock) -> (KvSessionStore, Arc<InMemoryStorage>) {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()));
        let policy = SessionPolicy { max_age: Duration::seconds(3600), update_age: Duration::seconds(600) };
        (KvSessionStore::new(storage.clone(), clock, policy), storage)
    }

    #[tokio::test]
    async fn lifecycle() {
        let clock = FixedClock::at_unix(1_700_000_000);
        let (sessions, _) = store(&clock);
        let session = sessions.create_session("u1", None).await.unwrap();
        assert_eq!(sessions.get_session(&session.session_token).await.unwrap(), Some(session.clone()));

        clock.advance_secs(300);
        let same = sessions.touch_session(session.clone()).await.unwrap();
        assert_eq!(same, session);

        clock.advance_secs(301);
        let renewed = sessions.touch_session(session.clone()).await.unwrap();
        assert!(renewed.expires_at > session.expires_at);
        assert_eq!(sessions.get_session(&session.session_token).await.unwrap(), Some(renewed.clone()));

        sessions.invalidate_session(&session.session_token).await.unwrap();
        assert!(sessions.get_session(&session.session_token).await.unwrap().is_none());
        assert!(sessions.user_session_tokens("u1").await.unwrap().is_empty());
        sessions.invalidate_session(&session.session_token).await.unwrap();
    }

    #[tokio::test]
    async fn expiry_is_lazy() {
        let clock = FixedClock::at_unix(1_700_000_000);
        let (sessions, _) = store(&clock);
        let session = sessions.create_session("u1", None).await.unwrap();
        clock.advance_secs(3600);
        assert!(sessions.get_session(&session.session_token).await.unwrap().is_some());
        clock.advance_secs(1);
        assert!(sessions.get_session(&session.session_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_drops_dangling_entries() {
        let clock = FixedClock::at_unix(1_700_000_000);
        let (sessions, storage) = store(&clock);
        let a = sessions.create_session("u1", None).await.unwrap();
        let b = sessions.create_session("u1", None).await.unwrap();
        storage.delete(&session_key(&a.session_token)).await.unwrap();

        assert_eq!(sessions.sweep_user_index("u1").await.unwrap(), 1);
        assert_eq!(sessions.user_session_tokens("u1").await.unwrap(), vec![b.session_token]);
    }

    #[tokio::test]
    async fn bulk_invalidation_requires_index() {
        let clock = FixedClock::at_unix(0);
        let (sessions, _) = store(&clock);
        let sessions = sessions.with_user_index(false);
        sessions.create_session("u1", None).await.unwrap();
        assert!(matches!(sessions.invalidate_all_for_user("u1").await, Err(AuthError::Unsupported(_))));
    }
}
