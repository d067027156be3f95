//! Anti-CSRF OAuth state: storage-backed single-use records and an
//! HMAC-signed cookie variant for deployments without a shared store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use starberry_lib::ende::{base64url_decode, base64url_encode, constant_time_eq, derive_key, hmac_sign, hmac_verify};
use starberry_lib::random_token;
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::cookie::{CookieNames, SetCookie};
use crate::error::{AuthError, Result};
use crate::storage::{Storage, state_key};

/// Default lifetime of a pending authorization, in seconds.
pub const DEFAULT_STATE_TTL_SECS: u64 = 600;

const STATE_ENTROPY: usize = 32;
const COOKIE_KEY_PURPOSE: &str = "starberry.oauth-state";

/// A pending authorization, created when sign-in starts and consumed once on callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub value: String,
    pub provider_id: String,
    pub callback_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
}

impl OAuthState {
    fn is_live(&self, now: i64, ttl_secs: u64) -> bool {
        now - self.created_at <= ttl_secs as i64
    }
}

#[derive(Serialize, Deserialize)]
struct StoredState {
    state: OAuthState,
    ttl_secs: u64,
}

/// Creates, persists and consumes [`OAuthState`] records.
#[derive(Clone)]
pub struct StateManager {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
    cookie_key: Vec<u8>,
}

impl StateManager {
    /// `secret` keys the cookie-carried variant; storage-backed states do not use it.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, secret: &[u8]) -> Self {
        Self {
            storage,
            clock,
            ttl_secs: DEFAULT_STATE_TTL_SECS,
            cookie_key: derive_key(secret, COOKIE_KEY_PURPOSE),
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Mints a state with a fresh random value. Nothing is persisted yet.
    pub fn create_oauth_state(
        &self,
        provider_id: &str,
        callback_url: &str,
        code_verifier: Option<String>,
        nonce: Option<String>,
    ) -> OAuthState {
        OAuthState {
            value: random_token(STATE_ENTROPY),
            provider_id: provider_id.to_string(),
            callback_url: callback_url.to_string(),
            code_verifier,
            nonce,
            created_at: self.clock.unix(),
        }
    }

    #[instrument(skip(self, state), fields(provider = %state.provider_id), level = "debug")]
    pub async fn store_state(&self, state: &OAuthState, ttl_secs: u64) -> Result<()> {
        let record = StoredState { state: state.clone(), ttl_secs };
        let json = serde_json::to_string(&record).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.storage.put(&state_key(&state.value), json, Some(ttl_secs)).await
    }

    /// Reads and deletes the state. Missing, reused, expired and corrupt
    /// records all fail with [`AuthError::StateInvalid`].
    #[instrument(skip(self, value), level = "debug")]
    pub async fn consume_state(&self, value: &str) -> Result<OAuthState> {
        if value.is_empty() {
            warn!("empty oauth state presented");
            return Err(AuthError::StateInvalid);
        }
        let Some(raw) = self.storage.take(&state_key(value)).await? else {
            warn!("oauth state not found");
            return Err(AuthError::StateInvalid);
        };
        let record: StoredState = serde_json::from_str(&raw).map_err(|_| {
            warn!("stored oauth state is unreadable");
            AuthError::StateInvalid
        })?;
        if !record.state.is_live(self.clock.unix(), record.ttl_secs)
            || !constant_time_eq(record.state.value.as_bytes(), value.as_bytes())
        {
            warn!("oauth state rejected");
            return Err(AuthError::StateInvalid);
        }
        debug!(provider = %record.state.provider_id, "oauth state consumed");
        Ok(record.state)
    }

    /// Serializes and signs `state` for a cookie: `b64(json).b64(hmac)`.
    pub fn create_state_cookie(&self, state: &OAuthState) -> Result<String> {
        let json = serde_json::to_vec(state).map_err(|e| AuthError::Storage(e.to_string()))?;
        let payload = base64url_encode(&json);
        let tag = hmac_sign(&self.cookie_key, payload.as_bytes());
        Ok(format!("{}.{}", payload, base64url_encode(&tag)))
    }

    /// Verifies a signed state cookie against the `state` query parameter.
    pub fn verify_state_cookie(&self, cookie: &str, presented: &str) -> Result<OAuthState> {
        let state = self.open_state_cookie(cookie).ok_or_else(|| {
            warn!("state cookie failed verification");
            AuthError::StateInvalid
        })?;
        if presented.is_empty()
            || !constant_time_eq(state.value.as_bytes(), presented.as_bytes())
            || !state.is_live(self.clock.unix(), self.ttl_secs)
        {
            warn!("state cookie rejected");
            return Err(AuthError::StateInvalid);
        }
        Ok(state)
    }

    fn open_state_cookie(&self, cookie: &str) -> Option<OAuthState> {
        let (payload, tag) = cookie.split_once('.')?;
        let tag = base64url_decode(tag)?;
        if !hmac_verify(&self.cookie_key, payload.as_bytes(), &tag) {
            return None;
        }
        serde_json::from_slice(&base64url_decode(payload)?).ok()
    }

    /// `Set-Cookie` carrying the signed state for the configured lifetime.
    pub fn state_set_cookie(&self, names: &CookieNames, state: &OAuthState) -> Result<SetCookie> {
        Ok(SetCookie::auth(&names.state, self.create_state_cookie(state)?, names.secure).max_age(self.ttl_secs as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::InMemoryStorage;

    fn manager(clock: &FixedClock, secret: &[u8]) -> StateManager {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()));
        StateManager::new(storage, clock, secret)
    }

    #[tokio::test]
    async fn state_consumed_once() {
        let clock = FixedClock::at_unix(1_700_000_000);
        let states = manager(&clock, b"0123456789abcdef0123456789abcdef");
        let state = states.create_oauth_state("google", "/dashboard", Some("v".into()), Some("n".into()));
        states.store_state(&state, 600).await.unwrap();

        assert_eq!(states.consume_state(&state.value).await.unwrap(), state);
        assert!(matches!(states.consume_state(&state.value).await, Err(AuthError::StateInvalid)));
        assert!(matches!(states.consume_state("").await, Err(AuthError::StateInvalid)));
    }

    #[tokio::test]
    async fn ttl_boundary_is_inclusive() {
        let clock = FixedClock::at_unix(1_700_000_000);
        let states = manager(&clock, b"0123456789abcdef0123456789abcdef");

        let first = states.create_oauth_state("google", "/", None, None);
        states.store_state(&first, 600).await.unwrap();
        let second = states.create_oauth_state("google", "/", None, None);
        states.store_state(&second, 600).await.unwrap();

        clock.advance_secs(600);
        assert!(states.consume_state(&first.value).await.is_ok());
        clock.advance_secs(1);
        assert!(matches!(states.consume_state(&second.value).await, Err(AuthError::StateInvalid)));
    }

    #[test]
    fn signed_state_cookie() {
        let clock = FixedClock::at_unix(1_700_000_000);
        let states = manager(&clock, b"0123456789abcdef0123456789abcdef");
        let state = states.create_oauth_state("github", "/home", Some("verifier".into()), None);
        let cookie = states.create_state_cookie(&state).unwrap();

        assert_eq!(states.verify_state_cookie(&cookie, &state.value).unwrap(), state);
        assert!(states.verify_state_cookie(&cookie, "other").is_err());

        let other = manager(&clock, b"another-secret-another-secret-xx");
        assert!(other.verify_state_cookie(&cookie, &state.value).is_err());

        let mut tampered = cookie.clone().into_bytes();
        tampered[3] ^= 0x01;
        let tampered = String::from_utf8_lossy(&tampered).into_owned();
        assert!(states.verify_state_cookie(&tampered, &state.value).is_err());

        clock.advance_secs(601);
        assert!(states.verify_state_cookie(&cookie, &state.value).is_err());
    }
}
