use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use starberry_lib::ende::{base64url_decode, base64url_encode, derive_key, hmac_sign, hmac_verify};
use tracing::warn;

use crate::clock::Clock;
use crate::cookie::{CookieNames, SetCookie};
use crate::error::{AuthError, Result};
use crate::session::{Session, SessionPolicy, SessionStore};

const KEY_PURPOSE: &str = "starberry.session-cookie";

/// Browsers drop cookies above roughly this size.
pub const MAX_COOKIE_BYTES: usize = 4096;

/// Signs and opens session cookies: `b64url(json) "." b64url(hmac_sha256)`.
///
/// The key is derived from the server secret, so rotating the secret
/// invalidates every outstanding cookie.
#[derive(Clone)]
pub struct CookieSessionCodec {
    key: Vec<u8>,
    clock: Arc<dyn Clock>,
}

impl CookieSessionCodec {
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        Self { key: derive_key(secret, KEY_PURPOSE), clock }
    }

    pub fn encode(&self, session: &Session) -> Result<String> {
        let json = serde_json::to_vec(session).map_err(|e| AuthError::Storage(e.to_string()))?;
        let payload = base64url_encode(&json);
        let tag = base64url_encode(&hmac_sign(&self.key, payload.as_bytes()));
        let token = format!("{}.{}", payload, tag);
        if token.len() > MAX_COOKIE_BYTES {
            warn!(bytes = token.len(), "session cookie exceeds browser size limit");
        }
        Ok(token)
    }

    /// `None` for malformed, forged or expired tokens. Never panics.
    pub fn decode(&self, token: &str) -> Option<Session> {
        let (payload, tag) = token.split_once('.')?;
        let tag = base64url_decode(tag)?;
        if !hmac_verify(&self.key, payload.as_bytes(), &tag) {
            return None;
        }
        let session: Session = serde_json::from_slice(&base64url_decode(payload)?).ok()?;
        if session.is_expired(self.clock.now()) {
            return None;
        }
        Some(session)
    }
}

/// Stateless sessions carried entirely in the cookie.
///
/// There is no server-side revocation: [`invalidate_session`](SessionStore::invalidate_session)
/// does nothing and signing out only overwrites the browser's cookie. A
/// copied token stays valid until its `expires_at`.
#[derive(Clone)]
pub struct CookieSessionStore {
    codec: CookieSessionCodec,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
}

impl CookieSessionStore {
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>, policy: SessionPolicy) -> Self {
        Self { codec: CookieSessionCodec::new(secret, clock.clone()), clock, policy }
    }

    pub fn codec(&self) -> &CookieSessionCodec {
        &self.codec
    }

    /// The deletion cookie that ends the session in this browser.
    pub fn invalidate(&self, names: &CookieNames) -> SetCookie {
        SetCookie::expired(&names.session, names.secure)
    }
}

#[async_trait]
impl SessionStore for CookieSessionStore {
    async fn create_session(&self, user_id: &str, data: Option<Value>) -> Result<Session> {
        Ok(self.policy.mint(user_id, data, self.clock.now()))
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>> {
        Ok(self.codec.decode(token))
    }

    async fn touch_session(&self, session: Session) -> Result<Session> {
        Ok(self.policy.renew(&session, self.clock.now()).unwrap_or(session))
    }

    async fn invalidate_session(&self, _token: &str) -> Result<()> {
        Ok(())
    }

    fn cookie_value(&self, session: &Session) -> Result<String> {
        self.codec.encode(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[tokio::test]
    async fn round_trip_and_expiry() {
        let clock = FixedClock::at_unix(1_700_000_000);
        let store = CookieSessionStore::new(SECRET, Arc::new(clock.clone()), SessionPolicy::default());
        let session = store.create_session("u1", Some(json!({"theme": "dark"}))).await.unwrap();
        let token = store.cookie_value(&session).unwrap();

        assert_eq!(store.get_session(&token).await.unwrap(), Some(session.clone()));
        clock.advance_secs(30 * 24 * 3600 + 1);
        assert!(store.get_session(&token).await.unwrap().is_none());
    }

    #[test]
    fn malformed_input_is_absent() {
        let codec = CookieSessionCodec::new(SECRET, Arc::new(FixedClock::at_unix(0)));
        for token in ["", ".", "abc", "abc.def", "%%%.%%%", "a.b.c"] {
            assert!(codec.decode(token).is_none(), "{:?}", token);
        }
    }

    #[test]
    fn invalidation_only_expires_cookie() {
        let store = CookieSessionStore::new(SECRET, Arc::new(FixedClock::at_unix(0)), SessionPolicy::default());
        let cookie = store.invalidate(&CookieNames::new(false));
        assert_eq!(cookie.to_string(), "starberry.session-token=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax");
    }
}
