//! Session lifecycle over two backends: server-side records in a
//! [`Storage`](crate::storage::Storage) and stateless signed cookies.

pub mod cookie;
pub mod kv;

pub use cookie::{CookieSessionCodec, CookieSessionStore};
pub use kv::KvSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use starberry_lib::random_token;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::oauth::profile::UserIdentity;

const TOKEN_ENTROPY: usize = 32;
const USER_FIELD: &str = "user";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Session {
    /// Expired strictly after `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// The identity stored under `data.user` at sign-in, if any.
    pub fn user(&self) -> Option<UserIdentity> {
        let user = self.data.as_ref()?.get(USER_FIELD)?;
        serde_json::from_value(user.clone()).ok()
    }
}

/// Session data carrying `user` for the session JSON response.
pub fn session_data_for(user: &UserIdentity) -> Value {
    json!({ USER_FIELD: user })
}

/// Lifetimes shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_age: Duration,
    pub update_age: Duration,
}

impl SessionPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_age: Duration::seconds(config.max_age as i64),
            update_age: Duration::seconds(config.update_age as i64),
        }
    }

    pub(crate) fn mint(&self, user_id: &str, data: Option<Value>, now: DateTime<Utc>) -> Session {
        Session {
            session_token: random_token(TOKEN_ENTROPY),
            user_id: user_id.to_string(),
            expires_at: now + self.max_age,
            created_at: now,
            updated_at: now,
            data,
        }
    }

    /// Renews only once `update_age` has passed since the last renewal.
    /// Returns `None` when no write is needed.
    pub(crate) fn renew(&self, session: &Session, now: DateTime<Utc>) -> Option<Session> {
        if now - session.updated_at <= self.update_age {
            return None;
        }
        Some(Session { expires_at: now + self.max_age, updated_at: now, ..session.clone() })
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Operations both backends provide.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn create_session(&self, user_id: &str, data: Option<Value>) -> Result<Session>;

    /// `None` when absent, expired or tampered with.
    async fn get_session(&self, token: &str) -> Result<Option<Session>>;

    /// Extends the session if the renewal window has passed.
    async fn touch_session(&self, session: Session) -> Result<Session>;

    async fn invalidate_session(&self, token: &str) -> Result<()>;

    /// The value the session cookie carries.
    fn cookie_value(&self, session: &Session) -> Result<String>;
}

/// `{ user: {id,email,name?,image?} | null, expires: ISO8601 | null }`
///
/// A session whose data carries no readable user answers like no session.
pub fn session_response(session: Option<&Session>) -> Value {
    match session.and_then(|s| s.user().map(|user| (s, user))) {
        Some((session, user)) => json!({
            "user": user,
            "expires": session.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }),
        None => json!({ "user": null, "expires": null }),
    }
}
