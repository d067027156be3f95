//! Static configuration for the auth subsystem, loaded once at startup.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AuthError, Result};
use crate::oauth::provider::ProviderConfig;
use crate::state::DEFAULT_STATE_TTL_SECS;

pub const SECRET_ENV: &str = "STARBERRY_AUTH_SECRET";
pub const URL_ENV: &str = "STARBERRY_AUTH_URL";

/// Minimum secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

const DAY_SECS: u64 = 24 * 60 * 60;

fn default_base_path() -> String {
    "/api/auth".to_string()
}

fn default_state_ttl() -> u64 {
    DEFAULT_STATE_TTL_SECS
}

fn default_http_timeout() -> u64 {
    10
}

fn default_max_age() -> u64 {
    30 * DAY_SECS
}

fn default_update_age() -> u64 {
    DAY_SECS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStrategy {
    /// Server-side records in the storage collaborator.
    #[default]
    Database,
    /// Stateless signed cookie.
    Cookie,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub strategy: SessionStrategy,
    /// Seconds a session lives after its last renewal.
    #[serde(default = "default_max_age")]
    pub max_age: u64,
    /// Minimum seconds between renewals.
    #[serde(default = "default_update_age")]
    pub update_age: u64,
    /// Keep a `user -> sessions` index for sign-out everywhere.
    #[serde(default = "default_true")]
    pub index_by_user: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strategy: SessionStrategy::default(),
            max_age: default_max_age(),
            update_age: default_update_age(),
            index_by_user: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the conventional cookie name.
    #[serde(default)]
    pub cookie_name: Option<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self { enabled: true, cookie_name: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub inherits: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacConfig {
    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,
    #[serde(default)]
    pub default_role: Option<String>,
    #[serde(default)]
    pub super_admin_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub secret: String,
    /// Public origin of the application, e.g. `https://app.example`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub csrf: CsrfConfig,
    #[serde(default)]
    pub rbac: RbacConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl AuthConfig {
    /// A config with defaults everywhere except the secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            url: None,
            base_path: default_base_path(),
            session: SessionConfig::default(),
            csrf: CsrfConfig::default(),
            rbac: RbacConfig::default(),
            providers: Vec::new(),
            state_ttl_secs: default_state_ttl(),
            http_timeout_secs: default_http_timeout(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AuthError::Config(format!("parse auth config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("read {}: {}", path.display(), e)))?;
        let config = Self::from_json_str(&contents)?;
        info!(path = %path.display(), providers = config.providers.len(), "auth config loaded");
        Ok(config)
    }

    /// Applies `STARBERRY_AUTH_SECRET` and `STARBERRY_AUTH_URL` when set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secret) = lookup(SECRET_ENV).filter(|s| !s.is_empty()) {
            self.secret = secret;
        }
        if let Some(url) = lookup(URL_ENV).filter(|s| !s.is_empty()) {
            self.url = Some(url);
        }
        self
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// Whether cookies should carry `Secure` and the `__Secure-` prefix.
    pub fn secure_cookies(&self) -> bool {
        self.url.as_deref().is_some_and(crate::cookie::is_secure_context)
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Config(format!("secret must be at least {} bytes", MIN_SECRET_LEN)));
        }
        if !self.base_path.starts_with('/') {
            return Err(AuthError::Config("base_path must start with '/'".into()));
        }
        if self.session.max_age == 0 {
            return Err(AuthError::Config("session.max_age must be positive".into()));
        }
        if self.session.update_age > self.session.max_age {
            return Err(AuthError::Config("session.update_age must not exceed session.max_age".into()));
        }
        if self.state_ttl_secs == 0 || self.http_timeout_secs == 0 {
            return Err(AuthError::Config("state_ttl_secs and http_timeout_secs must be positive".into()));
        }
        self.validate_rbac()?;

        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.id()) {
                return Err(AuthError::Config(format!("duplicate provider id '{}'", provider.id())));
            }
        }
        Ok(())
    }

    fn validate_rbac(&self) -> Result<()> {
        let roles = &self.rbac.roles;
        for (name, role) in roles {
            if let Some(parent) = role.inherits.iter().find(|p| !roles.contains_key(*p)) {
                return Err(AuthError::Config(format!("role '{}' inherits unknown role '{}'", name, parent)));
            }
        }
        for (label, role) in [("default_role", &self.rbac.default_role), ("super_admin_role", &self.rbac.super_admin_role)] {
            if let Some(role) = role {
                if !roles.contains_key(role) {
                    return Err(AuthError::Config(format!("{} '{}' is not a declared role", label, role)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn defaults_apply() {
        let config = AuthConfig::from_json_str(&format!(r#"{{"secret": "{}"}}"#, SECRET)).unwrap();
        assert_eq!(config.base_path, "/api/auth");
        assert_eq!(config.session.max_age, 30 * 24 * 3600);
        assert_eq!(config.session.update_age, 24 * 3600);
        assert_eq!(config.session.strategy, SessionStrategy::Database);
        assert!(config.csrf.enabled);
        assert_eq!(config.state_ttl_secs, 600);
        assert!(config.validate().is_ok());
        assert_eq!(config, AuthConfig::new(SECRET));
    }

    #[test]
    fn validation_failures() {
        assert!(AuthConfig::new("short").validate().is_err());

        let mut config = AuthConfig::new(SECRET);
        config.session.update_age = config.session.max_age + 1;
        assert!(config.validate().is_err());

        let config = AuthConfig::from_json_str(&format!(
            r#"{{"secret": "{}", "rbac": {{"roles": {{"editor": {{"inherits": ["viewer"]}}}}}}}}"#,
            SECRET
        ))
        .unwrap();
        assert!(matches!(config.validate(), Err(AuthError::Config(msg)) if msg.contains("viewer")));

        let mut config = AuthConfig::new(SECRET);
        config.rbac.super_admin_role = Some("root".into());
        assert!(config.validate().is_err());

        let config = AuthConfig::from_json_str(&format!(
            r#"{{"secret": "{}", "providers": [
                {{"type": "credentials", "id": "p", "name": "A"}},
                {{"type": "credentials", "id": "p", "name": "B"}}
            ]}}"#,
            SECRET
        ))
        .unwrap();
        assert!(matches!(config.validate(), Err(AuthError::Config(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn overrides_replace_secret_and_url() {
        let config = AuthConfig::new("short").with_overrides_from(|key| match key {
            SECRET_ENV => Some(SECRET.to_string()),
            URL_ENV => Some("https://app.example".to_string()),
            _ => None,
        });
        assert_eq!(config.secret, SECRET);
        assert!(config.secure_cookies());
        assert!(config.validate().is_ok());
    }
}
