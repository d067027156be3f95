//! Provider metadata and signing-key caches.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{AuthError, Result};
use crate::http_client::{HttpRequest, OAuthHttpClient, send};

pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Result of parsing `/.well-known/openid-configuration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

struct Cached<T> {
    value: Arc<T>,
    fetched_at: DateTime<Utc>,
}

/// Discovery documents keyed by issuer and key sets keyed by JWKS URI.
///
/// Entries never expire on their own. Failures are not cached, so the next
/// call retries the provider.
#[derive(Clone)]
pub struct DiscoveryCache {
    documents: Arc<DashMap<String, Cached<DiscoveryDocument>>>,
    key_sets: Arc<DashMap<String, Cached<JwkSet>>>,
    clock: Arc<dyn Clock>,
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_issuer(issuer: &str) -> &str {
    issuer.trim_end_matches('/')
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { documents: Arc::new(DashMap::new()), key_sets: Arc::new(DashMap::new()), clock }
    }

    /// Returns the cached document for `issuer_url` or fetches it.
    #[instrument(skip(self, http), level = "debug")]
    pub async fn discover_oidc(
        &self,
        http: &dyn OAuthHttpClient,
        issuer_url: &str,
        timeout: Duration,
    ) -> Result<Arc<DiscoveryDocument>> {
        let issuer = normalize_issuer(issuer_url);
        if let Some(entry) = self.documents.get(issuer) {
            debug!(issuer, "discovery cache hit");
            return Ok(entry.value.clone());
        }
        let fail = |cause: String| {
            warn!(issuer, %cause, "oidc discovery failed");
            AuthError::Discovery { issuer: issuer.to_string(), cause }
        };
        let url = format!("{}{}", issuer, WELL_KNOWN_PATH);
        let response = send(http, HttpRequest::get(&url), timeout).await.map_err(|e| fail(e.to_string()))?;
        if !response.is_success() {
            return Err(fail(format!("{} returned status {}", url, response.status)));
        }
        let document: DiscoveryDocument = response.parse_json().map_err(|e| fail(format!("invalid document: {}", e)))?;
        if normalize_issuer(&document.issuer) != issuer {
            return Err(fail(format!("document issuer '{}' does not match", document.issuer)));
        }
        let document = Arc::new(document);
        self.documents.insert(
            issuer.to_string(),
            Cached { value: document.clone(), fetched_at: self.clock.now() },
        );
        debug!(issuer, "discovery document cached");
        Ok(document)
    }

    /// Returns the cached key set for `jwks_uri` or fetches it.
    #[instrument(skip(self, http), level = "debug")]
    pub async fn fetch_jwks(&self, http: &dyn OAuthHttpClient, jwks_uri: &str, timeout: Duration) -> Result<Arc<JwkSet>> {
        if let Some(entry) = self.key_sets.get(jwks_uri) {
            debug!(jwks_uri, "jwks cache hit");
            return Ok(entry.value.clone());
        }
        let fail = |cause: String| {
            warn!(jwks_uri, %cause, "jwks fetch failed");
            AuthError::Discovery { issuer: jwks_uri.to_string(), cause }
        };
        let response = send(http, HttpRequest::get(jwks_uri), timeout).await.map_err(|e| fail(e.to_string()))?;
        if !response.is_success() {
            return Err(fail(format!("status {}", response.status)));
        }
        let keys: JwkSet = response.parse_json().map_err(|e| fail(format!("invalid key set: {}", e)))?;
        let keys = Arc::new(keys);
        self.key_sets.insert(jwks_uri.to_string(), Cached { value: keys.clone(), fetched_at: self.clock.now() });
        debug!(jwks_uri, count = keys.keys.len(), "jwks cached");
        Ok(keys)
    }

    /// Drops one key set so the next lookup refetches it.
    pub fn invalidate_jwks(&self, jwks_uri: &str) {
        self.key_sets.remove(jwks_uri);
    }

    /// When the document for `issuer_url` was fetched, if cached.
    pub fn fetched_at(&self, issuer_url: &str) -> Option<DateTime<Utc>> {
        self.documents.get(normalize_issuer(issuer_url)).map(|e| e.fetched_at)
    }

    pub fn clear(&self) {
        self.documents.clear();
        self.key_sets.clear();
    }
}

/// Key with the given `kid`, if the set has one.
pub fn find_jwk_by_kid<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    jwks.keys.iter().find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
}

lazy_static::lazy_static! {
    static ref DISCOVERY_CACHE: DiscoveryCache = DiscoveryCache::new();
}

/// Handle to the process-wide cache.
pub fn global_discovery_cache() -> DiscoveryCache {
    DISCOVERY_CACHE.clone()
}

/// Empties the process-wide cache, e.g. after a provider rotates keys.
pub fn clear_discovery_cache() {
    DISCOVERY_CACHE.clear();
}
