use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::decode_header;
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use starberry_lib::{encode_form, encode_url_owned};
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::http_client::{HttpRequest, HttpResponse, OAuthHttpClient, send};
use crate::oauth::profile::{ProfileShape, UserIdentity};
use crate::oauth::provider::{OAuth2ProviderConfig, OidcProviderConfig, ProviderConfig, ProviderKind, TokenEndpointAuth};
use crate::oauth::token::{TokenSet, normalize_token_response};
use crate::oidc::discovery::{DiscoveryCache, DiscoveryDocument, find_jwk_by_kid, global_discovery_cache};
use crate::oidc::id_token::{DEFAULT_LEEWAY_SECS, IdTokenExpectations, decode_id_token_claims};
use crate::pkce::PkcePair;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider with every endpoint resolved; OIDC endpoints come from discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub provider_id: String,
    pub kind: ProviderKind,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub introspection_endpoint: Option<String>,
    pub revocation_endpoint: Option<String>,
    pub issuer: Option<String>,
    pub jwks_uri: Option<String>,
    pub pkce: bool,
    pub token_endpoint_auth: TokenEndpointAuth,
    pub profile: ProfileShape,
}

impl ClientConfig {
    pub fn from_oauth2(provider: &OAuth2ProviderConfig) -> Self {
        Self {
            provider_id: provider.id.clone(),
            kind: ProviderKind::OAuth2,
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.clone(),
            redirect_uri: provider.redirect_uri.clone(),
            scopes: provider.scopes.clone(),
            authorization_endpoint: provider.authorization_endpoint.clone(),
            token_endpoint: provider.token_endpoint.clone(),
            userinfo_endpoint: provider.userinfo_endpoint.clone(),
            introspection_endpoint: provider.introspection_endpoint.clone(),
            revocation_endpoint: provider.revocation_endpoint.clone(),
            issuer: None,
            jwks_uri: None,
            pkce: provider.pkce,
            token_endpoint_auth: provider.token_endpoint_auth,
            profile: provider.profile,
        }
    }

    pub fn from_discovery(provider: &OidcProviderConfig, document: &DiscoveryDocument) -> Self {
        Self {
            provider_id: provider.id.clone(),
            kind: ProviderKind::Oidc,
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.clone(),
            redirect_uri: provider.redirect_uri.clone(),
            scopes: provider.scopes.clone(),
            authorization_endpoint: document.authorization_endpoint.clone(),
            token_endpoint: document.token_endpoint.clone(),
            userinfo_endpoint: document.userinfo_endpoint.clone(),
            introspection_endpoint: document.introspection_endpoint.clone(),
            revocation_endpoint: document.revocation_endpoint.clone(),
            issuer: Some(document.issuer.clone()),
            jwks_uri: Some(document.jwks_uri.clone()),
            pkce: provider.pkce,
            token_endpoint_auth: provider.token_endpoint_auth,
            profile: ProfileShape::Oidc,
        }
    }

    /// OIDC providers bind the ID token to the sign-in attempt with a nonce.
    pub fn uses_nonce(&self) -> bool {
        self.kind == ProviderKind::Oidc
    }
}

/// Authorization endpoint URL with the code-flow query parameters.
///
/// # Examples
/// ```rust
/// use starberry_auth::oauth::{ClientConfig, authorization_url};
/// use starberry_auth::oauth::provider::{OAuth2ProviderConfig, TokenEndpointAuth};
/// use starberry_auth::oauth::profile::ProfileShape;
///
/// let provider = OAuth2ProviderConfig {
///     id: "acme".into(),
///     name: "Acme".into(),
///     client_id: "abc".into(),
///     client_secret: None,
///     authorization_endpoint: "https://idp.example/authorize".into(),
///     token_endpoint: "https://idp.example/token".into(),
///     userinfo_endpoint: None,
///     introspection_endpoint: None,
///     revocation_endpoint: None,
///     redirect_uri: "https://app.example/callback".into(),
///     scopes: vec!["read".into()],
///     pkce: false,
///     token_endpoint_auth: TokenEndpointAuth::ClientSecretPost,
///     profile: ProfileShape::Oidc,
/// };
/// let url = authorization_url(&ClientConfig::from_oauth2(&provider), "s1", None, None);
/// assert_eq!(
///     url,
///     "https://idp.example/authorize?response_type=code&client_id=abc&redirect_uri=https%3A%2F%2Fapp.example%2Fcallback&scope=read&state=s1"
/// );
/// ```
pub fn authorization_url(config: &ClientConfig, state: &str, code_challenge: Option<&str>, nonce: Option<&str>) -> String {
    let mut params = vec![
        ("response_type", "code".to_string()),
        ("client_id", config.client_id.clone()),
        ("redirect_uri", config.redirect_uri.clone()),
        ("scope", config.scopes.join(" ")),
        ("state", state.to_string()),
    ];
    if let Some(challenge) = code_challenge {
        params.push(("code_challenge", challenge.to_string()));
        params.push(("code_challenge_method", PkcePair::METHOD.to_string()));
    }
    if let Some(nonce) = nonce {
        params.push(("nonce", nonce.to_string()));
    }
    let separator = if config.authorization_endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}{}", config.authorization_endpoint, separator, encode_form(&params))
}

/// RFC 7662 introspection result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenIntrospection {
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Talks to provider endpoints through the injected HTTP client.
#[derive(Clone)]
pub struct OAuthEngine {
    http: Arc<dyn OAuthHttpClient>,
    clock: Arc<dyn Clock>,
    discovery: DiscoveryCache,
    timeout: Duration,
    leeway_secs: i64,
}

impl OAuthEngine {
    /// Uses the process-wide discovery cache.
    pub fn new(http: Arc<dyn OAuthHttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            clock,
            discovery: global_discovery_cache(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }

    pub fn with_discovery_cache(mut self, cache: DiscoveryCache) -> Self {
        self.discovery = cache;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_leeway(mut self, leeway_secs: i64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    pub fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Resolves endpoints, running discovery for OIDC providers.
    pub async fn resolve(&self, provider: &ProviderConfig) -> Result<ClientConfig> {
        match provider {
            ProviderConfig::OAuth2(p) => Ok(ClientConfig::from_oauth2(p)),
            ProviderConfig::Oidc(p) => {
                let document = self.discovery.discover_oidc(self.http.as_ref(), &p.issuer, self.timeout).await?;
                Ok(ClientConfig::from_discovery(p, &document))
            }
            ProviderConfig::Credentials(p) => {
                Err(AuthError::Unsupported(format!("authorization redirect for credentials provider '{}'", p.id)))
            }
        }
    }

    async fn call(&self, request: HttpRequest) -> Result<HttpResponse> {
        send(self.http.as_ref(), request, self.timeout).await
    }

    fn token_request(&self, config: &ClientConfig, url: &str, mut form: Vec<(&'static str, String)>) -> HttpRequest {
        let basic = match (config.token_endpoint_auth, &config.client_secret) {
            (TokenEndpointAuth::ClientSecretBasic, Some(secret)) => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", encode_url_owned(&config.client_id), encode_url_owned(secret)))
            )),
            _ => None,
        };
        if basic.is_none() {
            form.push(("client_id", config.client_id.clone()));
            if let Some(secret) = &config.client_secret {
                form.push(("client_secret", secret.clone()));
            }
        }
        let request = HttpRequest::post_form(url, encode_form(&form));
        match basic {
            Some(value) => request.header("Authorization", value),
            None => request,
        }
    }

    /// Redeems an authorization code at the token endpoint.
    #[instrument(skip(self, config, code, code_verifier), fields(provider = %config.provider_id), level = "debug")]
    pub async fn exchange_code_for_tokens(
        &self,
        config: &ClientConfig,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", config.redirect_uri.clone()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier.to_string()));
        }
        let request = self.token_request(config, &config.token_endpoint, form);
        let response = self.call(request).await?;
        let tokens = normalize_token_response(&response, self.clock.now()).inspect_err(|e| {
            warn!(provider = %config.provider_id, error = %e, "code exchange rejected");
        })?;
        debug!(provider = %config.provider_id, has_refresh = tokens.refresh_token.is_some(), "code exchanged");
        Ok(tokens)
    }

    /// Keeps the presented refresh token when the provider does not rotate it.
    #[instrument(skip(self, config, refresh_token), fields(provider = %config.provider_id), level = "debug")]
    pub async fn refresh_access_token(&self, config: &ClientConfig, refresh_token: &str) -> Result<TokenSet> {
        let form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        let request = self.token_request(config, &config.token_endpoint, form);
        let response = self.call(request).await?;
        let mut tokens = normalize_token_response(&response, self.clock.now())?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    #[instrument(skip(self, config, token), fields(provider = %config.provider_id), level = "debug")]
    pub async fn introspect_token(&self, config: &ClientConfig, token: &str) -> Result<TokenIntrospection> {
        let endpoint = config
            .introspection_endpoint
            .as_deref()
            .ok_or_else(|| AuthError::Unsupported("token introspection".into()))?;
        let request = self.token_request(config, endpoint, vec![("token", token.to_string())]);
        let response = self.call(request).await?;
        provider_error(&response)?;
        response
            .parse_json()
            .map_err(|_| AuthError::token_exchange("invalid_introspection_response", None))
    }

    /// RFC 7009 revocation. Providers without the endpoint yield `Unsupported`.
    #[instrument(skip(self, config, token), fields(provider = %config.provider_id), level = "debug")]
    pub async fn revoke_token(&self, config: &ClientConfig, token: &str, token_type_hint: Option<&str>) -> Result<()> {
        let endpoint = config
            .revocation_endpoint
            .as_deref()
            .ok_or_else(|| AuthError::Unsupported("token revocation".into()))?;
        let mut form = vec![("token", token.to_string())];
        if let Some(hint) = token_type_hint {
            form.push(("token_type_hint", hint.to_string()));
        }
        let request = self.token_request(config, endpoint, form);
        let response = self.call(request).await?;
        provider_error(&response)
    }

    #[instrument(skip(self, config, access_token), fields(provider = %config.provider_id), level = "debug")]
    pub async fn fetch_userinfo(&self, config: &ClientConfig, access_token: &str) -> Result<Value> {
        let endpoint = config
            .userinfo_endpoint
            .as_deref()
            .ok_or_else(|| AuthError::Unsupported("userinfo".into()))?;
        let request = HttpRequest::get(endpoint).header("Authorization", format!("Bearer {}", access_token));
        let response = self.call(request).await?;
        if !response.is_success() {
            return Err(AuthError::Http(format!("userinfo endpoint returned status {}", response.status)));
        }
        response.parse_json().map_err(|e| AuthError::Http(format!("userinfo response: {}", e)))
    }

    /// Verifies an ID token against the provider's keys, refetching the key
    /// set once when the token names a `kid` the cached set lacks.
    #[instrument(skip(self, config, id_token, nonce), fields(provider = %config.provider_id), level = "debug")]
    pub async fn verify_id_token(&self, config: &ClientConfig, id_token: &str, nonce: Option<&str>) -> Result<Value> {
        let (Some(issuer), Some(jwks_uri)) = (config.issuer.as_deref(), config.jwks_uri.as_deref()) else {
            return Err(AuthError::Unsupported("id token verification".into()));
        };
        let mut keys = self.discovery.fetch_jwks(self.http.as_ref(), jwks_uri, self.timeout).await?;
        if names_unknown_kid(&keys, id_token) {
            debug!(jwks_uri, "kid not in cached key set, refetching");
            self.discovery.invalidate_jwks(jwks_uri);
            keys = self.discovery.fetch_jwks(self.http.as_ref(), jwks_uri, self.timeout).await?;
        }
        let expected = IdTokenExpectations {
            issuer,
            audience: &config.client_id,
            nonce,
            now: self.clock.unix(),
            leeway_secs: self.leeway_secs,
        };
        decode_id_token_claims(id_token, &keys, &expected)
    }

    /// The signed-in user's identity: verified ID token claims for OIDC,
    /// completed from userinfo when they lack an email; the userinfo profile
    /// for plain OAuth2.
    pub async fn user_identity(&self, config: &ClientConfig, tokens: &TokenSet, nonce: Option<&str>) -> Result<UserIdentity> {
        if config.kind == ProviderKind::Oidc {
            let id_token = tokens
                .id_token
                .as_deref()
                .ok_or_else(|| AuthError::ClaimsVerification("token response has no id_token".into()))?;
            let mut claims = self.verify_id_token(config, id_token, nonce).await?;
            if claims.get("email").and_then(Value::as_str).is_none() && config.userinfo_endpoint.is_some() {
                let info = self.fetch_userinfo(config, &tokens.access_token).await?;
                if info.get("sub") != claims.get("sub") {
                    return Err(AuthError::ClaimsVerification("userinfo subject differs from id token".into()));
                }
                if let (Value::Object(claims), Value::Object(info)) = (&mut claims, info) {
                    for (k, v) in info {
                        claims.entry(k).or_insert(v);
                    }
                }
            }
            return config.profile.normalize(&claims);
        }
        let profile = self.fetch_userinfo(config, &tokens.access_token).await?;
        config.profile.normalize(&profile)
    }
}

fn names_unknown_kid(keys: &JwkSet, id_token: &str) -> bool {
    decode_header(id_token)
        .ok()
        .and_then(|header| header.kid)
        .is_some_and(|kid| find_jwk_by_kid(keys, &kid).is_none())
}

/// Maps an `error` body or a non-2xx status onto `TokenExchange`.
fn provider_error(response: &HttpResponse) -> Result<()> {
    let body: Option<Value> = response.parse_json().ok();
    let code = body.as_ref().and_then(|b| b.get("error")).and_then(Value::as_str);
    match code {
        Some(code) => Err(AuthError::token_exchange(
            code,
            body.as_ref()
                .and_then(|b| b.get("error_description"))
                .and_then(Value::as_str)
                .map(str::to_string),
        )),
        None if !response.is_success() => Err(AuthError::token_exchange(format!("http_{}", response.status), None)),
        None => Ok(()),
    }
}
