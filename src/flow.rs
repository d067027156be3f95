//! Sign-in orchestration for the auth routes.
//!
//! The route layer maps a [`RouteOutcome`] onto its own response type; no
//! control flow here relies on panics or early exits through errors for
//! redirects.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use starberry_lib::random_token;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::config::{AuthConfig, SessionStrategy};
use crate::cookie::{CookieNames, SetCookie};
use crate::credentials::{CredentialsAuthorizer, UserStore};
use crate::csrf::{CsrfGuard, CsrfSubmission, csrf_response};
use crate::error::{AuthError, Result};
use crate::http_client::OAuthHttpClient;
use crate::oauth::client::{OAuthEngine, authorization_url};
use crate::oauth::profile::UserIdentity;
use crate::oauth::provider::ProviderConfig;
use crate::oauth::token::TokenSet;
use crate::oidc::discovery::DiscoveryCache;
use crate::pkce::generate_pkce;
use crate::session::{
    CookieSessionStore, KvSessionStore, Session, SessionPolicy, SessionStore, session_data_for, session_response,
};
use crate::state::StateManager;
use crate::storage::Storage;

const NONCE_ENTROPY: usize = 32;

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

/// What a route should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome<T> {
    Ok(T),
    Redirect { location: String, status: u16 },
    NotFound(String),
}

impl<T> RouteOutcome<T> {
    /// A `302 Found` redirect.
    pub fn redirect(location: impl Into<String>) -> Self {
        RouteOutcome::Redirect { location: location.into(), status: 302 }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RouteOutcome<U> {
        match self {
            RouteOutcome::Ok(value) => RouteOutcome::Ok(f(value)),
            RouteOutcome::Redirect { location, status } => RouteOutcome::Redirect { location, status },
            RouteOutcome::NotFound(message) => RouteOutcome::NotFound(message),
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, RouteOutcome::Redirect { .. })
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            RouteOutcome::Redirect { location, .. } => Some(location),
            _ => None,
        }
    }
}

/// A completed sign-in.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub session: Session,
    pub user: UserIdentity,
    /// Provider tokens; `None` for credentials sign-in.
    pub tokens: Option<TokenSet>,
    pub session_cookie: SetCookie,
    pub redirect_to: String,
}

impl SignedIn {
    /// Redirect to where sign-in started.
    pub fn redirect(&self) -> RouteOutcome<()> {
        RouteOutcome::redirect(&self.redirect_to)
    }
}

/// Body plus an optional cookie update for the session endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReply {
    pub body: Value,
    pub cookie: Option<SetCookie>,
}

#[derive(Clone)]
pub struct SignInFlow {
    providers: Vec<ProviderConfig>,
    engine: OAuthEngine,
    states: StateManager,
    sessions: Arc<dyn SessionStore>,
    kv_sessions: Option<KvSessionStore>,
    credentials: Option<CredentialsAuthorizer>,
    cookie_names: CookieNames,
    csrf: CsrfGuard,
    session_max_age: i64,
    app_url: Option<String>,
}

impl SignInFlow {
    /// Validates `config` and wires the collaborators. The session backend
    /// follows `session.strategy`.
    pub fn new(
        config: &AuthConfig,
        storage: Arc<dyn Storage>,
        http: Arc<dyn OAuthHttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = SessionPolicy::from_config(&config.session);
        let (sessions, kv_sessions): (Arc<dyn SessionStore>, Option<KvSessionStore>) = match config.session.strategy {
            SessionStrategy::Database => {
                let kv = KvSessionStore::new(storage.clone(), clock.clone(), policy)
                    .with_user_index(config.session.index_by_user);
                let store: Arc<dyn SessionStore> = Arc::new(kv.clone());
                (store, Some(kv))
            }
            SessionStrategy::Cookie => {
                let store: Arc<dyn SessionStore> =
                    Arc::new(CookieSessionStore::new(config.secret.as_bytes(), clock.clone(), policy));
                (store, None)
            }
        };
        let engine = OAuthEngine::new(http, clock.clone()).with_timeout(Duration::from_secs(config.http_timeout_secs));
        let states = StateManager::new(storage, clock, config.secret.as_bytes()).with_ttl(config.state_ttl_secs);
        info!(
            providers = config.providers.len(),
            strategy = ?config.session.strategy,
            "sign-in flow ready"
        );
        Ok(Self {
            providers: config.providers.clone(),
            engine,
            states,
            sessions,
            kv_sessions,
            credentials: None,
            cookie_names: CookieNames::new(config.secure_cookies()),
            csrf: CsrfGuard::from_config(config),
            session_max_age: config.session.max_age as i64,
            app_url: config.url.clone(),
        })
    }

    /// Enables credentials providers.
    pub fn with_user_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.credentials = Some(CredentialsAuthorizer::new(store));
        self
    }

    pub fn with_credentials_authorizer(mut self, authorizer: CredentialsAuthorizer) -> Self {
        self.credentials = Some(authorizer);
        self
    }

    /// Replaces the process-wide discovery cache.
    pub fn with_discovery_cache(mut self, cache: DiscoveryCache) -> Self {
        self.engine = self.engine.with_discovery_cache(cache);
        self
    }

    pub fn engine(&self) -> &OAuthEngine {
        &self.engine
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    /// CSRF endpoint: `{ csrfToken }` and the cookie that pins the token.
    pub fn issue_csrf(&self, request_url: &str) -> (Value, SetCookie) {
        let issued = self.csrf.issue_token(request_url);
        (csrf_response(&issued.token), issued.cookie)
    }

    pub fn cookie_names(&self) -> &CookieNames {
        &self.cookie_names
    }

    fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id() == id)
    }

    fn not_found<T>(provider_id: &str) -> RouteOutcome<T> {
        RouteOutcome::NotFound(format!("provider '{}' is not configured", provider_id))
    }

    /// `{ providers: [{id, name, type}] }`
    pub fn providers_response(&self) -> Value {
        json!({ "providers": self.providers.iter().map(ProviderConfig::info).collect::<Vec<_>>() })
    }

    /// Relative paths and same-origin URLs pass; anything else becomes `/`.
    /// Browsers strip tabs and newlines from URLs, so any control or
    /// whitespace character rejects the URL outright.
    pub fn safe_callback_url(&self, url: &str) -> String {
        if url.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return "/".to_string();
        }
        let relative = url.starts_with('/') && !url.starts_with("//") && !url.contains('\\');
        let same_origin = self.app_url.as_deref().is_some_and(|origin| {
            let origin = origin.trim_end_matches('/');
            url == origin || url.strip_prefix(origin).is_some_and(|rest| rest.starts_with(&['/', '?', '#'][..]))
        });
        if relative || same_origin { url.to_string() } else { "/".to_string() }
    }

    /// Starts an authorization: persists state and redirects to the provider.
    #[instrument(skip(self, callback_url), level = "debug")]
    pub async fn begin(&self, provider_id: &str, callback_url: &str) -> Result<RouteOutcome<()>> {
        let Some(provider) = self.provider(provider_id) else {
            return Ok(Self::not_found(provider_id));
        };
        let client = self.engine.resolve(provider).await?;
        let pkce = client.pkce.then(generate_pkce);
        let nonce = client.uses_nonce().then(|| random_token(NONCE_ENTROPY));
        let state = self.states.create_oauth_state(
            provider_id,
            &self.safe_callback_url(callback_url),
            pkce.as_ref().map(|p| p.verifier.clone()),
            nonce.clone(),
        );
        self.states.store_state(&state, self.states.ttl_secs()).await?;
        let url = authorization_url(
            &client,
            &state.value,
            pkce.as_ref().map(|p| p.challenge.as_str()),
            nonce.as_deref(),
        );
        Ok(RouteOutcome::redirect(url))
    }

    /// Handles the provider redirect: consumes state, redeems the code,
    /// establishes the identity and creates a session.
    #[instrument(skip(self, params), level = "debug")]
    pub async fn callback(&self, provider_id: &str, params: &[(String, String)]) -> Result<RouteOutcome<SignedIn>> {
        let Some(provider) = self.provider(provider_id) else {
            return Ok(Self::not_found(provider_id));
        };
        let state = self.states.consume_state(param(params, "state").unwrap_or_default()).await?;
        if state.provider_id != provider_id {
            warn!(expected = %state.provider_id, "state issued for another provider");
            return Err(AuthError::StateInvalid);
        }
        if let Some(error) = param(params, "error") {
            return Err(AuthError::token_exchange(error, param(params, "error_description").map(str::to_string)));
        }
        let code = param(params, "code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::token_exchange("invalid_request", Some("authorization code missing".into())))?;

        let client = self.engine.resolve(provider).await?;
        let tokens = self.engine.exchange_code_for_tokens(&client, code, state.code_verifier.as_deref()).await?;
        let user = self.engine.user_identity(&client, &tokens, state.nonce.as_deref()).await?;
        let signed_in = self.establish(user, Some(tokens), state.callback_url).await?;
        Ok(RouteOutcome::Ok(signed_in))
    }

    /// Credentials sign-in. Requires a user store and a valid CSRF
    /// submission; the password is not checked when the CSRF check fails.
    #[instrument(skip(self, email, password, callback_url, csrf), level = "debug")]
    pub async fn sign_in_credentials(
        &self,
        provider_id: &str,
        email: &str,
        password: &str,
        callback_url: &str,
        csrf: CsrfSubmission<'_>,
    ) -> Result<RouteOutcome<SignedIn>> {
        let Some(ProviderConfig::Credentials(_)) = self.provider(provider_id) else {
            return Ok(Self::not_found(provider_id));
        };
        self.csrf.check_submission(csrf)?;
        let authorizer = self
            .credentials
            .as_ref()
            .ok_or_else(|| AuthError::Config("credentials provider configured without a user store".into()))?;
        let user = authorizer.authorize(email, password).await?;
        let signed_in = self.establish(user, None, self.safe_callback_url(callback_url)).await?;
        Ok(RouteOutcome::Ok(signed_in))
    }

    async fn establish(&self, user: UserIdentity, tokens: Option<TokenSet>, redirect_to: String) -> Result<SignedIn> {
        let session = self.sessions.create_session(&user.id, Some(session_data_for(&user))).await?;
        let session_cookie = self.session_cookie(&session)?;
        info!(user = %user.id, "signed in");
        Ok(SignedIn { session, user, tokens, session_cookie, redirect_to })
    }

    fn session_cookie(&self, session: &Session) -> Result<SetCookie> {
        let value = self.sessions.cookie_value(session)?;
        Ok(SetCookie::auth(&self.cookie_names.session, value, self.cookie_names.secure).max_age(self.session_max_age))
    }

    /// Session endpoint: renews the session when due and reissues its cookie.
    pub async fn session(&self, token: Option<&str>) -> Result<SessionReply> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(SessionReply { body: session_response(None), cookie: None });
        };
        let Some(session) = self.sessions.get_session(token).await? else {
            return Ok(SessionReply {
                body: session_response(None),
                cookie: Some(SetCookie::expired(&self.cookie_names.session, self.cookie_names.secure)),
            });
        };
        let touched = self.sessions.touch_session(session.clone()).await?;
        let cookie = if touched.updated_at != session.updated_at { Some(self.session_cookie(&touched)?) } else { None };
        Ok(SessionReply { body: session_response(Some(&touched)), cookie })
    }

    /// Ends the session and returns the cookie that clears it. A failed
    /// CSRF check leaves the session untouched.
    #[instrument(skip(self, token, csrf), level = "debug")]
    pub async fn sign_out(&self, token: &str, csrf: CsrfSubmission<'_>) -> Result<SetCookie> {
        self.csrf.check_submission(csrf)?;
        self.sessions.invalidate_session(token).await?;
        Ok(SetCookie::expired(&self.cookie_names.session, self.cookie_names.secure))
    }

    /// Ends every session of `user_id`. Database strategy with the user index only.
    pub async fn sign_out_everywhere(&self, user_id: &str) -> Result<usize> {
        match &self.kv_sessions {
            Some(kv) => kv.invalidate_all_for_user(user_id).await,
            None => Err(AuthError::Unsupported("server-side revocation of cookie sessions".into())),
        }
    }
}
