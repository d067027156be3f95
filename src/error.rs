//! Error taxonomy for the auth subsystem and its JSON/status mapping.

use serde_json::{Value, json};
use tracing::warn;

/// Every failure the auth core can surface to the route layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Static configuration is unusable. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// OAuth state is missing, expired, reused or forged. The user must restart sign-in.
    #[error("oauth state is invalid or expired")]
    StateInvalid,
    /// The provider rejected a code or refresh token.
    #[error("token endpoint rejected the request: {code}")]
    TokenExchange {
        /// Provider error code (`invalid_grant`, ...) or a synthetic one.
        code: String,
        /// Provider supplied `error_description`, when present.
        description: Option<String>,
    },
    /// Fetching or parsing provider metadata or keys failed. Retryable by the caller.
    #[error("discovery failed for {issuer}: {cause}")]
    Discovery { issuer: String, cause: String },
    /// ID token signature, issuer, audience, expiry or nonce did not verify.
    #[error("id token verification failed: {0}")]
    ClaimsVerification(String),
    /// Session is absent, expired or tampered with.
    #[error("session is invalid")]
    SessionInvalid,
    /// CSRF token missing or mismatched.
    #[error("csrf token missing or mismatched")]
    Csrf,
    /// Unknown user or wrong password; deliberately indistinguishable.
    #[error("credentials rejected")]
    CredentialsRejected,
    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// The HTTP collaborator failed before a response was received.
    #[error("http error: {0}")]
    Http(String),
    /// An outbound call exceeded its deadline.
    #[error("outbound request timed out")]
    Timeout,
    /// The provider does not offer the requested endpoint.
    #[error("operation not supported by provider: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// Shorthand used by the protocol engine for synthetic token errors.
    pub fn token_exchange(code: impl Into<String>, description: Option<String>) -> Self {
        AuthError::TokenExchange { code: code.into(), description }
    }

    /// Stable machine-readable code for the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Config(_) => "configuration",
            AuthError::StateInvalid => "invalid_state",
            AuthError::TokenExchange { .. } => "oauth_token_error",
            AuthError::Discovery { .. } => "oidc_discovery_error",
            AuthError::ClaimsVerification(_) => "invalid_id_token",
            AuthError::SessionInvalid => "session_invalid",
            AuthError::Csrf => "csrf_mismatch",
            AuthError::CredentialsRejected => "credentials_signin",
            AuthError::Storage(_) => "server_error",
            AuthError::Http(_) => "http_error",
            AuthError::Timeout => "timeout",
            AuthError::Unsupported(_) => "unsupported_operation",
        }
    }

    /// HTTP status the route layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            AuthError::Config(_) | AuthError::Storage(_) => 500,
            AuthError::StateInvalid | AuthError::TokenExchange { .. } => 400,
            AuthError::Discovery { .. } | AuthError::Http(_) => 502,
            AuthError::Timeout => 504,
            AuthError::ClaimsVerification(_) | AuthError::SessionInvalid | AuthError::CredentialsRejected => 401,
            AuthError::Csrf => 403,
            AuthError::Unsupported(_) => 501,
        }
    }

    /// Whether retrying the same call can succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Discovery { .. } | AuthError::Http(_) | AuthError::Timeout | AuthError::Storage(_))
    }

    /// Public description. Security-boundary failures get a fixed text so the
    /// body never reveals which check failed.
    pub fn public_description(&self) -> String {
        match self {
            AuthError::Config(_) | AuthError::Storage(_) => "Internal server error".to_string(),
            AuthError::StateInvalid => "Sign-in session expired, please try again".to_string(),
            AuthError::TokenExchange { description, code } => {
                description.clone().unwrap_or_else(|| code.clone())
            }
            AuthError::Discovery { .. } | AuthError::Http(_) => "Identity provider unavailable".to_string(),
            AuthError::ClaimsVerification(_) => "Identity could not be verified".to_string(),
            AuthError::SessionInvalid => "Not authenticated".to_string(),
            AuthError::Csrf => "CSRF token mismatch".to_string(),
            AuthError::CredentialsRejected => "Invalid credentials".to_string(),
            AuthError::Timeout => "Identity provider timed out".to_string(),
            AuthError::Unsupported(what) => format!("{} is not supported by this provider", what),
        }
    }

    /// Structured JSON error body: `{ "error": code, "error_description": text }`.
    pub fn to_json(&self) -> Value {
        let code = self.code();
        let status = self.status();
        warn!(error = %self, error_code = code, http_status = status, "auth error occurred");
        match self {
            AuthError::TokenExchange { code: provider_code, .. } => json!({
                "error": code,
                "provider_error": provider_code,
                "error_description": self.public_description(),
            }),
            _ => json!({ "error": code, "error_description": self.public_description() }),
        }
    }
}
