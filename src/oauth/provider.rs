use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::oauth::profile::ProfileShape;

fn default_true() -> bool {
    true
}

fn default_oidc_scopes() -> Vec<String> {
    vec!["openid".into(), "email".into(), "profile".into()]
}

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuth {
    /// `client_id` and `client_secret` in the form body.
    #[default]
    ClientSecretPost,
    /// HTTP Basic with the url-encoded id and secret.
    ClientSecretBasic,
}

/// A plain OAuth2 provider with explicitly configured endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2ProviderConfig {
    pub id: String,
    pub name: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_true")]
    pub pkce: bool,
    #[serde(default)]
    pub token_endpoint_auth: TokenEndpointAuth,
    #[serde(default)]
    pub profile: ProfileShape,
}

/// An OpenID Connect provider; endpoints come from discovery on `issuer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcProviderConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub issuer: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    #[serde(default = "default_oidc_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_true")]
    pub pkce: bool,
    #[serde(default)]
    pub token_endpoint_auth: TokenEndpointAuth,
}

/// Email and password sign-in against the application's user store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsProviderConfig {
    pub id: String,
    pub name: String,
}

/// Provider kinds, tagged by `type` in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderConfig {
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2ProviderConfig),
    #[serde(rename = "oidc")]
    Oidc(OidcProviderConfig),
    #[serde(rename = "credentials")]
    Credentials(CredentialsProviderConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "oidc")]
    Oidc,
    #[serde(rename = "credentials")]
    Credentials,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OAuth2 => write!(f, "oauth2"),
            ProviderKind::Oidc => write!(f, "oidc"),
            ProviderKind::Credentials => write!(f, "credentials"),
        }
    }
}

/// Entry of the `{ providers: [...] }` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
}

impl ProviderConfig {
    pub fn id(&self) -> &str {
        match self {
            ProviderConfig::OAuth2(p) => &p.id,
            ProviderConfig::Oidc(p) => &p.id,
            ProviderConfig::Credentials(p) => &p.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ProviderConfig::OAuth2(p) => &p.name,
            ProviderConfig::Oidc(p) => &p.name,
            ProviderConfig::Credentials(p) => &p.name,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::OAuth2(_) => ProviderKind::OAuth2,
            ProviderConfig::Oidc(_) => ProviderKind::Oidc,
            ProviderConfig::Credentials(_) => ProviderKind::Credentials,
        }
    }

    pub fn info(&self) -> ProviderInfo {
        ProviderInfo { id: self.id().to_string(), name: self.name().to_string(), kind: self.kind() }
    }

    /// Checks the fields each kind needs before any request is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.id().trim().is_empty() {
            return Err(AuthError::Config("provider id must not be empty".into()));
        }
        match self {
            ProviderConfig::OAuth2(p) => {
                if p.authorization_endpoint.is_empty() || p.token_endpoint.is_empty() {
                    return Err(AuthError::Config(format!(
                        "oauth2 provider '{}' needs authorization_endpoint and token_endpoint",
                        p.id
                    )));
                }
                require_client(&p.id, &p.client_id, &p.redirect_uri)
            }
            ProviderConfig::Oidc(p) => {
                if p.issuer.trim().is_empty() {
                    return Err(AuthError::Config(format!("oidc provider '{}' needs an issuer", p.id)));
                }
                require_client(&p.id, &p.client_id, &p.redirect_uri)
            }
            ProviderConfig::Credentials(_) => Ok(()),
        }
    }
}

fn require_client(id: &str, client_id: &str, redirect_uri: &str) -> Result<()> {
    if client_id.is_empty() {
        return Err(AuthError::Config(format!("provider '{}' needs a client_id", id)));
    }
    if redirect_uri.is_empty() {
        return Err(AuthError::Config(format!("provider '{}' needs a redirect_uri", id)));
    }
    Ok(())
}
