//! OAuth2 / OIDC protocol engine.

pub mod client;
pub mod profile;
pub mod provider;
pub mod token;

pub use client::{ClientConfig, OAuthEngine, TokenIntrospection, authorization_url};
pub use profile::{ProfileShape, UserIdentity};
pub use provider::{ProviderConfig, ProviderInfo, ProviderKind};
pub use token::{TokenSet, calculate_token_expiry, is_token_expired, normalize_token_response};
