//! OpenID Connect discovery, JWKS caching and ID token verification.

pub mod discovery;
pub mod id_token;

pub use discovery::{
    DiscoveryCache, DiscoveryDocument, clear_discovery_cache, find_jwk_by_kid, global_discovery_cache,
};
pub use id_token::{IdTokenExpectations, decode_id_token_claims};
