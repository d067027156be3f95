use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::Value;
use starberry_lib::ende::constant_time_eq;
use tracing::warn;

use crate::error::{AuthError, Result};
use crate::oidc::discovery::find_jwk_by_kid;

/// Tolerated clock difference for `exp` and `iat`, in seconds.
pub const DEFAULT_LEEWAY_SECS: i64 = 60;

/// What a valid ID token must assert.
#[derive(Debug, Clone, Copy)]
pub struct IdTokenExpectations<'a> {
    pub issuer: &'a str,
    /// The client id.
    pub audience: &'a str,
    /// Nonce stored with the OAuth state, when one was sent.
    pub nonce: Option<&'a str>,
    /// Unix seconds.
    pub now: i64,
    pub leeway_secs: i64,
}

fn reject(reason: impl Into<String>) -> AuthError {
    let reason = reason.into();
    warn!(%reason, "id token rejected");
    AuthError::ClaimsVerification(reason)
}

/// Verifies the signature against the key named by `kid` and checks `iss`,
/// `aud`, `exp`, `azp` and `nonce`. Returns the claims.
///
/// A missing `kid` is accepted only when the set holds exactly one key. A
/// key that publishes `alg` only verifies tokens signed with that algorithm.
pub fn decode_id_token_claims(id_token: &str, jwks: &JwkSet, expected: &IdTokenExpectations<'_>) -> Result<Value> {
    let header = decode_header(id_token).map_err(|e| reject(format!("malformed header: {}", e)))?;
    let jwk = match header.kid.as_deref() {
        Some(kid) => find_jwk_by_kid(jwks, kid),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
    .ok_or_else(|| reject("no signing key matches the token"))?;
    if !key_supports(jwk, header.alg) {
        return Err(reject(format!("key type does not allow {:?}", header.alg)));
    }
    if let Some(published) = &jwk.common.key_algorithm {
        if published_algorithm(published) != Some(header.alg) {
            return Err(reject(format!("token alg {:?} does not match key alg {:?}", header.alg, published)));
        }
    }
    let key = DecodingKey::from_jwk(jwk).map_err(|e| reject(format!("unusable key: {}", e)))?;

    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[expected.issuer]);
    validation.set_audience(&[expected.audience]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    // Expiry is checked below against the injected clock.
    validation.validate_exp = false;

    let claims = decode::<Value>(id_token, &key, &validation)
        .map_err(|e| reject(format!("{}", e)))?
        .claims;

    let exp = numeric_claim(&claims, "exp").ok_or_else(|| reject("exp is not numeric"))?;
    if expected.now > exp + expected.leeway_secs {
        return Err(reject("token expired"));
    }
    if let Some(iat) = numeric_claim(&claims, "iat") {
        if iat > expected.now + expected.leeway_secs {
            return Err(reject("token issued in the future"));
        }
    }
    if let Some(audiences) = claims.get("aud").and_then(Value::as_array) {
        if audiences.len() > 1 && claims.get("azp").and_then(Value::as_str) != Some(expected.audience) {
            return Err(reject("azp does not name this client"));
        }
    }
    if let Some(nonce) = expected.nonce {
        let presented = claims.get("nonce").and_then(Value::as_str).unwrap_or_default();
        if !constant_time_eq(presented.as_bytes(), nonce.as_bytes()) {
            return Err(reject("nonce mismatch"));
        }
    }
    Ok(claims)
}

fn key_supports(jwk: &Jwk, alg: Algorithm) -> bool {
    use Algorithm::*;
    match &jwk.algorithm {
        AlgorithmParameters::OctetKey(_) => matches!(alg, HS256 | HS384 | HS512),
        AlgorithmParameters::RSA(_) => matches!(alg, RS256 | RS384 | RS512 | PS256 | PS384 | PS512),
        AlgorithmParameters::EllipticCurve(_) => matches!(alg, ES256 | ES384),
        AlgorithmParameters::OctetKeyPair(_) => matches!(alg, EdDSA),
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

/// The signing algorithm a JWK `alg` names; `None` for encryption algorithms.
fn published_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn numeric_claim(claims: &Value, name: &str) -> Option<i64> {
    let value = claims.get(name)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}
