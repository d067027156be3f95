//! Proof Key for Code Exchange (RFC 7636), S256 only.

use starberry_lib::ende::{constant_time_eq, sha256_base64url};
use starberry_lib::random_token;

/// Bytes of entropy behind a verifier; 32 bytes encode to 43 characters.
const VERIFIER_ENTROPY: usize = 32;

/// A verifier and its S256 challenge, minted once per authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub const METHOD: &'static str = "S256";
}

/// Generates a fresh verifier (256 bits, base64url) and its challenge.
pub fn generate_pkce() -> PkcePair {
    let verifier = random_token(VERIFIER_ENTROPY);
    let challenge = code_challenge(&verifier);
    PkcePair { verifier, challenge }
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn code_challenge(verifier: &str) -> String {
    sha256_base64url(verifier.as_bytes())
}

/// A verifier is 43 to 128 characters from the unreserved set.
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Recomputes the challenge and compares it in constant time.
pub fn verify_code_challenge(verifier: &str, challenge: &str) -> bool {
    if !is_valid_verifier(verifier) {
        return false;
    }
    constant_time_eq(code_challenge(verifier).as_bytes(), challenge.as_bytes())
}
