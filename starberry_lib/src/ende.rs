//! Signing, hashing and comparison primitives used by the auth crates.
//!
//! Everything here works on raw bytes; callers decide the wire encoding.
//! Comparisons of secrets must go through [`constant_time_eq`].

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Iteration count used by [`hash_password`] when the caller does not pick one.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 310_000;

const PBKDF2_SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Compares two byte strings without short-circuiting on content.
///
/// Lengths are compared first; a mismatch returns `false` without touching
/// the bytes. Only the length can leak through timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Encodes bytes as base64url without padding.
pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes base64url without padding, returning `None` on malformed input.
pub fn base64url_decode(input: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(input).ok()
}

/// SHA-256 of `data`, base64url encoded without padding.
pub fn sha256_base64url(data: &[u8]) -> String {
    base64url_encode(&Sha256::digest(data))
}

/// HMAC-SHA256 tag over `data`.
pub fn hmac_sign(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, new_from_slice cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Verifies an HMAC-SHA256 tag in constant time.
pub fn hmac_verify(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}

/// Derives a subkey from a server secret for one purpose (session cookies,
/// state cookies, CSRF), so the same secret never signs two kinds of payload.
pub fn derive_key(secret: &[u8], purpose: &str) -> Vec<u8> {
    hmac_sign(secret, purpose.as_bytes())
}

/// Raw PBKDF2-HMAC-SHA256.
pub fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

/// Hashes a password with a fresh random salt.
///
/// Output format: `pbkdf2-sha256$<iterations>$<salt>$<hash>` with salt and
/// hash base64url encoded.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let salt = crate::random_bytes(SALT_LEN);
    let hash = pbkdf2_sha256(password.as_bytes(), &salt, iterations);
    format!(
        "{}${}${}${}",
        PBKDF2_SCHEME,
        iterations,
        base64url_encode(&salt),
        base64url_encode(&hash)
    )
}

/// Checks a password against a hash produced by [`hash_password`].
///
/// Malformed hashes verify as `false`.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != PBKDF2_SCHEME {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    let (Some(salt), Some(expected)) = (base64url_decode(salt), base64url_decode(hash)) else {
        return false;
    };
    let actual = pbkdf2_sha256(password.as_bytes(), &salt, iterations);
    constant_time_eq(&actual, &expected)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_time_eq_requires_equal_length() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn hmac_detects_tampering() {
        let tag = hmac_sign(b"secret", b"payload");
        assert_eq!(tag.len(), 32);
        assert!(hmac_verify(b"secret", b"payload", &tag));
        assert!(!hmac_verify(b"secret", b"payloae", &tag));
        assert!(!hmac_verify(b"other", b"payload", &tag));
    }

    #[test]
    fn sha256_matches_rfc7636_vector() {
        // Appendix B of RFC 7636.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(sha256_base64url(verifier.as_bytes()), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn derived_keys_differ_by_purpose() {
        assert_ne!(derive_key(b"s", "session"), derive_key(b"s", "csrf"));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter2", 1_000);
        assert!(hash.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "pbkdf2-sha256$0$AA$AA"));
        assert!(!verify_password("hunter2", "garbage"));
    }
}
