#[cfg(feature = "url_encoding")]
pub mod url_encoding; 

#[cfg(feature = "ende")]
pub mod ende; 

#[cfg(feature = "url_encoding")]
pub use url_encoding::{decode_url_owned, encode_form, encode_url_owned, parse_form}; 

use rand::{Rng, RngCore}; 

/// Fills a buffer of `len` bytes from the thread-local CSPRNG. 
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
} 

/// Generates a random alphanumeric string of the given length. 
pub fn random_alphanumeric_string(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Generates an opaque url-safe token carrying `entropy_bytes` bytes of randomness. 
/// 
/// The token is base64url without padding, so 32 bytes give a 43 character token. 
#[cfg(feature = "ende")]
pub fn random_token(entropy_bytes: usize) -> String {
    ende::base64url_encode(&random_bytes(entropy_bytes))
} 

#[cfg(test)]
mod test {
    use super::*; 

    #[test]
    fn alphanumeric_has_requested_length() {
        let s = random_alphanumeric_string(24);
        assert_eq!(s.len(), 24);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    } 

    #[cfg(feature = "ende")]
    #[test]
    fn random_tokens_are_url_safe_and_distinct() {
        let a = random_token(32);
        let b = random_token(32);
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
