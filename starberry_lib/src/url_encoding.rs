use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
pub use percent_encoding::percent_decode;

/// Custom encode set for application/x-www-form-urlencoded allowing unreserved characters including hyphens
const FORM_URLENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encodes a string for URL safety and returns an owned `String`
///
/// # Example
/// ```
/// use starberry_lib::url_encoding::encode_url_owned;
/// let encoded = encode_url_owned("https://app.example/callback");
/// assert_eq!(encoded, "https%3A%2F%2Fapp.example%2Fcallback");
/// ```
pub fn encode_url_owned(input: &str) -> String {
    percent_encode(input.as_bytes(), FORM_URLENCODE_SET).to_string()
}

/// Decodes a URL-encoded string and returns an owned `String`.
///
/// `+` is treated as an encoded space, as in form bodies. Invalid UTF-8 is
/// replaced rather than rejected.
pub fn decode_url_owned(input: &str) -> String {
    let spaced = input.replace('+', " ");
    percent_decode(spaced.as_bytes())
        .decode_utf8_lossy()
        .into_owned()
}

/// Serializes key/value pairs as an `application/x-www-form-urlencoded` body
/// or query string.
///
/// # Example
/// ```
/// use starberry_lib::url_encoding::encode_form;
/// let q = encode_form(&[("state", "s1"), ("scope", "openid email")]);
/// assert_eq!(q, "state=s1&scope=openid%20email");
/// ```
pub fn encode_form<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_url_owned(k.as_ref()), encode_url_owned(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parses an `application/x-www-form-urlencoded` body or query string.
///
/// Pairs without `=` are kept with an empty value; empty segments are skipped.
pub fn parse_form(input: &str) -> Vec<(String, String)> {
    input
        .trim_start_matches('?')
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((k, v)) => (decode_url_owned(k), decode_url_owned(v)),
            None => (decode_url_owned(segment), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn form_round_trip_keeps_reserved_characters() {
        let body = encode_form(&[("redirect_uri", "https://a.example/cb?x=1&y=2"), ("code", "a b")]);
        let parsed = parse_form(&body);
        assert_eq!(parsed[0], ("redirect_uri".to_string(), "https://a.example/cb?x=1&y=2".to_string()));
        assert_eq!(parsed[1], ("code".to_string(), "a b".to_string()));
    }

    #[test]
    fn parse_form_handles_plus_and_bare_keys() {
        let parsed = parse_form("?a=hello+world&flag&&b=%7E");
        assert_eq!(parsed, vec![
            ("a".to_string(), "hello world".to_string()),
            ("flag".to_string(), String::new()),
            ("b".to_string(), "~".to_string()),
        ]);
    }
}
