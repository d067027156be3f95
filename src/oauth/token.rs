use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use starberry_lib::parse_form;

use crate::error::{AuthError, Result};
use crate::http_client::HttpResponse;

// Ten years; longer lifetimes are clamped.
const MAX_EXPIRES_IN: u64 = 10 * 365 * 24 * 3600;

/// Normalized token endpoint result. A refresh yields a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub token_type: String,
    /// `None` when the provider did not say; such tokens are never considered expired.
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

pub fn calculate_token_expiry(expires_in_secs: u64, now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::seconds(expires_in_secs.min(MAX_EXPIRES_IN) as i64)
}

/// Expired once `now + skew_secs` reaches `expires_at`. A skew that
/// overflows the time range counts as expired.
pub fn is_token_expired(tokens: &TokenSet, now: DateTime<Utc>, skew_secs: i64) -> bool {
    tokens.expires_at.is_some_and(|at| {
        Duration::try_seconds(skew_secs).and_then(|skew| now.checked_add_signed(skew)).is_none_or(|shifted| shifted >= at)
    })
}

/// Maps a token endpoint response onto a [`TokenSet`].
///
/// Accepts JSON or form-encoded bodies, numeric or string `expires_in`, and
/// a missing or lowercase `token_type`. An `error` field fails the call even
/// on a 200.
pub fn normalize_token_response(response: &HttpResponse, now: DateTime<Utc>) -> Result<TokenSet> {
    let fields = match parse_token_body(response) {
        Some(fields) => fields,
        None if !response.is_success() => {
            return Err(AuthError::token_exchange(format!("http_{}", response.status), None));
        }
        None => {
            return Err(AuthError::token_exchange(
                "invalid_token_response",
                Some("token response is neither JSON nor form data".into()),
            ));
        }
    };
    if let Some(code) = string_field(&fields, "error") {
        return Err(AuthError::token_exchange(code, string_field(&fields, "error_description")));
    }
    if !response.is_success() {
        return Err(AuthError::token_exchange(format!("http_{}", response.status), None));
    }
    let access_token = string_field(&fields, "access_token").ok_or_else(|| {
        AuthError::token_exchange("invalid_token_response", Some("access_token missing".into()))
    })?;
    let token_type = match string_field(&fields, "token_type") {
        None => "Bearer".to_string(),
        Some(t) if t.eq_ignore_ascii_case("bearer") => "Bearer".to_string(),
        Some(t) => t,
    };
    let expires_at = expires_in(&fields).map(|secs| calculate_token_expiry(secs, now));
    Ok(TokenSet {
        access_token,
        refresh_token: string_field(&fields, "refresh_token"),
        id_token: string_field(&fields, "id_token"),
        token_type,
        expires_at,
        scope: string_field(&fields, "scope"),
    })
}

fn parse_token_body(response: &HttpResponse) -> Option<Map<String, Value>> {
    let form_encoded = response
        .header("content-type")
        .is_some_and(|ct| ct.contains("application/x-www-form-urlencoded"));
    if !form_encoded {
        if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&response.body) {
            return Some(map);
        }
    }
    let body = std::str::from_utf8(&response.body).ok()?;
    if !body.contains('=') {
        return None;
    }
    Some(parse_form(body).into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

fn expires_in(fields: &Map<String, Value>) -> Option<u64> {
    match fields.get("expires_in")? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn normalizes_json_response() {
        let t = at(1_700_000_000);
        let resp = HttpResponse::json(200, &json!({"access_token": "tok", "expires_in": 3600, "token_type": "Bearer"}));
        let tokens = normalize_token_response(&resp, t).unwrap();
        assert_eq!(tokens.access_token, "tok");
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_at, Some(at(1_700_003_600)));
        assert!(!is_token_expired(&tokens, at(1_700_003_599), 0));
        assert!(is_token_expired(&tokens, at(1_700_003_601), 0));
        assert!(is_token_expired(&tokens, at(1_700_003_590), 10));
    }

    #[test]
    fn out_of_range_skew_counts_as_expired() {
        let resp = HttpResponse::json(200, &json!({"access_token": "tok", "expires_in": 3600}));
        let tokens = normalize_token_response(&resp, at(1_700_000_000)).unwrap();
        for skew in [i64::MAX, i64::MIN, i64::MAX / 1_000, 400_000 * 365 * 86_400] {
            assert!(is_token_expired(&tokens, at(1_700_000_000), skew), "skew {}", skew);
        }
        assert!(!is_token_expired(&tokens, at(1_700_000_000), -86_400));
        let open_ended = TokenSet { expires_at: None, ..tokens };
        assert!(!is_token_expired(&open_ended, at(1_700_000_000), i64::MAX));
    }

    #[test]
    fn normalizes_provider_quirks() {
        let t = at(0);
        let resp = HttpResponse::json(200, &json!({"access_token": "a", "expires_in": "120", "token_type": "bearer"}));
        let tokens = normalize_token_response(&resp, t).unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_at, Some(at(120)));

        let resp = HttpResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "application/x-www-form-urlencoded".into())],
            body: b"access_token=gho_1&scope=repo%2Cuser&token_type=bearer".to_vec(),
        };
        let tokens = normalize_token_response(&resp, t).unwrap();
        assert_eq!(tokens.access_token, "gho_1");
        assert_eq!(tokens.scope.as_deref(), Some("repo,user"));
        assert_eq!(tokens.expires_at, None);
        assert!(!is_token_expired(&tokens, at(i32::MAX as i64), 0));
    }

    #[test]
    fn provider_errors_surface_code() {
        let resp = HttpResponse::json(200, &json!({"error": "bad_verification_code", "error_description": "expired"}));
        match normalize_token_response(&resp, at(0)) {
            Err(AuthError::TokenExchange { code, description }) => {
                assert_eq!(code, "bad_verification_code");
                assert_eq!(description.as_deref(), Some("expired"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let resp = HttpResponse { status: 500, headers: vec![], body: b"<html>".to_vec() };
        assert!(matches!(
            normalize_token_response(&resp, at(0)),
            Err(AuthError::TokenExchange { code, .. }) if code == "http_500"
        ));

        let resp = HttpResponse::json(200, &json!({"token_type": "Bearer"}));
        assert!(matches!(
            normalize_token_response(&resp, at(0)),
            Err(AuthError::TokenExchange { code, .. }) if code == "invalid_token_response"
        ));
    }
}
