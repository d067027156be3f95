//! Double-submit CSRF protection for the state-changing auth routes.

use serde_json::{Value, json};
use starberry_lib::ende::constant_time_eq;
use starberry_lib::{parse_form, random_token};
use tracing::warn;

use crate::config::AuthConfig;
use crate::cookie::{CookieNames, SetCookie, is_secure_context};
use crate::error::{AuthError, Result};

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FIELD: &str = "csrfToken";

const TOKEN_ENTROPY: usize = 32;

/// A fresh token and the cookie that pins it to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCsrf {
    pub token: String,
    pub cookie: SetCookie,
}

/// What a state-changing request carried: the token from its header or
/// body and the value of its CSRF cookie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsrfSubmission<'a> {
    pub presented: Option<&'a str>,
    pub cookie: Option<&'a str>,
}

impl<'a> CsrfSubmission<'a> {
    pub fn new(presented: Option<&'a str>, cookie: Option<&'a str>) -> Self {
        Self { presented, cookie }
    }
}

#[derive(Debug, Clone)]
pub struct CsrfGuard {
    enabled: bool,
    cookie_name: Option<String>,
    path: String,
}

impl CsrfGuard {
    pub fn new(path: impl Into<String>) -> Self {
        Self { enabled: true, cookie_name: None, path: path.into() }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self { enabled: config.csrf.enabled, cookie_name: config.csrf.cookie_name.clone(), path: config.base_path.clone() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cookie name for a request to `request_url`.
    pub fn cookie_name(&self, request_url: &str) -> String {
        match &self.cookie_name {
            Some(name) => name.clone(),
            None => CookieNames::for_url(request_url).csrf,
        }
    }

    /// Mints a token; the cookie is `HttpOnly`, `SameSite=Lax`, scoped to the
    /// auth path, and `Secure` on https hosts other than localhost.
    pub fn issue_token(&self, request_url: &str) -> IssuedCsrf {
        let token = random_token(TOKEN_ENTROPY);
        let cookie = SetCookie::auth(self.cookie_name(request_url), &token, is_secure_context(request_url))
            .path(&self.path);
        IssuedCsrf { token, cookie }
    }

    /// Rejects with [`AuthError::Csrf`] unless the presented token matches
    /// the cookie. Always passes when protection is disabled.
    pub fn check(&self, presented: Option<&str>, cookie: Option<&str>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        match (presented, cookie) {
            (Some(presented), Some(cookie)) if verify(presented, cookie) => Ok(()),
            _ => {
                warn!(presented = presented.is_some(), cookie = cookie.is_some(), "csrf check failed");
                Err(AuthError::Csrf)
            }
        }
    }

    pub fn check_submission(&self, submission: CsrfSubmission<'_>) -> Result<()> {
        self.check(submission.presented, submission.cookie)
    }
}

/// Equal non-empty tokens, compared in constant time once lengths match.
pub fn verify(request_token: &str, cookie_token: &str) -> bool {
    if request_token.is_empty() || request_token.len() != cookie_token.len() {
        return false;
    }
    constant_time_eq(request_token.as_bytes(), cookie_token.as_bytes())
}

/// First token found in the header, then the JSON body, then the form body.
pub fn extract_token(header: Option<&str>, json_body: Option<&Value>, form_body: Option<&str>) -> Option<String> {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    header
        .and_then(non_empty)
        .or_else(|| json_body.and_then(|b| b.get(CSRF_FIELD)).and_then(Value::as_str).and_then(non_empty))
        .or_else(|| {
            form_body.and_then(|body| {
                parse_form(body).into_iter().find(|(k, _)| k == CSRF_FIELD).and_then(|(_, v)| non_empty(&v))
            })
        })
}

/// `{ csrfToken: string }`
pub fn csrf_response(token: &str) -> Value {
    json!({ CSRF_FIELD: token })
}
