use std::collections::HashMap;
use std::fmt;

/// `SameSite` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Lax => write!(f, "Lax"),
            SameSite::Strict => write!(f, "Strict"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// A `Set-Cookie` header value under construction.
///
/// # Examples
/// ```rust
/// use starberry_auth::cookie::{SameSite, SetCookie};
///
/// let cookie = SetCookie::new("sid", "abc").path("/").http_only(true).same_site(SameSite::Lax);
/// assert_eq!(cookie.to_string(), "sid=abc; Path=/; HttpOnly; SameSite=Lax");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl SetCookie {
    pub fn new<N: Into<String>, V: ToString>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
            path: None,
            max_age: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    /// Cookie attributes every auth cookie carries: `Path=/`, `HttpOnly`,
    /// `SameSite=Lax`, and `Secure` when `secure` is set.
    pub fn auth<N: Into<String>, V: ToString>(name: N, value: V, secure: bool) -> Self {
        Self::new(name, value).path("/").http_only(true).same_site(SameSite::Lax).secure(secure)
    }

    /// A deletion cookie for `name`.
    pub fn expired<N: Into<String>>(name: N, secure: bool) -> Self {
        Self::auth(name, "", secure).max_age(0)
    }

    pub fn path<T: ToString>(mut self, path: T) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn max_age(mut self, secs: i64) -> Self {
        self.max_age = Some(secs.max(0));
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(path) = &self.path {
            write!(f, "; Path={}", path)?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age)?;
        }
        if self.http_only {
            write!(f, "; HttpOnly")?;
        }
        if self.secure {
            write!(f, "; Secure")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={}", same_site)?;
        }
        Ok(())
    }
}

/// Parses a request `Cookie` header into name/value pairs. Later duplicates win.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for cookie in header.split(';') {
        if let Some((name, value)) = cookie.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

/// True when cookies for `url` should carry `Secure`: https and not a loopback host.
pub fn is_secure_context(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("https://") else {
        return false;
    };
    let authority = rest.split(&['/', '?', '#'][..]).next().unwrap_or_default();
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

/// Cookie names used by the auth routes. Secure contexts get the
/// `__Secure-` prefix browsers enforce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieNames {
    pub session: String,
    pub csrf: String,
    pub state: String,
    pub secure: bool,
}

impl CookieNames {
    pub fn new(secure: bool) -> Self {
        if secure {
            Self {
                session: "__Secure-starberry.session-token".into(),
                csrf: "__Secure-starberry.csrf-token".into(),
                state: "__Secure-starberry.state".into(),
                secure,
            }
        } else {
            Self {
                session: "starberry.session-token".into(),
                csrf: "starberry.csrf-token".into(),
                state: "starberry.state".into(),
                secure,
            }
        }
    }

    /// Names for an application served at `base_url`.
    pub fn for_url(base_url: &str) -> Self {
        Self::new(is_secure_context(base_url))
    }
}
