use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{AuthError, Result};

/// HTTP methods the protocol engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    GET,
    POST,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::GET => write!(f, "GET"),
            HttpMethod::POST => write!(f, "POST"),
        }
    }
}

/// HTTP request for executing a call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method (GET, POST).
    pub method: HttpMethod,
    /// Target URL.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// Optional timeout duration. Falls back to the caller's default when unset.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        HttpRequest {
            method: HttpMethod::GET,
            url: url.into(),
            headers: vec![("Accept".into(), "application/json".into())],
            body: None,
            timeout: None,
        }
    }

    /// POST with an `application/x-www-form-urlencoded` body.
    pub fn post_form(url: impl Into<String>, form: String) -> Self {
        HttpRequest {
            method: HttpMethod::POST,
            url: url.into(),
            headers: vec![
                ("Accept".into(), "application/json".into()),
                ("Content-Type".into(), "application/x-www-form-urlencoded".into()),
            ],
            body: Some(form.into_bytes()),
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Body as UTF-8, for assertions and logging of non-secret requests.
    pub fn body_str(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// HTTP response from executing a call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with a JSON body.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        HttpResponse {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Error type for HTTP client operations.
pub type HttpClientError = Box<dyn Error + Send + Sync>;

/// Future returned by [`OAuthHttpClient::execute`].
pub type HttpFuture = Pin<Box<dyn Future<Output = std::result::Result<HttpResponse, HttpClientError>> + Send + 'static>>;

/// Generic HTTP client interface for provider calls.
pub trait OAuthHttpClient: Send + Sync + 'static {
    /// Execute an HTTP request asynchronously.
    fn execute(&self, request: HttpRequest) -> HttpFuture;
}

/// Executes `request`, bounding it by its own timeout or `default_timeout`.
pub async fn send(
    client: &dyn OAuthHttpClient,
    request: HttpRequest,
    default_timeout: Duration,
) -> Result<HttpResponse> {
    let deadline = request.timeout.unwrap_or(default_timeout);
    let method = request.method;
    let url = request.url.clone();
    match tokio::time::timeout(deadline, client.execute(request)).await {
        Ok(Ok(response)) => {
            debug!(%method, %url, status = response.status, "provider call completed");
            Ok(response)
        }
        Ok(Err(err)) => Err(AuthError::Http(err.to_string())),
        Err(_) => Err(AuthError::Timeout),
    }
}

/// In-memory HTTP client stub for testing. Responses are keyed by exact URL;
/// every executed request is recorded.
#[derive(Clone, Default)]
pub struct InMemoryHttpClient {
    responses: Arc<DashMap<String, HttpResponse>>,
    default_response: Option<HttpResponse>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    delay: Option<Duration>,
}

impl InMemoryHttpClient {
    /// Creates a new in-memory HTTP client with no default response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory HTTP client with a default response on miss.
    pub fn with_default(response: HttpResponse) -> Self {
        Self { default_response: Some(response), ..Self::default() }
    }

    /// Delays every response, for exercising timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Register a mock response for a specific URL.
    pub fn insert_response(&self, url: impl Into<String>, response: HttpResponse) {
        self.responses.insert(url.into(), response);
    }

    /// Register a JSON response for a specific URL.
    pub fn insert_json(&self, url: impl Into<String>, status: u16, body: serde_json::Value) {
        self.insert_response(url, HttpResponse::json(status, &body));
    }

    /// Requests executed so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    /// Number of requests sent to `url`.
    pub fn hits(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }
}

impl OAuthHttpClient for InMemoryHttpClient {
    fn execute(&self, request: HttpRequest) -> HttpFuture {
        let responses = self.responses.clone();
        let default = self.default_response.clone();
        let delay = self.delay;
        let url = request.url.clone();
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request);
        }
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(entry) = responses.get(&url) {
                Ok(entry.value().clone())
            } else if let Some(resp) = default {
                Ok(resp)
            } else {
                Err(format!("no mock response for {}", url).into())
            }
        })
    }
}

/// HTTP client backed by `reqwest`.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
    pub fn new(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

#[cfg(feature = "reqwest")]
impl OAuthHttpClient for ReqwestHttpClient {
    fn execute(&self, request: HttpRequest) -> HttpFuture {
        let client = self.inner.clone();
        Box::pin(async move {
            let method = match request.method {
                HttpMethod::GET => reqwest::Method::GET,
                HttpMethod::POST => reqwest::Method::POST,
            };
            let mut builder = client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            let resp = builder.send().await?;
            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();
            let body = resp.bytes().await?.to_vec();
            Ok(HttpResponse { status, headers, body })
        })
    }
}
