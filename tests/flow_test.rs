use std::sync::Arc;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use starberry_auth::clock::{Clock, FixedClock};
use starberry_auth::config::AuthConfig;
use starberry_auth::credentials::{CredentialsAuthorizer, InMemoryUserStore};
use starberry_auth::csrf::CsrfSubmission;
use starberry_auth::error::AuthError;
use starberry_auth::flow::{RouteOutcome, SignInFlow, SignedIn};
use starberry_auth::http_client::InMemoryHttpClient;
use starberry_auth::oauth::UserIdentity;
use starberry_auth::oidc::DiscoveryCache;
use starberry_auth::storage::InMemoryStorage;
use starberry_lib::ende::base64url_encode;
use starberry_lib::parse_form;

const NOW: i64 = 1_700_000_000;
const ISSUER: &str = "https://idp.example";
const TOKEN_URL: &str = "https://idp.example/token";
const SIGNING_KEY: &[u8] = b"id-token-signing-secret-for-tests";

fn config() -> AuthConfig {
    AuthConfig::from_json_str(
        r#"{
            "secret": "0123456789abcdef0123456789abcdef",
            "url": "http://localhost:3000",
            "providers": [
                {"type": "oidc", "id": "idp", "name": "Example IdP", "issuer": "https://idp.example",
                 "client_id": "abc", "client_secret": "shh",
                 "redirect_uri": "http://localhost:3000/api/auth/callback/idp"},
                {"type": "credentials", "id": "password", "name": "Password"}
            ]
        }"#,
    )
    .unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mock_idp() -> InMemoryHttpClient {
    let http = InMemoryHttpClient::new();
    http.insert_json(
        "https://idp.example/.well-known/openid-configuration",
        200,
        json!({
            "issuer": ISSUER,
            "authorization_endpoint": "https://idp.example/authorize",
            "token_endpoint": TOKEN_URL,
            "jwks_uri": "https://idp.example/jwks"
        }),
    );
    http.insert_json(
        "https://idp.example/jwks",
        200,
        json!({"keys": [{"kty": "oct", "kid": "k1", "alg": "HS256", "k": base64url_encode(SIGNING_KEY)}]}),
    );
    http
}

fn users() -> InMemoryUserStore {
    let store = InMemoryUserStore::new();
    store.insert(
        UserIdentity { id: "u-7".into(), email: "Grace@Example.com".into(), name: Some("Grace".into()), image: None },
        "hunter22",
        1_000,
    );
    store
}

fn flow(http: &InMemoryHttpClient, clock: &FixedClock) -> SignInFlow {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()));
    SignInFlow::new(&config(), storage, Arc::new(http.clone()), clock)
        .unwrap()
        .with_discovery_cache(DiscoveryCache::new())
        .with_credentials_authorizer(CredentialsAuthorizer::with_iterations(Arc::new(users()), 1_000))
}

fn query_param(url: &str, name: &str) -> String {
    let (_, query) = url.split_once('?').unwrap();
    parse_form(query).into_iter().find(|(k, _)| k == name).map(|(_, v)| v).unwrap()
}

fn signed_id_token(nonce: &str) -> String {
    let claims = json!({
        "iss": ISSUER,
        "aud": "abc",
        "sub": "idp-user-1",
        "email": "ada@example.com",
        "name": "Ada",
        "nonce": nonce,
        "iat": NOW,
        "exp": NOW + 300
    });
    let header = Header { kid: Some("k1".into()), ..Header::new(Algorithm::HS256) };
    encode(&header, &claims, &EncodingKey::from_secret(SIGNING_KEY)).unwrap()
}

fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Token and cookie value from the CSRF endpoint, as a browser would hold them.
fn csrf_pair(flow: &SignInFlow) -> (String, String) {
    let (body, cookie) = flow.issue_csrf("http://localhost:3000/api/auth/csrf");
    assert_eq!(cookie.name, "starberry.csrf-token");
    (body["csrfToken"].as_str().unwrap().to_string(), cookie.value)
}

fn submission<'a>(pair: &'a (String, String)) -> CsrfSubmission<'a> {
    CsrfSubmission::new(Some(pair.0.as_str()), Some(pair.1.as_str()))
}

fn signed_in(outcome: RouteOutcome<SignedIn>) -> SignedIn {
    match outcome {
        RouteOutcome::Ok(signed_in) => signed_in,
        other => panic!("expected a completed sign-in, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_oidc_sign_in_end_to_end() {
    init_tracing();
    let http = mock_idp();
    let clock = FixedClock::at_unix(NOW);
    let flow = flow(&http, &clock);

    let outcome = flow.begin("idp", "/dashboard").await.unwrap();
    let location = outcome.location().unwrap().to_string();
    assert!(location.starts_with("https://idp.example/authorize?"));
    let state = query_param(&location, "state");
    let nonce = query_param(&location, "nonce");
    assert_eq!(query_param(&location, "code_challenge_method"), "S256");

    http.insert_json(
        TOKEN_URL,
        200,
        json!({"access_token": "at-1", "token_type": "bearer", "expires_in": 3600, "id_token": signed_id_token(&nonce)}),
    );
    let done = signed_in(flow.callback("idp", &params(&[("state", state.as_str()), ("code", "auth-code")])).await.unwrap());
    assert_eq!(done.user.id, "idp-user-1");
    assert_eq!(done.user.email, "ada@example.com");
    assert_eq!(done.redirect(), RouteOutcome::redirect("/dashboard"));
    assert_eq!(done.session_cookie.name, "starberry.session-token");
    assert_eq!(done.tokens.as_ref().map(|t| t.token_type.as_str()), Some("Bearer"));

    let exchange = http.requests().into_iter().find(|r| r.url == TOKEN_URL).unwrap();
    assert!(exchange.body_str().unwrap().contains("code_verifier="));

    let reply = flow.session(Some(done.session_cookie.value.as_str())).await.unwrap();
    assert_eq!(reply.body["user"]["email"], "ada@example.com");
    assert!(reply.body["expires"].is_string());

    // The state was single-use.
    let replay = flow.callback("idp", &params(&[("state", state.as_str()), ("code", "auth-code")])).await;
    assert!(matches!(replay, Err(AuthError::StateInvalid)));

    let csrf = csrf_pair(&flow);
    let cleared = flow.sign_out(&done.session_cookie.value, submission(&csrf)).await.unwrap();
    assert_eq!(cleared.max_age, Some(0));
    let reply = flow.session(Some(done.session_cookie.value.as_str())).await.unwrap();
    assert_eq!(reply.body, json!({"user": null, "expires": null}));
}

#[tokio::test]
async fn test_callback_with_provider_error_consumes_state() {
    let http = mock_idp();
    let flow = flow(&http, &FixedClock::at_unix(NOW));
    let outcome = flow.begin("idp", "/").await.unwrap();
    let state = query_param(outcome.location().unwrap(), "state");

    let denied = flow.callback("idp", &params(&[("state", state.as_str()), ("error", "access_denied")])).await;
    assert!(matches!(denied, Err(AuthError::TokenExchange { ref code, .. }) if code == "access_denied"));
    let retry = flow.callback("idp", &params(&[("state", state.as_str()), ("code", "late")])).await;
    assert!(matches!(retry, Err(AuthError::StateInvalid)));
}

#[tokio::test]
async fn test_credentials_sign_in_and_sign_out_everywhere() {
    init_tracing();
    let http = InMemoryHttpClient::new();
    let flow = flow(&http, &FixedClock::at_unix(NOW));
    let csrf = csrf_pair(&flow);

    let first = signed_in(
        flow.sign_in_credentials("password", " grace@example.com", "hunter22", "https://evil.example/", submission(&csrf))
            .await
            .unwrap(),
    );
    assert_eq!(first.user.id, "u-7");
    assert_eq!(first.redirect_to, "/");
    assert!(first.tokens.is_none());
    let second = signed_in(
        flow.sign_in_credentials("password", "GRACE@example.com", "hunter22", "/settings", submission(&csrf)).await.unwrap(),
    );
    assert_eq!(second.redirect_to, "/settings");

    let wrong = flow.sign_in_credentials("password", "grace@example.com", "hunter2", "/", submission(&csrf)).await;
    assert!(matches!(wrong, Err(AuthError::CredentialsRejected)));
    let unknown = flow.sign_in_credentials("password", "nobody@example.com", "hunter22", "/", submission(&csrf)).await;
    assert!(matches!(unknown, Err(AuthError::CredentialsRejected)));

    assert_eq!(flow.sign_out_everywhere("u-7").await.unwrap(), 2);
    for token in [&first.session_cookie.value, &second.session_cookie.value] {
        let reply = flow.session(Some(token.as_str())).await.unwrap();
        assert_eq!(reply.body["user"], Value::Null);
    }
}

#[tokio::test]
async fn test_csrf_mismatch_changes_nothing() {
    let http = InMemoryHttpClient::new();
    let flow = flow(&http, &FixedClock::at_unix(NOW));
    let csrf = csrf_pair(&flow);
    let other = csrf_pair(&flow);
    assert_ne!(csrf.0, other.0);
    let mismatched = CsrfSubmission::new(Some(other.0.as_str()), Some(csrf.1.as_str()));

    let rejected = flow.sign_in_credentials("password", "grace@example.com", "hunter22", "/", mismatched).await;
    assert!(matches!(rejected, Err(AuthError::Csrf)));
    let missing = flow
        .sign_in_credentials("password", "grace@example.com", "hunter22", "/", CsrfSubmission::new(None, Some(csrf.1.as_str())))
        .await;
    assert!(matches!(missing, Err(AuthError::Csrf)));
    assert_eq!(flow.sign_out_everywhere("u-7").await.unwrap(), 0);

    let done = signed_in(
        flow.sign_in_credentials("password", "grace@example.com", "hunter22", "/", submission(&csrf)).await.unwrap(),
    );
    let token = done.session_cookie.value.as_str();
    assert!(matches!(flow.sign_out(token, mismatched).await, Err(AuthError::Csrf)));
    assert!(matches!(flow.sign_out(token, CsrfSubmission::default()).await, Err(AuthError::Csrf)));
    let reply = flow.session(Some(token)).await.unwrap();
    assert_eq!(reply.body["user"]["id"], "u-7");

    flow.sign_out(token, submission(&csrf)).await.unwrap();
    assert_eq!(flow.session(Some(token)).await.unwrap().body["user"], Value::Null);
}

#[tokio::test]
async fn test_unknown_provider_and_listing() {
    let http = InMemoryHttpClient::new();
    let flow = flow(&http, &FixedClock::at_unix(NOW));

    assert!(matches!(flow.begin("nope", "/").await.unwrap(), RouteOutcome::NotFound(_)));
    assert!(matches!(flow.callback("nope", &[]).await.unwrap(), RouteOutcome::NotFound(_)));
    assert!(matches!(flow.sign_in_credentials("idp", "a@b.c", "pw", "/", CsrfSubmission::default()).await.unwrap(), RouteOutcome::NotFound(_)));
    assert!(http.requests().is_empty());

    assert_eq!(
        flow.providers_response(),
        json!({"providers": [
            {"id": "idp", "name": "Example IdP", "type": "oidc"},
            {"id": "password", "name": "Password", "type": "credentials"}
        ]})
    );
}

#[test]
fn test_callback_url_guard() {
    let flow = flow(&InMemoryHttpClient::new(), &FixedClock::at_unix(NOW));
    assert_eq!(flow.safe_callback_url("/after?x=1"), "/after?x=1");
    assert_eq!(flow.safe_callback_url("http://localhost:3000/home"), "http://localhost:3000/home");
    assert_eq!(flow.safe_callback_url("//evil.example"), "/");
    assert_eq!(flow.safe_callback_url("http://localhost:3000.evil.example/"), "/");
    assert_eq!(flow.safe_callback_url("https://evil.example/"), "/");
    for smuggled in ["/\t/evil.example", "/\n/evil.example", "/\r/evil.example", "/ /evil.example", "/\u{0}/x"] {
        assert_eq!(flow.safe_callback_url(smuggled), "/", "{:?}", smuggled);
    }
    assert_eq!(flow.safe_callback_url("http://localhost:3000/\tx"), "/");
}
