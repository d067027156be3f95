use serde_json::json;
use starberry_auth::cookie::parse_cookie_header;
use starberry_auth::csrf::{CsrfGuard, extract_token, verify};
use starberry_auth::error::AuthError;

#[test]
fn test_verify_properties() {
    let token = "c2VjcmV0LXRva2VuLXZhbHVlLWZvci1jc3JmLXRlc3Rz";
    assert!(verify(token, token));
    assert!(!verify(token, &format!("{}x", token)));
    assert!(!verify("", ""));
}

#[test]
fn test_double_submit_round_trip() {
    let guard = CsrfGuard::new("/api/auth");
    let issued = guard.issue_token("http://localhost:3000/api/auth/csrf");

    // The browser sends the cookie back; the page echoes the token in the body.
    let header = format!("{}={}", issued.cookie.name, issued.cookie.value);
    let cookies = parse_cookie_header(&header);
    let cookie = cookies.get(&guard.cookie_name("http://localhost:3000")).map(String::as_str);
    let body = json!({ "csrfToken": issued.token });
    let presented = extract_token(None, Some(&body), None);

    assert!(guard.check(presented.as_deref(), cookie).is_ok());
    assert!(matches!(guard.check(Some("forged"), cookie), Err(AuthError::Csrf)));
    assert!(matches!(guard.check(presented.as_deref(), None), Err(AuthError::Csrf)));
    assert_eq!(AuthError::Csrf.status(), 403);
}

#[test]
fn test_header_wins_over_bodies() {
    let body = json!({ "csrfToken": "json" });
    assert_eq!(extract_token(Some("header"), Some(&body), Some("csrfToken=form")).as_deref(), Some("header"));
    assert_eq!(extract_token(None, None, Some("csrfToken=form")).as_deref(), Some("form"));
}
