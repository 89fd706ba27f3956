pub use anyhow::Result;
use reqwest::header::HeaderValue;
use std::fmt;

/// Result of a credential login against the token endpoint.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LoginOutcome {
    /// Token issued and persisted
    Ok,
    /// Credentials rejected (401)
    Fail,
    /// Anything else: server fault, transport failure, unusable response
    Error,
}

impl fmt::Display for LoginOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoginOutcome::Ok => "ok",
            LoginOutcome::Fail => "fail",
            LoginOutcome::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// `Authorization` value for HTTP Basic auth.
pub fn basic_auth_value(username: &str, password: &str) -> Result<HeaderValue> {
    let enc = base64::encode_config(format!("{username}:{password}"), base64::STANDARD);
    let mut value = HeaderValue::from_str(&format!("Basic {enc}"))?;
    value.set_sensitive(true);
    Ok(value)
}

/// `Authorization` value carrying a bearer token. A missing token is sent as an empty credential;
/// the server decides what to do with it.
pub fn bearer_auth_value(token: Option<&str>) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.unwrap_or("")))?;
    value.set_sensitive(true);
    Ok(value)
}

#[test]
fn test_basic_auth_value() {
    assert_eq!(
        basic_auth_value("susan", "hunter2").unwrap(),
        "Basic c3VzYW46aHVudGVyMg=="
    );
    assert!(basic_auth_value("susan", "hunter2").unwrap().is_sensitive());
    // non-ASCII survives because it is base64 encoded first
    assert!(basic_auth_value("zoë", "pässword").is_ok());
}

#[test]
fn test_bearer_auth_value() {
    assert_eq!(bearer_auth_value(Some("abc")).unwrap(), "Bearer abc");
    assert_eq!(bearer_auth_value(None).unwrap(), "Bearer ");
    assert!(bearer_auth_value(Some("bad\ntoken")).is_err());
}

#[test]
fn test_login_outcome_display() {
    assert_eq!(LoginOutcome::Ok.to_string(), "ok");
    assert_eq!(LoginOutcome::Fail.to_string(), "fail");
    assert_eq!(LoginOutcome::Error.to_string(), "error");
}
