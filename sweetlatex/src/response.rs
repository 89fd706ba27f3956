use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

const TRANSPORT_FAILURE_MESSAGE: &str = "The server is unresponsive";
const FALLBACK_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Uniform result of every API call.
///
/// Transport failures, HTTP errors and successes all come back as this same shape; callers tell
/// them apart by `ok` and `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub ok: bool,
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    /// Envelope used when no HTTP response was received at all.
    pub fn transport_failure(description: &str) -> Self {
        ApiResponse {
            ok: false,
            status: 500,
            body: Some(json!({
                "code": 500,
                "message": TRANSPORT_FAILURE_MESSAGE,
                "description": description,
            })),
        }
    }

    pub fn is_server_fault(&self) -> bool {
        self.status >= 500
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Looks up a top-level string field of the body, eg "access_token".
    pub fn body_str(&self, key: &str) -> Option<&str> {
        self.body.as_ref()?.get(key)?.as_str()
    }

    pub fn parse_body<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let body = self
            .body
            .clone()
            .ok_or(anyhow!("response (status {}) has no body", self.status))?;
        Ok(serde_json::from_value(body)?)
    }

    /// Best human-readable error message for this response.
    ///
    /// Validation failures come back as `{"errors": {"json": {"field": ["msg", ...]}}}` (or under
    /// "form" for multipart submissions); the messages of the first field are joined. Otherwise
    /// falls back to "message", then "description".
    pub fn error_message(&self) -> String {
        let body = match &self.body {
            Some(b) => b,
            None => return FALLBACK_ERROR_MESSAGE.to_string(),
        };
        let errors = body
            .pointer("/errors/json")
            .or_else(|| body.pointer("/errors/form"))
            .and_then(|v| v.as_object());
        if let Some(first) = errors.and_then(|m| m.values().next()) {
            let mut messages = Vec::new();
            flatten_messages(first, &mut messages);
            if !messages.is_empty() {
                return messages.join(", ");
            }
        }
        body["message"]
            .as_str()
            .or(body["description"].as_str())
            .unwrap_or(FALLBACK_ERROR_MESSAGE)
            .to_string()
    }
}

fn flatten_messages(val: &Value, out: &mut Vec<String>) {
    match val {
        Value::Array(l) => l.iter().for_each(|v| flatten_messages(v, out)),
        Value::String(s) => out.push(s.clone()),
        Value::Null => {}
        other => out.push(other.to_string()),
    }
}

#[test]
fn test_transport_failure() {
    let resp = ApiResponse::transport_failure("connection refused");
    assert!(!resp.ok);
    assert_eq!(resp.status, 500);
    assert!(resp.is_server_fault());
    assert_eq!(resp.body_str("message"), Some("The server is unresponsive"));
    assert_eq!(resp.body_str("description"), Some("connection refused"));
    assert_eq!(resp.body.unwrap()["code"], json!(500));
}

#[test]
fn test_error_message() {
    let resp = |body: Option<Value>| ApiResponse {
        ok: false,
        status: 400,
        body,
    };
    assert_eq!(
        resp(Some(json!({"errors": {"json": {"email": [["Not a valid email."], "Required"]}}})))
            .error_message(),
        "Not a valid email., Required"
    );
    assert_eq!(
        resp(Some(json!({"errors": {"form": {"image": ["Missing file"]}}}))).error_message(),
        "Missing file"
    );
    assert_eq!(
        resp(Some(json!({"code": 404, "message": "Not Found"}))).error_message(),
        "Not Found"
    );
    assert_eq!(
        resp(Some(json!({"description": "boom"}))).error_message(),
        "boom"
    );
    assert_eq!(resp(None).error_message(), "An unexpected error occurred");
    assert_eq!(
        resp(Some(json!({"errors": {"json": {}}}))).error_message(),
        "An unexpected error occurred"
    );
}

#[test]
fn test_parse_body() {
    #[derive(serde::Deserialize)]
    struct Token {
        access_token: String,
    }
    let resp = ApiResponse {
        ok: true,
        status: 200,
        body: Some(json!({"access_token": "abc"})),
    };
    assert_eq!(resp.parse_body::<Token>().unwrap().access_token, "abc");
    let empty = ApiResponse {
        ok: true,
        status: 204,
        body: None,
    };
    assert!(empty.parse_body::<Token>().is_err());
}
