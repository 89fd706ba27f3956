use crate::auth::{basic_auth_value, bearer_auth_value, LoginOutcome};
use crate::config::ClientConfig;
use crate::request::{ApiRequest, BodyEncoding, FormData, RequestBody, TOKENS_PATH};
use crate::response::ApiResponse;
use crate::session::TokenStore;
pub use anyhow::Result;
use log::{debug, info, warn};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::fmt;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Callback invoked with every server fault (status >= 500) before it is returned to the caller.
pub type ErrorObserver = Box<dyn Fn(&ApiResponse) + Send + Sync>;

/// Authenticated client for the storefront REST API.
///
/// Every call returns an [`ApiResponse`]; expected failure modes (HTTP errors, unreachable
/// server) are values, never `Err` or panics. A 401 on anything but the token endpoint triggers
/// one token refresh and, if that worked, one replay of the original request.
pub struct ApiClient {
    /// No cookie jar: resource endpoints never see session cookies.
    http_client: reqwest::blocking::Client,
    /// Cookie jar, only used against the token endpoint.
    session_client: reqwest::blocking::Client,
    config: ClientConfig,
    tokens: Box<dyn TokenStore>,
    on_error: Option<ErrorObserver>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("authenticated", &self.is_authenticated())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl ApiClient {
    pub fn new<S: TokenStore + 'static>(config: ClientConfig, tokens: S) -> Result<Self> {
        let mut http_builder = reqwest::blocking::Client::builder().user_agent(APP_USER_AGENT);
        let mut session_builder = reqwest::blocking::Client::builder()
            .user_agent(APP_USER_AGENT)
            .cookie_store(true);
        if let Some(timeout) = config.timeout {
            http_builder = http_builder.timeout(timeout);
            session_builder = session_builder.timeout(timeout);
        }
        Ok(ApiClient {
            http_client: http_builder.build()?,
            session_client: session_builder.build()?,
            config,
            tokens: Box::new(tokens),
            on_error: None,
        })
    }

    pub fn with_error_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ApiResponse) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Full URL of an uploaded media file (eg, a product image).
    pub fn image_url(&self, name: &str) -> String {
        format!("{}{}", self.config.media_base(), name.trim_start_matches('/'))
    }

    /// True if an access token is stored. Does not check it with the server.
    pub fn is_authenticated(&self) -> bool {
        self.tokens.load().is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens.load()
    }

    pub fn get(&self, path: &str, query: &[(&str, &str)]) -> ApiResponse {
        self.request(&ApiRequest::get(path).query_pairs(query.iter().copied()))
    }

    pub fn post(&self, path: &str, body: Value) -> ApiResponse {
        self.request(&ApiRequest::post(path).json(body))
    }

    pub fn put(&self, path: &str, body: Value) -> ApiResponse {
        self.request(&ApiRequest::put(path).json(body))
    }

    pub fn delete(&self, path: &str) -> ApiResponse {
        self.request(&ApiRequest::delete(path))
    }

    pub fn post_form(&self, path: &str, form: FormData) -> ApiResponse {
        self.request(&ApiRequest::post(path).form(form))
    }

    pub fn put_form(&self, path: &str, form: FormData) -> ApiResponse {
        self.request(&ApiRequest::put(path).form(form))
    }

    /// Issues one API call, with at most one token refresh and one replay.
    pub fn request(&self, req: &ApiRequest) -> ApiResponse {
        let resp = self.execute(req);
        let resp = if resp.is_unauthorized() && !req.targets_token_endpoint() {
            debug!("{} {} got 401, attempting token refresh", req.method(), req.path());
            if self.refresh() {
                self.execute(req)
            } else {
                resp
            }
        } else {
            resp
        };
        self.observe(&resp);
        resp
    }

    /// Exchanges the stored token for a new one at the token endpoint.
    ///
    /// Returns true if a new token was stored. The token sent is whatever is in the store at this
    /// moment, which under concurrent use may already have been rotated by another call.
    pub fn refresh(&self) -> bool {
        let req = ApiRequest::put(TOKENS_PATH).json(json!({
            "access_token": self.tokens.load(),
        }));
        let resp = self.execute(&req);
        self.observe(&resp);
        if !resp.ok {
            warn!("token refresh rejected (status {})", resp.status);
            return false;
        }
        match resp.body_str("access_token") {
            Some(token) => match self.tokens.store(token) {
                Ok(()) => {
                    info!("access token refreshed");
                    true
                }
                Err(e) => {
                    warn!("could not persist refreshed token: {e}");
                    false
                }
            },
            None => {
                warn!("token refresh response had no access_token");
                false
            }
        }
    }

    /// Creates a new session using HTTP Basic credentials, and stores the issued token.
    pub fn login(&self, username: &str, password: &str) -> LoginOutcome {
        let auth = match basic_auth_value(username, password) {
            Ok(v) => v,
            Err(e) => {
                warn!("could not encode credentials: {e}");
                return LoginOutcome::Error;
            }
        };
        let resp = self.request(&ApiRequest::post(TOKENS_PATH).header(header::AUTHORIZATION, auth));
        if !resp.ok {
            return if resp.is_unauthorized() {
                LoginOutcome::Fail
            } else {
                LoginOutcome::Error
            };
        }
        match resp.body_str("access_token") {
            Some(token) => match self.tokens.store(token) {
                Ok(()) => {
                    info!("logged in as {username}");
                    LoginOutcome::Ok
                }
                Err(e) => {
                    warn!("could not persist access token: {e}");
                    LoginOutcome::Error
                }
            },
            None => {
                warn!("login response had no access_token");
                LoginOutcome::Error
            }
        }
    }

    /// Revokes the session server-side (best effort) and always forgets the local token.
    pub fn logout(&self) -> Result<()> {
        let resp = self.request(&ApiRequest::delete(TOKENS_PATH));
        if !resp.ok {
            debug!("ignoring failed token revocation (status {})", resp.status);
        }
        self.tokens.clear()?;
        Ok(())
    }

    fn observe(&self, resp: &ApiResponse) {
        if resp.is_server_fault() {
            if let Some(on_error) = &self.on_error {
                on_error(resp);
            }
        }
    }

    /// Single attempt, no retry. Transport errors are folded into the synthesized 500 envelope.
    fn execute(&self, req: &ApiRequest) -> ApiResponse {
        debug!(
            "API {} {} query={:?}",
            req.method(),
            req.path(),
            req.query_params()
        );
        match self.send(req) {
            Ok(resp) => {
                debug!("API {} {} -> {}", req.method(), req.path(), resp.status);
                resp
            }
            Err(err) => {
                warn!("API {} {} failed: {err}", req.method(), req.path());
                ApiResponse::transport_failure(&err.to_string())
            }
        }
    }

    fn send(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let url = self.endpoint_url(req)?;
        let client = if req.targets_token_endpoint() {
            &self.session_client
        } else {
            &self.http_client
        };
        let mut builder = client
            .request(req.method().into(), url)
            .headers(self.request_headers(req));
        builder = match req.body() {
            Some(RequestBody::Json(val)) => builder.body(serde_json::to_vec(val)?),
            Some(RequestBody::Form(form)) => builder.multipart(form.to_multipart()?),
            None => builder,
        };
        let res = builder.send()?;
        let status = res.status();
        let body = if status == StatusCode::NO_CONTENT {
            None
        } else {
            let raw = res.bytes()?;
            if raw.is_empty() {
                None
            } else {
                match serde_json::from_slice(&raw) {
                    Ok(val) => Some(val),
                    Err(e) => {
                        warn!("non-JSON response body (status {}): {e}", status.as_u16());
                        None
                    }
                }
            }
        };
        Ok(ApiResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            body,
        })
    }

    fn endpoint_url(&self, req: &ApiRequest) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.config.api_base(), req.path()))?;
        if !req.query_params().is_empty() {
            url.query_pairs_mut().extend_pairs(req.query_params().iter());
        }
        Ok(url)
    }

    fn request_headers(&self, req: &ApiRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if req.encoding() == BodyEncoding::Json {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        let token = self.tokens.load();
        let bearer = bearer_auth_value(token.as_deref()).or_else(|e| {
            warn!("stored access token is not a valid header value: {e}");
            bearer_auth_value(None)
        });
        if let Ok(value) = bearer {
            headers.insert(header::AUTHORIZATION, value);
        }
        for (name, value) in req.headers().iter() {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

#[cfg(test)]
fn test_client(origin: &str) -> ApiClient {
    ApiClient::new(
        ClientConfig::new(origin),
        crate::session::MemoryTokenStore::with_token("abc"),
    )
    .unwrap()
}

#[test]
fn test_endpoint_url() {
    let client = test_client("http://shop.test");
    let url = client.endpoint_url(&ApiRequest::get("/products")).unwrap();
    assert_eq!(url.as_str(), "http://shop.test/api/products");

    let req = ApiRequest::get("/products")
        .query("limit", 25)
        .query("q", "red dress & more");
    let url = client.endpoint_url(&req).unwrap();
    assert_eq!(
        url.as_str(),
        "http://shop.test/api/products?limit=25&q=red+dress+%26+more"
    );
}

#[test]
fn test_request_headers() {
    let client = test_client("http://shop.test");

    let headers = client.request_headers(&ApiRequest::get("/me"));
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(headers[header::AUTHORIZATION], "Bearer abc");

    // multipart leaves the content type to the transport
    let headers = client.request_headers(&ApiRequest::post("/products").form(FormData::new()));
    assert!(headers.get(header::CONTENT_TYPE).is_none());
    assert_eq!(headers[header::AUTHORIZATION], "Bearer abc");

    // extra headers win over defaults
    let req = ApiRequest::post(TOKENS_PATH).header(
        header::AUTHORIZATION,
        basic_auth_value("u", "p").unwrap(),
    );
    let headers = client.request_headers(&req);
    assert_eq!(headers[header::AUTHORIZATION], "Basic dTpw");
}

#[test]
fn test_image_url() {
    let client = test_client("http://shop.test/");
    assert_eq!(
        client.image_url("dress.png"),
        "http://shop.test/api/media/dress.png"
    );
    assert_eq!(
        client.image_url("/dress.png"),
        "http://shop.test/api/media/dress.png"
    );
}

#[test]
fn test_bad_origin_is_transport_failure() {
    let client = test_client("not a url");
    let resp = client.get("/me", &[]);
    assert!(!resp.ok);
    assert_eq!(resp.status, 500);
    assert_eq!(resp.body_str("message"), Some("The server is unresponsive"));
}
