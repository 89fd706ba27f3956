use rouille::Response;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use sweetlatex::*;

/// What the mock server saw of one request.
#[derive(Debug, Clone)]
struct Seen {
    method: String,
    path: String,
    query: String,
    authorization: Option<String>,
    content_type: Option<String>,
    cookie: Option<String>,
    body: Vec<u8>,
}

impl Seen {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    fn is(&self, method: &str, path: &str) -> bool {
        self.method == method && self.path == path
    }
}

struct MockApi {
    origin: String,
    log: Arc<Mutex<Vec<Seen>>>,
    stop: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl MockApi {
    fn start<F>(handler: F) -> Self
    where
        F: Fn(&Seen) -> Response + Send + Sync + 'static,
    {
        let log = Arc::new(Mutex::new(Vec::new()));
        let server_log = log.clone();
        let server = rouille::Server::new("127.0.0.1:0", move |request| {
            let mut body = Vec::new();
            if let Some(mut data) = request.data() {
                data.read_to_end(&mut body).unwrap();
            }
            let seen = Seen {
                method: request.method().to_string(),
                path: request.url(),
                query: request.raw_query_string().to_string(),
                authorization: request.header("Authorization").map(|s| s.to_string()),
                content_type: request.header("Content-Type").map(|s| s.to_string()),
                cookie: request.header("Cookie").map(|s| s.to_string()),
                body,
            };
            server_log.lock().unwrap().push(seen.clone());
            handler(&seen)
        })
        .unwrap();
        let origin = format!("http://{}", server.server_addr());
        let (handle, stop) = server.stoppable();
        MockApi {
            origin,
            log,
            stop,
            handle: Some(handle),
        }
    }

    fn seen(&self) -> Vec<Seen> {
        self.log.lock().unwrap().clone()
    }

    fn client_with_token(&self, token: Option<&str>) -> ApiClient {
        let store = match token {
            Some(t) => MemoryTokenStore::with_token(t),
            None => MemoryTokenStore::new(),
        };
        ApiClient::new(ClientConfig::new(&self.origin), store).unwrap()
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn unauthorized() -> Response {
    Response::json(&json!({
        "code": 401,
        "message": "Unauthorized",
        "description": "The server could not verify that you are authorized.",
    }))
    .with_status_code(401)
}

fn counting_observer(client: ApiClient) -> (ApiClient, Arc<AtomicUsize>, Arc<Mutex<Vec<u16>>>) {
    let count = Arc::new(AtomicUsize::new(0));
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let (c, s) = (count.clone(), statuses.clone());
    let client = client.with_error_observer(move |resp| {
        c.fetch_add(1, Ordering::SeqCst);
        s.lock().unwrap().push(resp.status);
    });
    (client, count, statuses)
}

#[test]
fn test_login_then_bearer() {
    let api = MockApi::start(|req| {
        if req.is("POST", "/api/tokens") {
            // base64("susan:hunter2")
            if req.authorization.as_deref() == Some("Basic c3VzYW46aHVudGVyMg==") {
                return Response::json(&json!({"access_token": "tok-1"}));
            }
            return unauthorized();
        }
        if req.is("GET", "/api/me") && req.authorization.as_deref() == Some("Bearer tok-1") {
            return Response::json(&json!({"username": "susan", "role": "user"}));
        }
        unauthorized()
    });
    let client = api.client_with_token(None);
    assert!(!client.is_authenticated());

    assert_eq!(client.login("susan", "hunter2"), LoginOutcome::Ok);
    assert!(client.is_authenticated());
    assert_eq!(client.access_token().as_deref(), Some("tok-1"));

    let resp = client.me();
    assert!(resp.ok);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body_str("username"), Some("susan"));

    let seen = api.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].authorization.as_deref(), Some("Bearer tok-1"));
    assert_eq!(seen[1].content_type.as_deref(), Some("application/json"));
}

#[test]
fn test_login_wrong_password() {
    let api = MockApi::start(|_req| unauthorized());
    let client = api.client_with_token(None);

    assert_eq!(client.login("susan", "wrong"), LoginOutcome::Fail);
    assert!(!client.is_authenticated());
    // a 401 from the token endpoint is never followed by a refresh
    assert_eq!(api.seen().len(), 1);
}

#[test]
fn test_login_server_error() {
    let api = MockApi::start(|_req| Response::text("oops").with_status_code(500));
    let (client, count, _) = counting_observer(api.client_with_token(None));

    assert_eq!(client.login("susan", "hunter2"), LoginOutcome::Error);
    assert!(!client.is_authenticated());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_login_missing_token_is_error() {
    let api = MockApi::start(|_req| Response::json(&json!({"unexpected": true})));
    let client = api.client_with_token(None);
    assert_eq!(client.login("susan", "hunter2"), LoginOutcome::Error);
    assert!(!client.is_authenticated());
}

#[test]
fn test_stale_token_refreshed_and_replayed() {
    let api = MockApi::start(|req| {
        let auth = req.authorization.as_deref();
        if req.is("PUT", "/api/tokens") {
            if auth == Some("Bearer stale") && req.json()["access_token"] == json!("stale") {
                return Response::json(&json!({"access_token": "fresh"}));
            }
            return unauthorized();
        }
        if req.is("POST", "/api/products/carts/7") && auth == Some("Bearer fresh") {
            return Response::json(&json!({"id": 99, "product_id": 7})).with_status_code(201);
        }
        unauthorized()
    });
    let client = api.client_with_token(Some("stale"));

    let resp = client.request(
        &ApiRequest::post("/products/carts/7")
            .query("size", "M")
            .json(json!({"quantity": 1})),
    );
    assert!(resp.ok);
    assert_eq!(resp.status, 201);
    assert_eq!(resp.body.unwrap()["id"], json!(99));
    assert_eq!(client.access_token().as_deref(), Some("fresh"));

    let seen = api.seen();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].is("POST", "/api/products/carts/7"));
    assert!(seen[1].is("PUT", "/api/tokens"));
    assert!(seen[2].is("POST", "/api/products/carts/7"));
    // the replay is the same request, only the token differs
    assert_eq!(seen[0].query, "size=M");
    assert_eq!(seen[2].query, seen[0].query);
    assert_eq!(seen[2].body, seen[0].body);
    assert_eq!(seen[2].json(), json!({"quantity": 1}));
}

#[test]
fn test_stale_token_refresh_fails() {
    let api = MockApi::start(|_req| unauthorized());
    let (client, count, _) = counting_observer(api.client_with_token(Some("stale")));

    let resp = client.get("/me/carts", &[("limit", "5")]);
    assert!(!resp.ok);
    assert_eq!(resp.status, 401);
    assert_eq!(resp.body_str("message"), Some("Unauthorized"));
    // the caller sees the original 401; exactly one refresh was attempted
    let seen = api.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].is("GET", "/api/me/carts"));
    assert!(seen[1].is("PUT", "/api/tokens"));
    assert_eq!(count.load(Ordering::SeqCst), 0);
    // the stale token is left in place; the next login replaces it
    assert_eq!(client.access_token().as_deref(), Some("stale"));
}

#[test]
fn test_refresh_server_fault_reported_once() {
    let api = MockApi::start(|req| {
        if req.is("PUT", "/api/tokens") {
            return Response::text("down").with_status_code(503);
        }
        unauthorized()
    });
    let (client, count, statuses) = counting_observer(api.client_with_token(Some("stale")));

    let resp = client.get("/orders", &[]);
    assert_eq!(resp.status, 401);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(*statuses.lock().unwrap(), vec![503]);
}

#[test]
fn test_token_endpoint_401_not_refreshed() {
    let api = MockApi::start(|_req| unauthorized());
    let client = api.client_with_token(Some("stale"));

    let resp = client.put(TOKENS_PATH, json!({"access_token": "stale"}));
    assert_eq!(resp.status, 401);
    assert_eq!(api.seen().len(), 1);

    // a sub-path of the token endpoint is an ordinary resource, and does get a refresh
    let resp = client.reset_password("reset-abc", "n3w-pass");
    assert_eq!(resp.status, 401);
    let seen = api.seen();
    assert_eq!(seen.len(), 3);
    assert!(seen[1].is("PUT", "/api/tokens/reset"));
    assert_eq!(
        seen[1].json(),
        json!({"token": "reset-abc", "new_password": "n3w-pass"})
    );
    assert!(seen[2].is("PUT", "/api/tokens"));
}

#[test]
fn test_server_fault_observed_once() {
    let api = MockApi::start(|_req| {
        Response::json(&json!({"code": 503, "message": "Service Unavailable"})).with_status_code(503)
    });
    let (client, count, statuses) = counting_observer(api.client_with_token(Some("tok")));

    let resp = client.products(Page::default());
    assert!(!resp.ok);
    assert_eq!(resp.status, 503);
    assert_eq!(resp.error_message(), "Service Unavailable");
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(*statuses.lock().unwrap(), vec![503]);
    assert_eq!(api.seen()[0].query, "limit=25&offset=0");
}

#[test]
fn test_client_errors_returned_as_is() {
    let api = MockApi::start(|_req| {
        Response::json(&json!({
            "code": 400,
            "message": "Validation error",
            "errors": {"json": {"email": ["Not a valid email address."]}},
        }))
        .with_status_code(400)
    });
    let (client, count, _) = counting_observer(api.client_with_token(Some("tok")));

    let resp = client.create_user(json!({"username": "susan", "email": "nope"}));
    assert!(!resp.ok);
    assert_eq!(resp.status, 400);
    assert_eq!(resp.error_message(), "Not a valid email address.");
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(api.seen().len(), 1);
}

#[test]
fn test_no_content() {
    let api = MockApi::start(|_req| Response::empty_204());
    let client = api.client_with_token(Some("tok"));

    let resp = client.delete_product(12);
    assert!(resp.ok);
    assert_eq!(resp.status, 204);
    assert_eq!(resp.body, None);
    assert!(api.seen()[0].is("DELETE", "/api/products/12"));
}

#[test]
fn test_non_json_body() {
    let api = MockApi::start(|_req| Response::text("<html>not here</html>").with_status_code(404));
    let client = api.client_with_token(Some("tok"));

    let resp = client.sale(3);
    assert!(!resp.ok);
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body, None);
}

#[test]
fn test_transport_failure() {
    // nothing listens on port 1
    let client = ApiClient::new(
        ClientConfig::new("http://127.0.0.1:1"),
        MemoryTokenStore::with_token("tok"),
    )
    .unwrap();
    let (client, count, statuses) = counting_observer(client);

    let resp = client.get("/health", &[]);
    assert!(!resp.ok);
    assert_eq!(resp.status, 500);
    let body = resp.body.clone().unwrap();
    assert_eq!(body["code"], json!(500));
    assert_eq!(body["message"], json!("The server is unresponsive"));
    assert!(!body["description"].as_str().unwrap().is_empty());
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(*statuses.lock().unwrap(), vec![500]);

    // still authenticated: no network needed to answer that
    assert!(client.is_authenticated());
}

#[test]
fn test_logout_clears_token_when_server_fails() {
    let api = MockApi::start(|_req| Response::text("oops").with_status_code(500));
    let client = api.client_with_token(Some("tok"));

    client.logout().unwrap();
    assert!(!client.is_authenticated());
    let seen = api.seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].is("DELETE", "/api/tokens"));
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer tok"));

    let offline = ApiClient::new(
        ClientConfig::new("http://127.0.0.1:1"),
        MemoryTokenStore::with_token("tok"),
    )
    .unwrap();
    offline.logout().unwrap();
    assert!(!offline.is_authenticated());
}

#[test]
fn test_query_string_only_when_present() {
    let api = MockApi::start(|_req| Response::json(&json!({"status": "ok"})));
    let client = api.client_with_token(Some("tok"));

    client.health();
    client.get("/products", &[("limit", "5"), ("offset", "10")]);
    client.users(Page::new(10, 20));

    let seen = api.seen();
    assert_eq!(seen[0].query, "");
    assert_eq!(seen[1].query, "limit=5&offset=10");
    assert_eq!(seen[2].query, "limit=10&offset=20");
}

#[test]
fn test_multipart_form() {
    let api = MockApi::start(|_req| Response::json(&json!({"id": 5})).with_status_code(201));
    let client = api.client_with_token(Some("tok"));

    let form = FormData::new()
        .text("title", "Latex Corset")
        .file("image", "corset.png", Some("image/png"), b"PNGDATA".to_vec());
    let resp = client.create_product(form);
    assert_eq!(resp.status, 201);

    let seen = &api.seen()[0];
    assert!(seen.is("POST", "/api/products"));
    assert_eq!(seen.authorization.as_deref(), Some("Bearer tok"));
    assert!(seen
        .content_type
        .as_deref()
        .unwrap()
        .starts_with("multipart/form-data; boundary="));
    let body = String::from_utf8_lossy(&seen.body);
    assert!(body.contains("Latex Corset"));
    assert!(body.contains("filename=\"corset.png\""));
    assert!(body.contains("PNGDATA"));
}

#[test]
fn test_multipart_replayed_after_refresh() {
    let calls = Arc::new(AtomicUsize::new(0));
    let server_calls = calls.clone();
    let api = MockApi::start(move |req| {
        if req.is("PUT", "/api/tokens") {
            return Response::json(&json!({"access_token": "fresh"}));
        }
        if server_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return unauthorized();
        }
        Response::json(&json!({"id": 5}))
    });
    let client = api.client_with_token(Some("stale"));

    let form = FormData::new().text("name", "Madame Latex");
    let resp = client.update_artist(4, form);
    assert!(resp.ok);

    let seen = api.seen();
    assert_eq!(seen.len(), 3);
    assert!(seen[2].is("PUT", "/api/artists/4"));
    assert_eq!(seen[2].authorization.as_deref(), Some("Bearer fresh"));
    assert!(String::from_utf8_lossy(&seen[2].body).contains("Madame Latex"));
}

#[test]
fn test_cookies_only_for_token_endpoint() {
    let api = MockApi::start(|req| {
        if req.is("POST", "/api/tokens") {
            return Response::json(&json!({"access_token": "tok-1"}))
                .with_additional_header("Set-Cookie", "refresh_token=r1; Path=/; HttpOnly");
        }
        if req.is("PUT", "/api/tokens") {
            return Response::json(&json!({"access_token": "tok-2"}));
        }
        if req.authorization.as_deref() == Some("Bearer tok-2") {
            return Response::json(&json!({"username": "susan"}));
        }
        unauthorized()
    });
    let client = api.client_with_token(None);
    assert_eq!(client.login("susan", "hunter2"), LoginOutcome::Ok);

    let resp = client.me();
    assert!(resp.ok);

    let seen = api.seen();
    assert_eq!(seen.len(), 4);
    assert!(seen[1].is("GET", "/api/me"));
    assert_eq!(seen[1].cookie, None);
    assert!(seen[2].is("PUT", "/api/tokens"));
    assert!(seen[2].cookie.as_deref().unwrap().contains("refresh_token=r1"));
    assert_eq!(seen[3].cookie, None);
}

#[test]
fn test_file_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let api = MockApi::start(|_req| Response::json(&json!({"access_token": "tok-1"})));

    let client = ApiClient::new(ClientConfig::new(&api.origin), FileTokenStore::new(&path)).unwrap();
    assert_eq!(client.login("susan", "hunter2"), LoginOutcome::Ok);
    drop(client);

    let client = ApiClient::new(ClientConfig::new(&api.origin), FileTokenStore::new(&path)).unwrap();
    assert!(client.is_authenticated());
    assert_eq!(client.access_token().as_deref(), Some("tok-1"));
    client.logout().unwrap();

    let client = ApiClient::new(ClientConfig::new(&api.origin), FileTokenStore::new(&path)).unwrap();
    assert!(!client.is_authenticated());
}

#[test]
fn test_paginated_listing() {
    let api = MockApi::start(|_req| {
        Response::json(&json!({
            "data": [{"id": 1, "total_price": 10.0}, {"id": 2, "total_price": 5.5}],
            "pagination": {"limit": 2, "offset": 0, "count": 2, "total": 5},
            "extra_data": {"total_price": 15.5},
        }))
    });
    let client = api.client_with_token(Some("tok"));

    let resp = client.my_carts(Page::new(2, 0));
    let page: Paginated<Value> = resp.parse_body().unwrap();
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.pagination.next_page(), Some(Page::new(2, 2)));
    assert_eq!(page.pagination.page_count(), 3);
    assert_eq!(page.extra_data.unwrap()["total_price"], json!(15.5));
    assert!(api.seen()[0].is("GET", "/api/me/carts"));
}
