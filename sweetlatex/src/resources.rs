//! Typed helpers for the storefront's REST resources.
//!
//! These are thin wrappers over [`ApiClient::request`]; they only fix paths, methods and
//! pagination parameters. Interpreting the response (including `ok`) is left to the caller.

use crate::client::ApiClient;
use crate::request::{ApiRequest, FormData};
use crate::response::ApiResponse;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const DEFAULT_PAGE_LIMIT: u64 = 25;

/// Page request, sent as `limit` and `offset` query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: u64, offset: u64) -> Self {
        Page { limit, offset }
    }

    fn apply(&self, req: ApiRequest) -> ApiRequest {
        req.query("limit", self.limit).query("offset", self.offset)
    }
}

/// Pagination block of a collection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
    /// Items in this page; older servers omit it
    #[serde(default)]
    pub count: Option<u64>,
    pub total: u64,
}

impl Pagination {
    pub fn next_offset(&self) -> Option<u64> {
        if self.limit == 0 {
            return None;
        }
        self.offset
            .checked_add(self.limit)
            .filter(|next| *next < self.total)
    }

    pub fn prev_offset(&self) -> Option<u64> {
        if self.offset == 0 {
            None
        } else {
            Some(self.offset.saturating_sub(self.limit))
        }
    }

    /// One-based page number of this page.
    pub fn page_number(&self) -> u64 {
        if self.limit == 0 {
            1
        } else {
            self.offset / self.limit + 1
        }
    }

    pub fn page_count(&self) -> u64 {
        if self.limit == 0 || self.total == 0 {
            1
        } else {
            self.total / self.limit + u64::from(self.total % self.limit != 0)
        }
    }

    pub fn next_page(&self) -> Option<Page> {
        self.next_offset().map(|offset| Page::new(self.limit, offset))
    }

    pub fn prev_page(&self) -> Option<Page> {
        self.prev_offset().map(|offset| Page::new(self.limit, offset))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
    #[serde(default)]
    pub extra_data: Option<Map<String, Value>>,
}

impl ApiClient {
    /// Profile of the logged-in user.
    pub fn me(&self) -> ApiResponse {
        self.request(&ApiRequest::get("/me"))
    }

    pub fn my_carts(&self, page: Page) -> ApiResponse {
        self.request(&page.apply(ApiRequest::get("/me/carts")))
    }

    pub fn remove_from_my_cart(&self, cart_id: u64) -> ApiResponse {
        self.delete(&format!("/me/carts/{cart_id}"))
    }

    pub fn products(&self, page: Page) -> ApiResponse {
        self.request(&page.apply(ApiRequest::get("/products")))
    }

    /// Public presale view of a single product.
    pub fn sale(&self, product_id: u64) -> ApiResponse {
        self.request(&ApiRequest::get(&format!("/sales/{product_id}")))
    }

    pub fn create_product(&self, form: FormData) -> ApiResponse {
        self.post_form("/products", form)
    }

    pub fn update_product(&self, product_id: u64, form: FormData) -> ApiResponse {
        self.put_form(&format!("/products/{product_id}"), form)
    }

    pub fn delete_product(&self, product_id: u64) -> ApiResponse {
        self.delete(&format!("/products/{product_id}"))
    }

    pub fn delete_all_products(&self) -> ApiResponse {
        self.delete("/products-all")
    }

    pub fn expire_product(&self, product_id: u64) -> ApiResponse {
        self.put(&format!("/expire/{product_id}"), json!({}))
    }

    pub fn expire_all_products(&self) -> ApiResponse {
        self.put("/products-all", json!({}))
    }

    pub fn add_to_cart(&self, product_id: u64) -> ApiResponse {
        self.post(&format!("/products/carts/{product_id}"), json!({}))
    }

    pub fn carts(&self, page: Page) -> ApiResponse {
        self.request(&page.apply(ApiRequest::get("/carts")))
    }

    pub fn delete_cart(&self, cart_id: u64) -> ApiResponse {
        self.delete(&format!("/carts/{cart_id}"))
    }

    pub fn users(&self, page: Page) -> ApiResponse {
        self.request(&page.apply(ApiRequest::get("/users")))
    }

    pub fn user(&self, username: &str) -> ApiResponse {
        self.request(&ApiRequest::get(&format!("/users/{username}")))
    }

    /// Registers a new account; `body` carries username, email and password.
    pub fn create_user(&self, body: Value) -> ApiResponse {
        self.post("/users", body)
    }

    pub fn delete_user(&self, user_id: u64) -> ApiResponse {
        self.delete(&format!("/users/{user_id}"))
    }

    pub fn orders(&self, page: Page) -> ApiResponse {
        self.request(&page.apply(ApiRequest::get("/orders")))
    }

    pub fn delete_order(&self, order_id: u64) -> ApiResponse {
        self.delete(&format!("/orders/{order_id}"))
    }

    pub fn artists(&self, page: Page) -> ApiResponse {
        self.request(&page.apply(ApiRequest::get("/artists")))
    }

    pub fn artist_names(&self) -> ApiResponse {
        self.request(&ApiRequest::get("/artist-names"))
    }

    pub fn create_artist(&self, form: FormData) -> ApiResponse {
        self.post_form("/artists", form)
    }

    pub fn update_artist(&self, artist_id: u64, form: FormData) -> ApiResponse {
        self.put_form(&format!("/artists/{artist_id}"), form)
    }

    pub fn delete_artist(&self, artist_id: u64) -> ApiResponse {
        self.delete(&format!("/artists/{artist_id}"))
    }

    /// Starts payment for the current cart; the body carries `session_url` (or `cancel_url`).
    pub fn create_checkout_session(&self) -> ApiResponse {
        self.post("/create-checkout-session", Value::Null)
    }

    pub fn health(&self) -> ApiResponse {
        self.request(&ApiRequest::get("/health"))
    }

    pub fn request_password_reset(&self, email: &str) -> ApiResponse {
        self.post("/tokens/reset", json!({ "email": email }))
    }

    pub fn reset_password(&self, reset_token: &str, new_password: &str) -> ApiResponse {
        self.put(
            "/tokens/reset",
            json!({
                "token": reset_token,
                "new_password": new_password,
            }),
        )
    }
}

#[test]
fn test_pagination_offsets() {
    let pag = Pagination {
        limit: 25,
        offset: 0,
        count: Some(25),
        total: 60,
    };
    assert_eq!(pag.next_offset(), Some(25));
    assert_eq!(pag.prev_offset(), None);
    assert_eq!(pag.page_number(), 1);
    assert_eq!(pag.page_count(), 3);
    assert_eq!(pag.next_page(), Some(Page::new(25, 25)));

    let last = Pagination {
        offset: 50,
        count: Some(10),
        ..pag
    };
    assert_eq!(last.next_offset(), None);
    assert_eq!(last.prev_offset(), Some(25));
    assert_eq!(last.page_number(), 3);

    // offsets not aligned to the limit still step back without underflow
    let odd = Pagination {
        offset: 10,
        ..pag
    };
    assert_eq!(odd.prev_offset(), Some(0));
    assert_eq!(odd.prev_page(), Some(Page::new(25, 0)));

    let empty = Pagination {
        limit: 25,
        offset: 0,
        count: Some(0),
        total: 0,
    };
    assert_eq!(empty.next_offset(), None);
    assert_eq!(empty.page_count(), 1);
}

#[test]
fn test_pagination_huge_values() {
    // values come straight from the server; arithmetic must not overflow
    let pag: Pagination = serde_json::from_value(json!({
        "limit": 25,
        "offset": u64::MAX - 5,
        "total": u64::MAX,
    }))
    .unwrap();
    assert_eq!(pag.next_offset(), None);
    assert_eq!(pag.next_page(), None);
    assert_eq!(pag.page_count(), u64::MAX / 25 + 1);
    assert_eq!(pag.prev_offset(), Some(u64::MAX - 30));

    let big_limit = Pagination {
        limit: u64::MAX,
        offset: 1,
        count: None,
        total: u64::MAX,
    };
    assert_eq!(big_limit.next_offset(), None);
    assert_eq!(big_limit.page_count(), 1);
    assert_eq!(big_limit.page_number(), 1);
}

#[test]
fn test_paginated_parse() {
    let resp = ApiResponse {
        ok: true,
        status: 200,
        body: Some(json!({
            "data": [{"id": 1}, {"id": 2}],
            "pagination": {"limit": 5, "offset": 0, "count": 2, "total": 2},
            "extra_data": {"total_price": 42.5},
        })),
    };
    let page: Paginated<Value> = resp.parse_body().unwrap();
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.pagination.total, 2);
    assert_eq!(
        page.extra_data.unwrap()["total_price"],
        serde_json::json!(42.5)
    );

    // no count, no extra_data
    let resp = ApiResponse {
        ok: true,
        status: 200,
        body: Some(json!({
            "data": [],
            "pagination": {"limit": 25, "offset": 0, "total": 0},
        })),
    };
    let page: Paginated<Value> = resp.parse_body().unwrap();
    assert_eq!(page.pagination.count, None);
    assert!(page.extra_data.is_none());
}

#[test]
fn test_page_query() {
    let req = Page::default().apply(ApiRequest::get("/products"));
    assert_eq!(
        req.query_params(),
        &[
            ("limit".to_string(), "25".to_string()),
            ("offset".to_string(), "0".to_string())
        ]
    );
}
