pub mod auth;
pub mod client;
pub mod config;
pub mod request;
pub mod resources;
pub mod response;
pub mod session;

pub use anyhow::Result;
pub use auth::LoginOutcome;
pub use client::{ApiClient, ErrorObserver};
pub use config::ClientConfig;
pub use request::{ApiRequest, BodyEncoding, FormData, FormPart, Method, RequestBody, TOKENS_PATH};
pub use resources::{Page, Paginated, Pagination};
pub use response::ApiResponse;
pub use session::{FileTokenStore, MemoryTokenStore, StoreError, TokenStore};
