use std::time::Duration;

/// Environment variable holding the API origin, eg "https://shop.example.com".
pub const BASE_API_URL_ENV: &str = "SWEETLATEX_BASE_API_URL";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientConfig {
    /// Scheme and host (and optional port) of the storefront. All API paths live under
    /// `<origin>/api`.
    pub origin: String,
    /// Overall request timeout. When unset, the transport defaults apply.
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(origin: &str) -> Self {
        ClientConfig {
            origin: origin.trim_end_matches('/').to_string(),
            timeout: None,
        }
    }

    /// Reads the origin from `SWEETLATEX_BASE_API_URL`, falling back to an empty (same-origin)
    /// value like the browser build does.
    pub fn from_env() -> Self {
        let origin = std::env::var(BASE_API_URL_ENV).unwrap_or_default();
        Self::new(&origin)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn api_base(&self) -> String {
        format!("{}/api", self.origin)
    }

    pub fn media_base(&self) -> String {
        format!("{}/api/media/", self.origin)
    }
}

#[test]
fn test_config_paths() {
    let config = ClientConfig::new("https://shop.example.com/");
    assert_eq!(config.origin, "https://shop.example.com");
    assert_eq!(config.api_base(), "https://shop.example.com/api");
    assert_eq!(config.media_base(), "https://shop.example.com/api/media/");
    assert_eq!(config.timeout, None);

    let config = ClientConfig::new("").with_timeout(Duration::from_secs(5));
    assert_eq!(config.api_base(), "/api");
    assert_eq!(config.timeout, Some(Duration::from_secs(5)));
}
