use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::{Result, TailorError};

pub const DEFAULT_USER_AGENT: &str = concat!("tailor/", env!("CARGO_PKG_VERSION"));

/// Settings shared by every outbound HTTP call of a tick.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Overall timeout for a single request. A request that exceeds it fails
    /// for the current tick only.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    pub user_agent: String,

    /// Extra headers merged over the defaults
    pub headers: HeaderMap,

    pub danger_accept_invalid_certs: bool,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HeaderMap::new(),
            danger_accept_invalid_certs: false,
            pool_max_idle_per_host: 10,
        }
    }
}

impl HttpClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "application/vnd.apple.mpegurl,application/x-mpegurl,application/json;q=0.9,*/*;q=0.8",
            ),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }

    fn merged_headers(&self) -> HeaderMap {
        let mut headers = Self::get_default_headers();
        // Custom headers take precedence over defaults for the same fields
        for (name, value) in self.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

/// Build the `reqwest::Client` every collaborator shares.
///
/// Every request is bounded by `config.timeout`; a zero timeout is rejected.
pub fn build_client(config: &HttpClientConfig) -> Result<reqwest::Client> {
    if config.timeout.is_zero() {
        return Err(TailorError::configuration(
            "HTTP timeout must be greater than zero",
        ));
    }

    reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.merged_headers())
        .connect_timeout(config.connect_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .timeout(config.timeout)
        .build()
        .map_err(|e| TailorError::configuration(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderName;

    #[test]
    fn custom_headers_override_defaults() {
        let mut config = HttpClientConfig::default();
        config
            .headers
            .insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        config.headers.insert(
            HeaderName::from_static("x-demo"),
            HeaderValue::from_static("1"),
        );

        let merged = config.merged_headers();
        assert_eq!(merged.get(reqwest::header::ACCEPT).unwrap(), "*/*");
        assert_eq!(merged.get("x-demo").unwrap(), "1");
        assert!(merged.contains_key(reqwest::header::CONNECTION));
    }

    #[test]
    fn builds_default_client() {
        let config = HttpClientConfig::default().with_timeout(Duration::from_secs(2));
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn zero_timeout_is_a_configuration_error() {
        let config = HttpClientConfig::default().with_timeout(Duration::ZERO);
        let err = build_client(&config).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("timeout"));
    }
}
