//! Outbound HTTP client configuration.
//!
//! Clients built here are shared process-wide and carry no per-caller state:
//! credentials travel on each request as signed headers, never as client
//! defaults, so a pooled connection cannot carry one tenant's identity into
//! another tenant's request.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// HTTP client configuration.
///
/// No whole-request deadline is set; response bodies may stream for as long
/// as the hosting platform allows. Callers bound the individual waits (time
/// to first byte, idle time between reads) themselves.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// TCP + TLS connect timeout (default: 5s)
    pub connect_timeout: Duration,
    /// Pool idle timeout (default: 90s)
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
    /// TCP keepalive interval (default: 30s)
    pub tcp_keepalive: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            tcp_keepalive: Duration::from_secs(30),
            user_agent: "agent-platform-rust/1.0".to_string(),
        }
    }
}

impl HttpConfig {
    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the pool limits.
    #[must_use]
    pub fn with_pool_config(mut self, idle_timeout: Duration, max_idle: usize) -> Self {
        self.pool_idle_timeout = idle_timeout;
        self.pool_max_idle_per_host = max_idle;
        self
    }
}

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns an error if the client cannot be built (e.g., TLS initialization fails).
///
/// # Examples
///
/// ```
/// use rust_common::{build_http_client, HttpConfig};
/// use std::time::Duration;
///
/// let config = HttpConfig::default().with_connect_timeout(Duration::from_secs(2));
/// assert!(build_http_client(&config).is_ok());
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    ClientBuilder::new()
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .tcp_keepalive(config.tcp_keepalive)
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .use_rustls_tls()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.pool_max_idle_per_host, 32);
    }

    #[test]
    fn test_config_builder() {
        let config = HttpConfig::default()
            .with_connect_timeout(Duration::from_secs(1))
            .with_pool_config(Duration::from_secs(10), 4)
            .with_user_agent("signing-proxy/test");

        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.pool_idle_timeout, Duration::from_secs(10));
        assert_eq!(config.pool_max_idle_per_host, 4);
        assert_eq!(config.user_agent, "signing-proxy/test");
    }

    #[test]
    fn test_build_client() {
        assert!(build_http_client(&HttpConfig::default()).is_ok());
    }
}
