//! Client configuration.
//!
//! Values come from CLI flags (with environment-variable fallbacks handled
//! by the binary) layered over the defaults below.

use std::path::PathBuf;
use std::time::Duration;

/// Default provisioning service base URL.
pub const DEFAULT_API_HOST: &str = "https://api.rallets.com";

/// Device-type tag sent with every service call.
pub const DEVICE_TYPE: &str = "CLI";

/// Client version reported to the service and compared against the
/// advertised latest release.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration shared by the service client, controller and engine.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service base URL, without trailing slash.
    pub api_host: String,

    pub device_type: String,

    pub client_version: String,

    /// Interval between background heartbeats.
    pub heartbeat_interval: Duration,

    /// Upper bound on a single service call.
    pub request_timeout: Duration,

    /// Host part of the local forwarder's listen address.
    pub listen_host: String,

    /// Session file override; `None` uses the per-user default.
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            device_type: DEVICE_TYPE.to_string(),
            client_version: CLIENT_VERSION.to_string(),
            heartbeat_interval: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            listen_host: "0.0.0.0".to_string(),
            session_file: None,
        }
    }
}

impl ClientConfig {
    /// Set the service base URL; a trailing `/` is dropped.
    #[must_use]
    pub fn with_api_host(mut self, host: &str) -> Self {
        self.api_host = host.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_listen_host(mut self, host: impl Into<String>) -> Self {
        self.listen_host = host.into();
        self
    }

    #[must_use]
    pub fn with_session_file(mut self, path: Option<PathBuf>) -> Self {
        self.session_file = path;
        self
    }

    /// Full URL for a service route such as `/login`.
    pub fn url(&self, route: &str) -> String {
        format!("{}{route}", self.api_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.api_host, DEFAULT_API_HOST);
        assert_eq!(config.device_type, "CLI");
        assert_eq!(config.client_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.listen_host, "0.0.0.0");
        assert!(config.session_file.is_none());
    }

    #[test]
    fn trailing_slash_stripped_from_api_host() {
        let config = ClientConfig::default().with_api_host("http://127.0.0.1:9000/");
        assert_eq!(config.url("/login"), "http://127.0.0.1:9000/login");
    }

    #[test]
    fn builder_overrides() {
        let config = ClientConfig::default()
            .with_heartbeat_interval(Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(2))
            .with_listen_host("127.0.0.1")
            .with_session_file(Some(PathBuf::from("/tmp/session.json")));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.listen_host, "127.0.0.1");
        assert_eq!(
            config.session_file.as_deref(),
            Some(std::path::Path::new("/tmp/session.json"))
        );
    }
}
