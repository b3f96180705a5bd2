//! Provisioning service client.
//!
//! Two form-encoded POST calls: `/login` issues a session id and
//! `/rallets_notification` (the heartbeat) returns the endpoint roster plus
//! the system notification. No retries happen here.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use rallets_core::{ClientConfig, Roster, Session, SystemNotification};

const LOGIN_ROUTE: &str = "/login";
const HEARTBEAT_ROUTE: &str = "/rallets_notification";

/// Service call errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The service rejected the credentials or session. The message is the
    /// server's own, shown verbatim.
    #[error("{0}")]
    Auth(String),

    /// Network, HTTP or decoding failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Decoded heartbeat payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub notification: SystemNotification,
    pub roster: Roster,
}

/// The two remote operations the controller depends on.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, ServiceError>;

    async fn heartbeat(&self, session: &Session) -> Result<HeartbeatReport, ServiceError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginResponse {
    ok: bool,
    message: String,
    session_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HeartbeatResponse {
    ok: bool,
    message: String,
    system_notification: SystemNotification,
    #[serde(rename = "self")]
    account: AccountSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AccountSection {
    ssconfigs: Roster,
}

/// HTTP client for the provisioning service.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ServiceClient {
    pub fn new(config: ClientConfig) -> Result<Self, ServiceError> {
        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("rallets-cli/{}", config.client_version))
            .build()?;
        Ok(Self { http, config })
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// POST `form` to `route` and decode the JSON body, whatever the status.
    async fn post<T: DeserializeOwned>(
        &self,
        route: &str,
        form: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        let url = self.config.url(route);
        let resp = self.http.post(&url).form(form).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        debug!(%url, status = status.as_u16(), bytes = body.len(), "Service response");
        serde_json::from_slice(&body).map_err(|e| {
            ServiceError::Transport(format!(
                "malformed response from {route} (HTTP {}): {e}",
                status.as_u16()
            ))
        })
    }
}

#[async_trait]
impl RemoteService for ServiceClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, ServiceError> {
        let resp: LoginResponse = self
            .post(
                LOGIN_ROUTE,
                &[
                    ("username_or_email", username),
                    ("login_password", password),
                    ("DEVICE_TYPE", self.config.device_type.as_str()),
                ],
            )
            .await?;
        if !resp.ok {
            return Err(ServiceError::Auth(resp.message));
        }
        Ok(Session::new(resp.session_id))
    }

    async fn heartbeat(&self, session: &Session) -> Result<HeartbeatReport, ServiceError> {
        let resp: HeartbeatResponse = self
            .post(
                HEARTBEAT_ROUTE,
                &[
                    ("session_id", session.id()),
                    ("VERSION", self.config.client_version.as_str()),
                    ("DEVICE_TYPE", self.config.device_type.as_str()),
                ],
            )
            .await?;
        if !resp.ok {
            return Err(ServiceError::Auth(resp.message));
        }
        Ok(HeartbeatReport {
            notification: resp.system_notification,
            roster: resp.account.ssconfigs,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_response_decodes_full_payload() {
        let json = r#"{
            "ok": true,
            "message": "",
            "system_notification": {
                "show": true,
                "link": "https://rallets.example/news",
                "download_link": "https://rallets.example/dl",
                "version": "9.9.9",
                "message": "Scheduled maintenance"
            },
            "self": {
                "ssconfigs": [
                    {"id": "7b0f1ce4-1", "port": 1080, "method": "chacha20-ietf-poly1305",
                     "server": "a.example", "server_port": "8388", "password": "p",
                     "remarks": "A", "state": 1, "kcp": false, "fast_open": false},
                    {"id": "ebf14aed-2", "port": 1080, "method": "chacha20-ietf-poly1305",
                     "server": "b.example", "server_port": "8388", "password": "p",
                     "remarks": "B", "state": 1, "kcp": true, "fast_open": true}
                ]
            }
        }"#;
        let resp: HeartbeatResponse = serde_json::from_str(json).unwrap();
        assert!(resp.ok);
        assert!(resp.system_notification.show);
        assert_eq!(resp.system_notification.version, "9.9.9");
        assert_eq!(resp.account.ssconfigs.len(), 2);
        assert_eq!(resp.account.ssconfigs.as_slice()[1].display_name, "B");
    }

    #[test]
    fn missing_ok_means_failure() {
        let resp: LoginResponse = serde_json::from_str(r#"{"message": "nope"}"#).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.message, "nope");
    }

    #[test]
    fn heartbeat_without_self_has_empty_roster() {
        let resp: HeartbeatResponse = serde_json::from_str(r#"{"ok": true}"#).unwrap();
        assert!(resp.account.ssconfigs.is_empty());
    }

    #[test]
    fn auth_error_displays_server_message_verbatim() {
        let err = ServiceError::Auth("Wrong password".into());
        assert_eq!(err.to_string(), "Wrong password");
    }

    #[test]
    fn client_builds_with_default_config() {
        let client = ServiceClient::new(ClientConfig::default()).unwrap();
        assert_eq!(client.config().device_type, "CLI");
    }
}
