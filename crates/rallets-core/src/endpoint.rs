//! Proxy endpoint descriptors as handed out by the provisioning service.
//!
//! A descriptor is immutable once received; every heartbeat produces a
//! fresh set. Failover compares descriptors by their connection profile
//! rather than by `id`, because `id` doubles as the short-id lookup key.

use serde::{Deserialize, Deserializer, Serialize};

/// Number of id characters shown by roster listings.
pub const SHORT_ID_LEN: usize = 8;

/// One proxy server entry from the service roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EndpointDescriptor {
    /// Globally unique, stable across heartbeats for the same logical server.
    #[serde(default)]
    pub id: String,
    /// Local port the forwarder listens on, as sent. [`Self::local_port`]
    /// gives the validated value.
    #[serde(rename = "port", default)]
    pub transport_port: i64,
    /// Cipher method name, e.g. `chacha20-ietf-poly1305`.
    #[serde(rename = "method", default)]
    pub cipher_method: String,
    #[serde(rename = "server", default)]
    pub remote_host: String,
    /// Kept as text; the service has sent it both quoted and bare.
    #[serde(
        rename = "server_port",
        default,
        deserialize_with = "string_or_number"
    )]
    pub remote_port: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "remarks", default)]
    pub display_name: String,
    #[serde(rename = "state", default)]
    pub enabled_state: i32,
    #[serde(rename = "kcp", default)]
    pub use_kcp: bool,
    #[serde(default)]
    pub fast_open: bool,
}

/// The connection-defining subset of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Profile<'a> {
    pub transport_port: i64,
    pub cipher_method: &'a str,
    pub remote_host: &'a str,
    pub password: &'a str,
    pub remote_port: &'a str,
}

impl EndpointDescriptor {
    /// The tuple that decides whether two descriptors describe the same tunnel.
    pub fn profile(&self) -> Profile<'_> {
        Profile {
            transport_port: self.transport_port,
            cipher_method: &self.cipher_method,
            remote_host: &self.remote_host,
            password: &self.password,
            remote_port: &self.remote_port,
        }
    }

    /// First [`SHORT_ID_LEN`] characters of the id, or the whole id if shorter.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(SHORT_ID_LEN) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    /// Address of the remote proxy server (`server:server_port`).
    pub fn remote_address(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }

    /// The local port, if it is a valid TCP port.
    pub fn local_port(&self) -> Option<u16> {
        u16::try_from(self.transport_port).ok()
    }

    /// Local listen address for this endpoint on `host`.
    pub fn listen_address(&self, host: &str) -> String {
        format!("{host}:{}", self.transport_port)
    }
}

/// Whether `a` and `b` share port, cipher method, server, password and
/// server port. `id` and display metadata are ignored.
pub fn profile_identical(a: &EndpointDescriptor, b: &EndpointDescriptor) -> bool {
    a.profile() == b.profile()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) => s,
        Some(Raw::Number(n)) => n.to_string(),
        None => String::new(),
    })
}
