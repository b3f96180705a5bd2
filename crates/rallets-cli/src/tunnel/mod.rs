//! Tunnel engine: cipher construction and local traffic forwarding.
//!
//! The controller never talks to the engine directly. It publishes the
//! current target on a `watch` channel and the engine follows it.

pub mod engine;
pub mod relay;
pub mod socks5;

use rallets_crypto::CryptoError;

pub use engine::{ShadowsocksEngine, TunnelEngine};
pub use socks5::TargetAddr;

/// Tunnel engine errors.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error(transparent)]
    Cipher(#[from] CryptoError),

    #[error("Server {id} has invalid local port {port}")]
    InvalidPort { id: String, port: i64 },

    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SOCKS5 error: {0}")]
    Socks(String),
}
