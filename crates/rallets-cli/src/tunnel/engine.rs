//! The tunnel engine: binds the local listener for the active endpoint and
//! follows retargets published by the controller.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use rallets_core::EndpointDescriptor;
use rallets_crypto::Cipher;

use super::TunnelError;
use super::relay::relay_connection;

/// Pause after a failed `accept` (e.g. descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Builds ciphers and runs local forwarding for a target endpoint.
#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// Build the stream cipher for `method`, keyed by `password`.
    fn construct_cipher(&self, method: &str, password: &str) -> Result<Cipher, TunnelError>;

    /// Bind the local listener for the current target and start forwarding.
    ///
    /// The returned task follows `targets` until the sender is dropped. It
    /// fails if a later target carries a cipher that cannot be built or a
    /// port that cannot be bound.
    async fn start(
        &self,
        targets: watch::Receiver<EndpointDescriptor>,
    ) -> Result<JoinHandle<Result<(), TunnelError>>, TunnelError>;
}

/// SOCKS5 in, shadowsocks AEAD out.
#[derive(Debug, Clone)]
pub struct ShadowsocksEngine {
    listen_host: String,
}

impl ShadowsocksEngine {
    pub fn new(listen_host: impl Into<String>) -> Self {
        Self {
            listen_host: listen_host.into(),
        }
    }

    fn listen_address(&self, target: &EndpointDescriptor) -> Result<String, TunnelError> {
        if target.local_port().is_none() {
            return Err(TunnelError::InvalidPort {
                id: target.short_id().to_string(),
                port: target.transport_port,
            });
        }
        Ok(target.listen_address(&self.listen_host))
    }
}

#[async_trait]
impl TunnelEngine for ShadowsocksEngine {
    fn construct_cipher(&self, method: &str, password: &str) -> Result<Cipher, TunnelError> {
        Ok(Cipher::new(method, password)?)
    }

    async fn start(
        &self,
        mut targets: watch::Receiver<EndpointDescriptor>,
    ) -> Result<JoinHandle<Result<(), TunnelError>>, TunnelError> {
        let target = targets.borrow_and_update().clone();
        let cipher = self.construct_cipher(&target.cipher_method, &target.password)?;
        let listen = self.listen_address(&target)?;
        let listener = bind(&listen).await?;
        info!(
            listen = %listen,
            remote = %target.remote_address(),
            cipher = %cipher.kind(),
            "Tunnel started"
        );
        let forwarder = Forwarder {
            engine: self.clone(),
            listener,
            active: target,
            cipher,
        };
        Ok(tokio::spawn(forwarder.run(targets)))
    }
}

async fn bind(addr: &str) -> Result<TcpListener, TunnelError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| TunnelError::Bind {
            addr: addr.to_string(),
            source,
        })
}

async fn back_off_after_accept_error(error: &std::io::Error) {
    warn!(error = %error, backoff_ms = ACCEPT_BACKOFF.as_millis(), "Accept failed");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

struct Forwarder {
    engine: ShadowsocksEngine,
    listener: TcpListener,
    active: EndpointDescriptor,
    cipher: Cipher,
}

impl Forwarder {
    async fn run(
        mut self,
        mut targets: watch::Receiver<EndpointDescriptor>,
    ) -> Result<(), TunnelError> {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let _ = stream.set_nodelay(true);
                            let cipher = self.cipher.clone();
                            let remote = self.active.remote_address();
                            connections.spawn(async move {
                                if let Err(e) = relay_connection(stream, &remote, &cipher).await {
                                    warn!(%peer, error = %e, "Relayed connection failed");
                                }
                            });
                        }
                        Err(e) => back_off_after_accept_error(&e).await,
                    }
                }
                changed = targets.changed() => {
                    if changed.is_err() {
                        debug!("Target publisher closed, stopping tunnel");
                        return Ok(());
                    }
                    let next = targets.borrow_and_update().clone();
                    self.retarget(next, &mut connections).await?;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }

    async fn retarget(
        &mut self,
        next: EndpointDescriptor,
        connections: &mut JoinSet<()>,
    ) -> Result<(), TunnelError> {
        self.cipher = self
            .engine
            .construct_cipher(&next.cipher_method, &next.password)?;
        let listen = self.engine.listen_address(&next)?;
        connections.abort_all();
        if next.transport_port != self.active.transport_port {
            self.listener = bind(&listen).await?;
        }
        info!(
            listen = %listen,
            remote = %next.remote_address(),
            cipher = %self.cipher.kind(),
            "Tunnel retargeted"
        );
        self.active = next;
        Ok(())
    }
}
