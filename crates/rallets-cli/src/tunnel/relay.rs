//! Per-connection relay between a local SOCKS5 client and the remote
//! endpoint, encrypting upstream and decrypting downstream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use rallets_crypto::{Cipher, ChunkOpener, ChunkSealer};

use super::TunnelError;
use super::socks5::{self, Reply, TargetAddr};

const READ_BUF_SIZE: usize = 16 * 1024;

/// Serve one accepted local connection until either side closes.
pub async fn relay_connection(
    mut local: TcpStream,
    remote_addr: &str,
    cipher: &Cipher,
) -> Result<(), TunnelError> {
    let target = socks5::accept(&mut local).await?;

    let remote = match TcpStream::connect(remote_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = socks5::send_reply(&mut local, Reply::HostUnreachable).await;
            return Err(e.into());
        }
    };
    remote.set_nodelay(true)?;
    socks5::send_reply(&mut local, Reply::Succeeded).await?;
    debug!(%target, remote = %remote_addr, "Relaying connection");

    let (local_rd, local_wr) = local.into_split();
    let (remote_rd, remote_wr) = remote.into_split();
    relay_streams(local_rd, local_wr, remote_rd, remote_wr, &target, cipher).await
}

/// Pump both directions until they finish. The first error aborts both.
pub async fn relay_streams<LR, LW, RR, RW>(
    local_rd: LR,
    local_wr: LW,
    remote_rd: RR,
    mut remote_wr: RW,
    target: &TargetAddr,
    cipher: &Cipher,
) -> Result<(), TunnelError>
where
    LR: AsyncRead + Unpin,
    LW: AsyncWrite + Unpin,
    RR: AsyncRead + Unpin,
    RW: AsyncWrite + Unpin,
{
    let (salt, mut sealer) = cipher.sealer()?;
    let mut preamble = salt;
    preamble.extend_from_slice(&sealer.seal(&target.to_bytes())?);
    remote_wr.write_all(&preamble).await?;

    tokio::try_join!(
        upstream(local_rd, remote_wr, sealer),
        downstream(remote_rd, local_wr, cipher),
    )?;
    Ok(())
}

async fn upstream<R, W>(mut rd: R, mut wr: W, mut sealer: ChunkSealer) -> Result<(), TunnelError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = rd.read(&mut buf).await?;
        if n == 0 {
            wr.shutdown().await?;
            return Ok(());
        }
        wr.write_all(&sealer.seal(&buf[..n])?).await?;
    }
}

async fn downstream<R, W>(mut rd: R, mut wr: W, cipher: &Cipher) -> Result<(), TunnelError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut salt = vec![0u8; cipher.kind().salt_size()];
    match rd.read_exact(&mut salt).await {
        Ok(_) => {}
        // Remote closed before answering.
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            wr.shutdown().await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }
    let mut opener: ChunkOpener = cipher.opener(&salt)?;

    let mut pending: Vec<u8> = Vec::with_capacity(READ_BUF_SIZE);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = rd.read(&mut buf).await?;
        if n == 0 {
            wr.shutdown().await?;
            return Ok(());
        }
        pending.extend_from_slice(&buf[..n]);
        let (plain, used) = opener.open_available(&pending)?;
        pending.drain(..used);
        if !plain.is_empty() {
            wr.write_all(&plain).await?;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::{duplex, split};

    use super::*;

    const METHOD: &str = "chacha20-ietf-poly1305";

    #[tokio::test]
    async fn upstream_is_salted_and_sealed_with_target_header() {
        let cipher = Cipher::new(METHOD, "pw").unwrap();
        let (local_app, local_side) = duplex(64 * 1024);
        let (remote_side, mut remote_server) = duplex(64 * 1024);
        let (local_rd, local_wr) = split(local_side);
        let (remote_rd, remote_wr) = split(remote_side);
        let target = TargetAddr::Domain("example.com".into(), 443);

        let relay_cipher = cipher.clone();
        let relay = tokio::spawn(async move {
            relay_streams(local_rd, local_wr, remote_rd, remote_wr, &target, &relay_cipher).await
        });

        let (mut app_rd, mut app_wr) = split(local_app);
        app_wr.write_all(b"ping").await.unwrap();
        app_wr.shutdown().await.unwrap();

        let mut salt = vec![0u8; 32];
        remote_server.read_exact(&mut salt).await.unwrap();
        let mut opener = cipher.opener(&salt).unwrap();
        let mut wire = Vec::new();
        let mut chunk = [0u8; 1024];
        let mut plain = Vec::new();
        while plain.len() < 1 + 1 + 11 + 2 + 4 {
            let n = remote_server.read(&mut chunk).await.unwrap();
            assert_ne!(n, 0);
            wire.extend_from_slice(&chunk[..n]);
            let (out, used) = opener.open_available(&wire).unwrap();
            wire.drain(..used);
            plain.extend_from_slice(&out);
        }
        let (addr, used) = TargetAddr::from_bytes(&plain).unwrap().unwrap();
        assert_eq!(addr, TargetAddr::Domain("example.com".into(), 443));
        assert_eq!(&plain[used..], b"ping");

        // Reply from the remote, sealed under the server's own salt.
        let (server_salt, mut server_sealer) = cipher.sealer().unwrap();
        let mut reply = server_salt;
        reply.extend_from_slice(&server_sealer.seal(b"pong").unwrap());
        remote_server.write_all(&reply).await.unwrap();
        remote_server.shutdown().await.unwrap();

        let mut got = Vec::new();
        app_rd.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"pong");
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn tampered_downstream_aborts_relay() {
        let cipher = Cipher::new(METHOD, "pw").unwrap();
        let (_local_app, local_side) = duplex(4096);
        let (remote_side, mut remote_server) = duplex(4096);
        let (local_rd, local_wr) = split(local_side);
        let (remote_rd, remote_wr) = split(remote_side);
        let target = TargetAddr::Ip("127.0.0.1:80".parse().unwrap());

        let relay_cipher = cipher.clone();
        let relay = tokio::spawn(async move {
            relay_streams(local_rd, local_wr, remote_rd, remote_wr, &target, &relay_cipher).await
        });

        let (server_salt, mut server_sealer) = cipher.sealer().unwrap();
        let mut reply = server_salt;
        reply.extend_from_slice(&server_sealer.seal(b"pong").unwrap());
        let last = reply.len() - 1;
        reply[last] ^= 0xFF;
        remote_server.write_all(&reply).await.unwrap();

        assert!(matches!(
            relay.await.unwrap(),
            Err(TunnelError::Cipher(_))
        ));
    }
}
