//! Local SOCKS5 front end (RFC 1928): no authentication, `CONNECT` only.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::TunnelError;

const SOCKS_VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const NO_ACCEPTABLE_METHOD: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Reply codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    HostUnreachable = 0x04,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// Destination requested by the local client.
///
/// Its byte form (`atyp | addr | port`) is also the address header that
/// opens every encrypted stream to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl TargetAddr {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 16 + 2);
        match self {
            Self::Ip(SocketAddr::V4(addr)) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&addr.ip().octets());
                buf.extend_from_slice(&addr.port().to_be_bytes());
            }
            Self::Ip(SocketAddr::V6(addr)) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&addr.ip().octets());
                buf.extend_from_slice(&addr.port().to_be_bytes());
            }
            Self::Domain(host, port) => {
                buf.push(ATYP_DOMAIN);
                // Domains longer than 255 bytes are rejected when read.
                #[allow(clippy::cast_possible_truncation)]
                buf.push(host.len() as u8);
                buf.extend_from_slice(host.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
        }
        buf
    }

    /// Parse an address header from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold a complete header.
    pub fn from_bytes(buf: &[u8]) -> Result<Option<(Self, usize)>, TunnelError> {
        let Some(&atyp) = buf.first() else {
            return Ok(None);
        };
        let (addr_len, offset) = match atyp {
            ATYP_IPV4 => (4, 1),
            ATYP_IPV6 => (16, 1),
            ATYP_DOMAIN => match buf.get(1) {
                Some(&len) => (usize::from(len), 2),
                None => return Ok(None),
            },
            other => {
                return Err(TunnelError::Socks(format!(
                    "unsupported address type {other:#04x}"
                )));
            }
        };
        let total = offset + addr_len + 2;
        if buf.len() < total {
            return Ok(None);
        }
        let raw = &buf[offset..offset + addr_len];
        let port = u16::from_be_bytes([buf[total - 2], buf[total - 1]]);
        let addr = match atyp {
            ATYP_IPV4 => {
                let octets: [u8; 4] = raw
                    .try_into()
                    .map_err(|_| TunnelError::Socks("bad IPv4 address".into()))?;
                Self::Ip(SocketAddr::from((Ipv4Addr::from(octets), port)))
            }
            ATYP_IPV6 => {
                let octets: [u8; 16] = raw
                    .try_into()
                    .map_err(|_| TunnelError::Socks("bad IPv6 address".into()))?;
                Self::Ip(SocketAddr::from((Ipv6Addr::from(octets), port)))
            }
            _ => Self::Domain(String::from_utf8_lossy(raw).into_owned(), port),
        };
        Ok(Some((addr, total)))
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// Run the server side of the SOCKS5 handshake and return the requested
/// destination. The caller must follow up with [`send_reply`].
pub async fn accept<S>(stream: &mut S) -> Result<TargetAddr, TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS_VERSION {
        return Err(TunnelError::Socks(format!("invalid version {}", head[0])));
    }
    let mut methods = vec![0u8; usize::from(head[1])];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&NO_AUTH) {
        stream
            .write_all(&[SOCKS_VERSION, NO_ACCEPTABLE_METHOD])
            .await?;
        return Err(TunnelError::Socks("client requires authentication".into()));
    }
    stream.write_all(&[SOCKS_VERSION, NO_AUTH]).await?;

    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != SOCKS_VERSION {
        return Err(TunnelError::Socks(format!("invalid version {}", request[0])));
    }
    if request[1] != CMD_CONNECT {
        send_reply(stream, Reply::CommandNotSupported).await?;
        return Err(TunnelError::Socks(format!(
            "unsupported command {:#04x}",
            request[1]
        )));
    }

    let atyp = request[3];
    let mut header = vec![atyp];
    match atyp {
        ATYP_IPV4 => header.resize(1 + 4 + 2, 0),
        ATYP_IPV6 => header.resize(1 + 16 + 2, 0),
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            header.push(len);
            header.resize(2 + usize::from(len) + 2, 0);
        }
        other => {
            send_reply(stream, Reply::AddressTypeNotSupported).await?;
            return Err(TunnelError::Socks(format!(
                "unsupported address type {other:#04x}"
            )));
        }
    }
    let filled = if atyp == ATYP_DOMAIN { 2 } else { 1 };
    stream.read_exact(&mut header[filled..]).await?;

    match TargetAddr::from_bytes(&header)? {
        Some((addr, _)) => Ok(addr),
        None => Err(TunnelError::Socks("truncated address".into())),
    }
}

/// Send a reply with an unspecified bind address.
pub async fn send_reply<S>(stream: &mut S, reply: Reply) -> Result<(), TunnelError>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, reply as u8, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[test]
    fn ipv4_header_layout() {
        let addr = TargetAddr::Ip("1.2.3.4:443".parse().unwrap());
        assert_eq!(addr.to_bytes(), vec![0x01, 1, 2, 3, 4, 0x01, 0xBB]);
    }

    #[test]
    fn domain_header_parses_back() {
        let addr = TargetAddr::Domain("example.com".into(), 80);
        let bytes = addr.to_bytes();
        assert_eq!(bytes[1], 11);
        let (parsed, used) = TargetAddr::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn ipv6_header_parses_back() {
        let addr = TargetAddr::Ip("[::1]:8080".parse().unwrap());
        let mut bytes = addr.to_bytes();
        bytes.extend_from_slice(b"trailing payload");
        let (parsed, used) = TargetAddr::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(used, 1 + 16 + 2);
    }

    #[test]
    fn incomplete_header_needs_more_data() {
        assert!(TargetAddr::from_bytes(&[]).unwrap().is_none());
        assert!(TargetAddr::from_bytes(&[0x03]).unwrap().is_none());
        assert!(TargetAddr::from_bytes(&[0x01, 1, 2]).unwrap().is_none());
    }

    #[test]
    fn unknown_address_type_is_error() {
        assert!(TargetAddr::from_bytes(&[0x09, 0, 0]).is_err());
    }

    #[tokio::test]
    async fn accept_connect_to_domain() {
        let (mut client, mut server) = duplex(256);
        let handshake = tokio::spawn(async move { accept(&mut server).await });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [0x05, 0x00]);

        let mut request = vec![0x05, 0x01, 0x00, 0x03, 11];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let target = handshake.await.unwrap().unwrap();
        assert_eq!(target, TargetAddr::Domain("example.com".into(), 80));
        assert_eq!(target.to_string(), "example.com:80");
    }

    #[tokio::test]
    async fn accept_rejects_bind_command() {
        let (mut client, mut server) = duplex(256);
        let handshake = tokio::spawn(async move { accept(&mut server).await });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], Reply::CommandNotSupported as u8);
        assert!(matches!(
            handshake.await.unwrap(),
            Err(TunnelError::Socks(_))
        ));
    }

    #[tokio::test]
    async fn accept_rejects_auth_only_clients() {
        let (mut client, mut server) = duplex(256);
        let handshake = tokio::spawn(async move { accept(&mut server).await });

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [0x05, 0xFF]);
        assert!(handshake.await.unwrap().is_err());
    }
}
