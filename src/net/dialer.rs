//! Dialer and packet-socket seams
//!
//! The engine never opens sockets directly; it goes through a [`Dialer`],
//! which either hits the raw network ([`DirectDialer`]) or chains to
//! another proxy (the engine itself implements [`Dialer`]).

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, TcpStream, UdpSocket};

use crate::error::Socks5Error;

/// A datagram endpoint, the async analogue of a packet socket.
///
/// Implemented by [`tokio::net::UdpSocket`] for the raw network and by
/// [`UdpPacketConn`](crate::socks::UdpPacketConn) for SOCKS5-framed
/// flows, so relay code is agnostic to the framing underneath.
#[async_trait]
pub trait PacketConn: Send + Sync + std::fmt::Debug {
    /// Receive one datagram, returning its length and source address.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send one datagram to the given address.
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// The local address the socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Release resources tied to the connection.
    ///
    /// Idempotent. The underlying socket itself is freed when the last
    /// handle drops; `close` exists so wrappers can tear down side
    /// channels (such as a SOCKS5 control connection) deterministically.
    async fn close(&self) -> io::Result<()>;
}

#[async_trait]
impl PacketConn for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    async fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens outbound connections on behalf of the engine.
///
/// `network` follows the conventional names: `tcp`/`tcp4`/`tcp6` for
/// streams, `udp`/`udp4`/`udp6` for datagrams.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a TCP connection to `addr` (`host:port`).
    async fn dial(&self, network: &str, addr: &str) -> Result<TcpStream>;

    /// Open a datagram socket able to reach `addr`, returning the
    /// socket and the address writes should be directed to.
    async fn dial_udp(&self, network: &str, addr: &str)
        -> Result<(Arc<dyn PacketConn>, SocketAddr)>;
}

/// Listening address plus the dialer used to reach the proxy itself.
#[derive(Clone)]
pub struct Forwarder {
    addr: String,
    c_dialer: Arc<dyn Dialer>,
}

impl Forwarder {
    /// Create a forwarder base for the given address and client-side dialer.
    pub fn new(addr: &str, c_dialer: Arc<dyn Dialer>) -> Self {
        Forwarder {
            addr: addr.to_string(),
            c_dialer,
        }
    }

    /// The configured address (listen address in the server role,
    /// remote proxy address in the client role).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The dialer used to reach the proxy address.
    pub fn c_dialer(&self) -> &Arc<dyn Dialer> {
        &self.c_dialer
    }
}

/// Dialer that opens sockets straight on the local network stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: &str, addr: &str) -> Result<TcpStream> {
        let want_v4 = match network {
            "tcp" => None,
            "tcp4" => Some(true),
            "tcp6" => Some(false),
            other => return Err(Socks5Error::UnsupportedNetwork(other.to_string()).into()),
        };

        let target = resolve(addr, want_v4).await?;
        let stream = TcpStream::connect(target)
            .await
            .with_context(|| format!("failed to connect to {}", addr))?;
        set_keepalive(&stream)?;

        Ok(stream)
    }

    async fn dial_udp(
        &self,
        network: &str,
        addr: &str,
    ) -> Result<(Arc<dyn PacketConn>, SocketAddr)> {
        let want_v4 = match network {
            "udp" => None,
            "udp4" => Some(true),
            "udp6" => Some(false),
            other => return Err(Socks5Error::UnsupportedNetwork(other.to_string()).into()),
        };

        let target = resolve(addr, want_v4).await?;
        let bind: SocketAddr = if target.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("failed to bind UDP socket toward {}", addr))?;

        Ok((Arc::new(socket), target))
    }
}

/// Resolve `host:port`, optionally constrained to one address family.
async fn resolve(addr: &str, want_v4: Option<bool>) -> Result<SocketAddr> {
    lookup_host(addr)
        .await
        .with_context(|| format!("failed to resolve {}", addr))?
        .find(|sa| match want_v4 {
            None => true,
            Some(v4) => sa.is_ipv4() == v4,
        })
        .with_context(|| format!("no suitable address for {}", addr))
}

/// Enable TCP keepalive on a stream; tokio exposes no setter of its own.
pub(crate) fn set_keepalive(stream: &TcpStream) -> io::Result<()> {
    let sock = socket2::SockRef::from(stream);
    sock.set_keepalive(true)
}
