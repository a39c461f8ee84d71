//! The SOCKS5 proxy engine
//!
//! One [`Socks5`] value plays both roles: it serves inbound clients on
//! its address (TCP CONNECT and UDP ASSOCIATE), and it implements
//! [`Dialer`] against that same address so other components can chain
//! through it as their upstream proxy.

use crate::error::Socks5Error;
use crate::net::{relay, set_keepalive, timed_copy, Dialer, Forwarder, PacketConn};
use crate::socks::addr::Address;
use crate::socks::client::{self, Credentials};
use crate::socks::consts::{UDP_BUF_SIZE, UDP_IDLE_TIMEOUT_SECS};
use crate::socks::handshake::{handshake, HandshakeOutcome};
use crate::socks::packet::UdpPacketConn;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info, warn};

/// NAT table mapping client source addresses to upstream packet conns.
type NatMap = Arc<DashMap<String, Arc<UdpPacketConn>>>;

/// Dual-role SOCKS5 proxy.
///
/// In the server role it accepts local applications on `addr` and
/// forwards their traffic through `s_dialer`. In the client role it
/// speaks SOCKS5 to the proxy at `addr` (reached through the
/// forwarder's client-side dialer), optionally authenticating with
/// username/password.
pub struct Socks5 {
    forwarder: Forwarder,
    s_dialer: Arc<dyn Dialer>,
    credentials: Option<Credentials>,
    udp_idle_timeout: Duration,
}

impl Socks5 {
    /// Create a proxy for `addr` with an optional username/password.
    ///
    /// `c_dialer` opens connections toward `addr` (client role);
    /// `s_dialer` opens connections toward targets on behalf of served
    /// clients (server role). Either may itself be a `Socks5` for
    /// chained proxying.
    pub fn new(
        addr: &str,
        username: Option<String>,
        password: Option<String>,
        c_dialer: Arc<dyn Dialer>,
        s_dialer: Arc<dyn Dialer>,
    ) -> Self {
        let credentials = username.map(|username| Credentials {
            username,
            password: password.unwrap_or_default(),
        });

        Socks5 {
            forwarder: Forwarder::new(addr, c_dialer),
            s_dialer,
            credentials,
            udp_idle_timeout: Duration::from_secs(UDP_IDLE_TIMEOUT_SECS),
        }
    }

    /// Override the UDP NAT idle timeout (mainly for tests).
    pub fn with_udp_timeout(mut self, timeout: Duration) -> Self {
        self.udp_idle_timeout = timeout;
        self
    }

    /// The proxy address: listen address in the server role, remote
    /// proxy address in the client role.
    pub fn addr(&self) -> &str {
        self.forwarder.addr()
    }

    /// Serve SOCKS5 requests on both TCP and UDP.
    ///
    /// Listener setup failures are logged and end the respective
    /// listener; established sessions keep draining.
    pub async fn listen_and_serve(self: Arc<Self>) {
        let udp = self.clone();
        tokio::spawn(async move { udp.listen_and_serve_udp().await });
        self.listen_and_serve_tcp().await;
    }

    /// Accept loop for the TCP side.
    pub async fn listen_and_serve_tcp(self: Arc<Self>) {
        let listener = match TcpListener::bind(self.addr()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("socks5 failed to listen on {}: {}", self.addr(), e);
                return;
            }
        };
        info!("socks5 listening TCP on {}", self.addr());

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("socks5 failed to accept: {}", e);
                    continue;
                }
            };

            let proxy = self.clone();
            tokio::spawn(async move {
                if let Err(e) = proxy.serve_tcp(stream, peer).await {
                    warn!("socks5 session with {} failed: {:#}", peer, e);
                }
            });
        }
    }

    /// Serve one accepted TCP connection.
    async fn serve_tcp(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let _ = set_keepalive(&stream);

        let outcome = handshake(&mut stream, self.addr())
            .await
            .context("failed to get target address")?;

        match outcome {
            HandshakeOutcome::Connect(tgt) => {
                let mut upstream = self
                    .s_dialer
                    .dial("tcp", &tgt.to_string())
                    .await
                    .with_context(|| format!("failed to connect to target {}", tgt))?;

                info!("socks5 {} <-> {}", peer, tgt);

                match relay(&mut stream, &mut upstream).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(()),
                    Err(e) => Err(e).context("relay error"),
                }
            }
            HandshakeOutcome::UdpAssociate(_) => {
                // The connection is now a UDP control channel; hold it
                // open until the client goes away.
                hold_control(stream).await;
                debug!("socks5 udp associate with {} ended", peer);
                Ok(())
            }
        }
    }

    /// Accept loop for the UDP side, with the per-source NAT table.
    pub async fn listen_and_serve_udp(self: Arc<Self>) {
        let socket = match UdpSocket::bind(self.addr()).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("socks5-udp failed to listen on {}: {}", self.addr(), e);
                return;
            }
        };
        info!("socks5-udp listening UDP on {}", self.addr());

        let socket: Arc<UdpSocket> = Arc::new(socket);
        let nat: NatMap = Arc::new(DashMap::new());
        let mut buf = vec![0u8; UDP_BUF_SIZE];

        loop {
            // Fresh wrapper per datagram so each flow records its own
            // header target.
            let client_conn = Arc::new(UdpPacketConn::new(socket.clone(), None, None, true, None));

            let (n, raddr) = match client_conn.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("socks5-udp read error: {}", e);
                    continue;
                }
            };
            let Some(tgt) = client_conn.target_addr() else {
                continue;
            };

            let pc = match nat.get(&raddr.to_string()).map(|entry| entry.value().clone()) {
                Some(pc) => pc,
                None => match self.open_udp_session(&nat, client_conn, raddr, &tgt).await {
                    Some(pc) => pc,
                    None => continue,
                },
            };

            let Some(write_addr) = pc.write_addr() else {
                continue;
            };
            if let Err(e) = pc.send_to(&buf[..n], write_addr).await {
                warn!("socks5-udp write error: {}", e);
                continue;
            }

            debug!("socks5-udp {} <-> {}", raddr, tgt);
        }
    }

    /// Dial the upstream side of a new UDP flow and start its reverse
    /// copy task.
    async fn open_udp_session(
        &self,
        nat: &NatMap,
        client_conn: Arc<UdpPacketConn>,
        raddr: SocketAddr,
        tgt: &Address,
    ) -> Option<Arc<UdpPacketConn>> {
        let (upstream, next_hop) = match self.s_dialer.dial_udp("udp", &tgt.to_string()).await {
            Ok(dialed) => dialed,
            Err(e) => {
                warn!("socks5-udp dial error: {:#}", e);
                return None;
            }
        };

        let pc = Arc::new(UdpPacketConn::new(upstream, Some(next_hop), None, false, None));
        let key = raddr.to_string();

        // Last writer wins; a displaced entry is closed here.
        if let Some(old) = nat.insert(key.clone(), pc.clone()) {
            let _ = old.close().await;
        }

        let nat = nat.clone();
        let reverse = pc.clone();
        let idle = self.udp_idle_timeout;
        tokio::spawn(async move {
            if let Err(e) = timed_copy(client_conn.as_ref(), raddr, reverse.as_ref(), idle).await {
                debug!("socks5-udp reverse copy for {} failed: {:#}", key, e);
            }
            let _ = reverse.close().await;
            // Only evict the entry if it is still ours.
            nat.remove_if(&key, |_, current| Arc::ptr_eq(current, &reverse));
            debug!("socks5-udp session for {} evicted", key);
        });

        Some(pc)
    }
}

/// Block on a control connection until the peer closes it.
///
/// Incoming bytes carry no meaning on the control channel and are
/// discarded; EOF or an error ends the hold.
async fn hold_control(mut stream: TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => return,
            Ok(_) => continue,
            Err(e) => {
                debug!("control connection read error: {}", e);
                return;
            }
        }
    }
}

#[async_trait]
impl Dialer for Socks5 {
    /// Open `addr` through the proxy with a CONNECT exchange; the
    /// returned stream is tunneled to the target.
    async fn dial(&self, network: &str, addr: &str) -> Result<TcpStream> {
        match network {
            "tcp" | "tcp4" | "tcp6" => {}
            other => return Err(Socks5Error::UnsupportedNetwork(other.to_string()).into()),
        }

        let mut stream = self
            .forwarder
            .c_dialer()
            .dial(network, self.addr())
            .await
            .with_context(|| format!("failed to dial SOCKS5 proxy at {}", self.addr()))?;
        let _ = set_keepalive(&stream);

        client::connect(&mut stream, addr, self.credentials.as_ref(), self.addr()).await?;

        Ok(stream)
    }

    /// Set up a UDP association through the proxy.
    ///
    /// Returns a header-framing packet conn bound to the association's
    /// TCP control connection, plus the relay endpoint writes go to.
    /// Closing the conn closes the control connection and ends the
    /// association.
    async fn dial_udp(
        &self,
        network: &str,
        addr: &str,
    ) -> Result<(Arc<dyn PacketConn>, SocketAddr)> {
        let tgt =
            Address::parse(addr).ok_or_else(|| Socks5Error::InvalidAddress(addr.to_string()))?;

        let mut ctrl = self
            .forwarder
            .c_dialer()
            .dial("tcp", self.addr())
            .await
            .with_context(|| format!("failed to dial SOCKS5 proxy at {}", self.addr()))?;
        let _ = set_keepalive(&ctrl);

        let bnd = client::associate(&mut ctrl, addr, self.credentials.as_ref(), self.addr()).await?;

        let (upstream, next_hop) = self
            .forwarder
            .c_dialer()
            .dial_udp(network, &bnd.to_string())
            .await
            .with_context(|| format!("failed to open datagram socket toward {}", bnd))?;

        let conn = Arc::new(UdpPacketConn::new(
            upstream,
            Some(next_hop),
            Some(tgt),
            true,
            Some(ctrl),
        ));

        Ok((conn, next_hop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::DirectDialer;

    fn direct() -> Arc<dyn Dialer> {
        Arc::new(DirectDialer)
    }

    #[test]
    fn test_new_without_credentials() {
        let proxy = Socks5::new("127.0.0.1:1080", None, None, direct(), direct());
        assert_eq!(proxy.addr(), "127.0.0.1:1080");
        assert!(proxy.credentials.is_none());
        assert_eq!(proxy.udp_idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_new_with_credentials() {
        let proxy = Socks5::new(
            "127.0.0.1:1080",
            Some("user".to_string()),
            Some("pass".to_string()),
            direct(),
            direct(),
        );
        assert_eq!(
            proxy.credentials,
            Some(Credentials {
                username: "user".to_string(),
                password: "pass".to_string(),
            })
        );
    }

    #[test]
    fn test_password_without_username_means_no_auth() {
        let proxy = Socks5::new(
            "127.0.0.1:1080",
            None,
            Some("pass".to_string()),
            direct(),
            direct(),
        );
        assert!(proxy.credentials.is_none());
    }

    #[test]
    fn test_with_udp_timeout() {
        let proxy = Socks5::new("127.0.0.1:1080", None, None, direct(), direct())
            .with_udp_timeout(Duration::from_millis(250));
        assert_eq!(proxy.udp_idle_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_dial_rejects_unknown_network() {
        let proxy = Socks5::new("127.0.0.1:1080", None, None, direct(), direct());
        let err = proxy.dial("udp", "example.com:80").await.unwrap_err();
        assert!(err.to_string().contains("no support for connection type"));
    }

    #[tokio::test]
    async fn test_dial_udp_rejects_bad_target() {
        let proxy = Socks5::new("127.0.0.1:1080", None, None, direct(), direct());
        let err = proxy.dial_udp("udp", "not-an-address").await.unwrap_err();
        assert!(err.to_string().contains("invalid address"));
    }
}
