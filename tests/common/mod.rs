//! Test utilities for sockslink integration tests
//!
//! Live localhost servers (echo endpoints, proxies) and raw SOCKS5
//! byte builders shared across the integration suite.

use sockslink::net::{Dialer, DirectDialer};
use sockslink::socks::Socks5;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;

/// Reserve a localhost address with a port that is free right now.
pub async fn free_port_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Start a TCP echo server, returning its address.
pub async fn start_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut read, mut write) = stream.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });

    addr
}

/// Start a UDP echo server that also reports each datagram's source
/// address on a channel.
pub async fn start_udp_echo() -> (SocketAddr, mpsc::UnboundedReceiver<SocketAddr>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut buf = [0u8; 65535];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let _ = tx.send(from);
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });

    (addr, rx)
}

/// Spawn a proxy serving directly (no upstream), returning its address.
pub async fn spawn_proxy() -> String {
    spawn_proxy_with(None, Duration::from_secs(120)).await
}

/// Spawn a proxy with an optional upstream dialer and UDP idle timeout.
pub async fn spawn_proxy_with(s_dialer: Option<Arc<dyn Dialer>>, udp_idle: Duration) -> String {
    let addr = free_port_addr().await;
    let direct: Arc<dyn Dialer> = Arc::new(DirectDialer);
    let s_dialer = s_dialer.unwrap_or_else(|| direct.clone());

    let proxy =
        Arc::new(Socks5::new(&addr, None, None, direct, s_dialer).with_udp_timeout(udp_idle));
    tokio::spawn(proxy.listen_and_serve());

    wait_until_listening(&addr).await;
    addr
}

/// A client-role proxy handle for dialing through `proxy_addr`.
pub fn upstream_client(proxy_addr: &str) -> Arc<Socks5> {
    let direct: Arc<dyn Dialer> = Arc::new(DirectDialer);
    Arc::new(Socks5::new(
        proxy_addr,
        None,
        None,
        direct.clone(),
        direct,
    ))
}

/// Poll until a TCP listener answers on `addr`.
pub async fn wait_until_listening(addr: &str) {
    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("proxy at {} never came up", addr);
}

/// Raw SOCKS5 byte builders for hand-driven exchanges.
pub mod socks5_bytes {
    /// No-auth greeting: VER NMETHODS METHODS
    pub fn greeting_no_auth() -> Vec<u8> {
        vec![0x05, 0x01, 0x00]
    }

    /// CONNECT request to an IPv4 address
    pub fn connect_ipv4(ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut req = vec![0x05, 0x01, 0x00, 0x01];
        req.extend_from_slice(&ip);
        req.extend_from_slice(&port.to_be_bytes());
        req
    }

    /// UDP ASSOCIATE request with an all-zero endpoint
    pub fn udp_associate_zero() -> Vec<u8> {
        vec![0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
    }

    /// SOCKS5 UDP datagram: zero RSV/FRAG, IPv4 target, payload
    pub fn udp_datagram_ipv4(ip: [u8; 4], port: u16, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0, 0, 0, 0x01];
        pkt.extend_from_slice(&ip);
        pkt.extend_from_slice(&port.to_be_bytes());
        pkt.extend_from_slice(payload);
        pkt
    }
}
