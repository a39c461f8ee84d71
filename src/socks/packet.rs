//! SOCKS5 UDP packet connection
//!
//! Wraps a datagram endpoint with the RFC 1928 section 7 header:
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```
//!
//! The header is stripped on receive and prepended on send. A wrapper
//! may be bound to a TCP control connection; the association lives only
//! as long as that connection does.

use crate::net::PacketConn;
use crate::socks::addr::Address;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A datagram endpoint speaking the SOCKS5 UDP encapsulation.
///
/// With `tgt_header` enabled, `send_to` prepends `00 00 00 | tgt_addr`
/// and routes to the stored write address, and `recv_from` strips the
/// header, recording the peer and the header target on first receive
/// when they were not fixed at construction. Without it the wrapper is
/// a transparent passthrough used for the upstream-facing side of a
/// relay. Later datagrams never overwrite recorded addresses
/// (first-write-wins, matching the accept loop's fresh-wrapper-per-flow
/// discipline).
pub struct UdpPacketConn {
    inner: Arc<dyn PacketConn>,
    write_addr: Mutex<Option<SocketAddr>>,
    tgt_addr: Mutex<Option<Address>>,
    tgt_header: bool,
    ctrl: Option<ControlHandle>,
    closed: AtomicBool,
}

impl std::fmt::Debug for UdpPacketConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpPacketConn")
            .field("inner", &self.inner)
            .field("write_addr", &self.write_addr)
            .field("tgt_addr", &self.tgt_addr)
            .field("tgt_header", &self.tgt_header)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Handle to the watcher task owning a TCP control connection.
struct ControlHandle {
    shutdown: Arc<Notify>,
}

impl UdpPacketConn {
    /// Wrap a datagram endpoint.
    ///
    /// `write_addr` is where sends go, `tgt_addr` the target recorded
    /// in outgoing headers; both may start unset and be learned from
    /// the first received datagram. `ctrl_conn`, when given, is held by
    /// a watcher task whose termination marks the end of the session.
    pub fn new(
        inner: Arc<dyn PacketConn>,
        write_addr: Option<SocketAddr>,
        tgt_addr: Option<Address>,
        tgt_header: bool,
        ctrl_conn: Option<TcpStream>,
    ) -> Self {
        let ctrl = ctrl_conn.map(|stream| {
            let shutdown = Arc::new(Notify::new());
            tokio::spawn(watch_control(stream, shutdown.clone()));
            ControlHandle { shutdown }
        });

        UdpPacketConn {
            inner,
            write_addr: Mutex::new(write_addr),
            tgt_addr: Mutex::new(tgt_addr),
            tgt_header,
            ctrl,
            closed: AtomicBool::new(false),
        }
    }

    /// The address sends are routed to, once known.
    pub fn write_addr(&self) -> Option<SocketAddr> {
        *self.write_addr.lock().expect("write_addr lock")
    }

    /// The target recorded in the SOCKS5 UDP header, once known.
    pub fn target_addr(&self) -> Option<Address> {
        self.tgt_addr.lock().expect("tgt_addr lock").clone()
    }
}

/// Hold the control connection open and watch it for closure.
///
/// Data on the control channel carries no meaning for the data plane;
/// EOF, an error, or an explicit shutdown ends the watch, and dropping
/// the stream closes the connection.
async fn watch_control(mut stream: TcpStream, shutdown: Arc<Notify>) {
    let mut buf = [0u8; 64];
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("udp associate control connection released");
                return;
            }
            res = stream.read(&mut buf) => match res {
                Ok(0) => {
                    debug!("udp associate ended: control connection closed");
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!("udp associate ended: control connection error: {}", e);
                    return;
                }
            },
        }
    }
}

#[async_trait]
impl PacketConn for UdpPacketConn {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if !self.tgt_header {
            return self.inner.recv_from(buf).await;
        }

        let mut scratch = vec![0u8; buf.len()];
        loop {
            let (n, raddr) = self.inner.recv_from(&mut scratch).await?;

            if n < 4 {
                warn!("dropping runt SOCKS5 datagram ({} bytes) from {}", n, raddr);
                continue;
            }
            if scratch[2] != 0 {
                warn!("dropping fragmented SOCKS5 datagram from {}", raddr);
                continue;
            }
            let Some((addr, addr_len)) = Address::split(&scratch[3..n]) else {
                warn!("dropping SOCKS5 datagram with bad address from {}", raddr);
                continue;
            };

            let payload = &scratch[3 + addr_len..n];
            buf[..payload.len()].copy_from_slice(payload);

            {
                let mut write_addr = self.write_addr.lock().expect("write_addr lock");
                if write_addr.is_none() {
                    *write_addr = Some(raddr);
                }
            }
            {
                let mut tgt_addr = self.tgt_addr.lock().expect("tgt_addr lock");
                if tgt_addr.is_none() {
                    *tgt_addr = Some(addr);
                }
            }

            return Ok((payload.len(), raddr));
        }
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if !self.tgt_header {
            return self.inner.send_to(buf, addr).await;
        }

        // The wrapper owns routing; `addr` is intentionally ignored.
        let tgt = self
            .target_addr()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no target address"))?;
        let write_addr = self
            .write_addr()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no write address"))?;

        let mut frame = BytesMut::with_capacity(3 + tgt.serialized_len() + buf.len());
        frame.put_slice(&[0, 0, 0]);
        tgt.write_bytes(&mut frame);
        frame.put_slice(buf);

        self.inner.send_to(&frame, write_addr).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(ctrl) = &self.ctrl {
            ctrl.shutdown.notify_one();
        }
        self.inner.close().await
    }
}

impl Drop for UdpPacketConn {
    fn drop(&mut self) {
        if let Some(ctrl) = &self.ctrl {
            ctrl.shutdown.notify_one();
        }
    }
}
