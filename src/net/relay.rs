//! Byte pumps shared by the service loops
//!
//! A bidirectional stream copy for TCP sessions and an idle-bounded
//! one-way packet copy that drives UDP NAT eviction.

use crate::net::dialer::PacketConn;
use crate::socks::consts::UDP_BUF_SIZE;
use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Bidirectional copy between two streams.
///
/// Returns the byte counts per direction once either side closes or
/// errors. Callers decide which errors matter; I/O timeouts are
/// typically swallowed.
pub async fn relay<A, B>(a: &mut A, b: &mut B) -> std::io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    tokio::io::copy_bidirectional(a, b).await
}

/// Copy datagrams from `src` to `dst`, writing to `dst_addr`, until
/// `idle` elapses with no traffic.
///
/// Idle expiry is the normal exit and returns `Ok(())`; receive or send
/// failures propagate. The caller owns cleanup of both connections.
pub async fn timed_copy(
    dst: &dyn PacketConn,
    dst_addr: SocketAddr,
    src: &dyn PacketConn,
    idle: Duration,
) -> Result<()> {
    let mut buf = vec![0u8; UDP_BUF_SIZE];

    loop {
        match tokio::time::timeout(idle, src.recv_from(&mut buf)).await {
            Err(_) => return Ok(()),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok((n, _))) => {
                dst.send_to(&buf[..n], dst_addr).await?;
            }
        }
    }
}
