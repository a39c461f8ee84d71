//! Server-role SOCKS5 handshake
//!
//! Drives method negotiation and the request/reply exchange on an
//! inbound connection. The outcome is a tagged value: either a CONNECT
//! target to dial, or a UDP association whose TCP connection the caller
//! must keep open as the control channel.

use crate::error::{ReplyCode, Socks5Error};
use crate::socks::addr::Address;
use crate::socks::consts::*;
use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// What the client asked for, once the handshake succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// CONNECT: dial this target and relay.
    Connect(Address),
    /// UDP ASSOCIATE: the client's declared endpoint (often all-zero);
    /// the TCP connection is now the session's control channel and must
    /// stay open until the session ends.
    UdpAssociate(Address),
}

/// The all-zero IPv4 bind address used in CONNECT replies.
fn zero_bind() -> Address {
    Address::Ip(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
}

/// Write a `VER REP RSV ATYP BND.ADDR BND.PORT` reply.
async fn write_reply<S>(stream: &mut S, code: ReplyCode, bnd: &Address) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut reply = BytesMut::with_capacity(3 + bnd.serialized_len());
    reply.put_u8(SOCKS5_VERSION);
    reply.put_u8(code.into());
    reply.put_u8(SOCKS5_RESERVED);
    bnd.write_bytes(&mut reply);

    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}

/// Run the server-role handshake on an inbound connection.
///
/// Negotiates the no-authentication method, parses the request, and
/// answers it: CONNECT gets the zero IPv4 bind reply, UDP ASSOCIATE
/// gets `local_listen_addr` (the TCP listen address) as the bind
/// address. Unsupported commands and address types are answered with
/// the matching REP byte before the error is surfaced.
pub async fn handshake<S>(stream: &mut S, local_listen_addr: &str) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // VER NMETHODS, then the method list
    let mut head = [0u8; 2];
    stream
        .read_exact(&mut head)
        .await
        .context("failed to read greeting")?;
    if head[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(head[0]).into());
    }
    let nmethods = head[1] as usize;
    if nmethods == 0 {
        return Err(Socks5Error::NoMethods.into());
    }
    let mut methods = vec![0u8; nmethods];
    stream
        .read_exact(&mut methods)
        .await
        .context("failed to read method list")?;

    // The server role offers no authentication
    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE])
        .await?;
    stream.flush().await?;

    // VER CMD RSV, then the target address
    let mut req = [0u8; 3];
    stream
        .read_exact(&mut req)
        .await
        .context("failed to read request")?;
    if req[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(req[0]).into());
    }
    let cmd = req[1];

    let addr = match Address::read_from(stream).await {
        Ok(addr) => addr,
        Err(e) => {
            if let Some(Socks5Error::AddressTypeNotSupported(_)) = e.downcast_ref() {
                write_reply(stream, ReplyCode::AddressTypeNotSupported, &zero_bind()).await?;
            }
            return Err(e).context("failed to read request address");
        }
    };

    match cmd {
        SOCKS5_CMD_CONNECT => {
            write_reply(stream, ReplyCode::Succeeded, &zero_bind()).await?;
            Ok(HandshakeOutcome::Connect(addr))
        }
        SOCKS5_CMD_UDP_ASSOCIATE => {
            let bnd = Address::parse(local_listen_addr).ok_or_else(|| {
                Socks5Error::InvalidAddress(format!("bad listen address {}", local_listen_addr))
            })?;
            write_reply(stream, ReplyCode::Succeeded, &bnd).await?;
            Ok(HandshakeOutcome::UdpAssociate(addr))
        }
        other => {
            write_reply(stream, ReplyCode::CommandNotSupported, &zero_bind()).await?;
            Err(Socks5Error::CommandNotSupported(other).into())
        }
    }
}
