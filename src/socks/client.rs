//! Client-role SOCKS5 exchanges
//!
//! Speaks the protocol to a remote SOCKS5 proxy over an already-open
//! TCP connection: greeting, optional RFC 1929 username/password
//! sub-negotiation, and the CONNECT / UDP ASSOCIATE request-reply pair.

use crate::error::{ReplyCode, Socks5Error};
use crate::socks::addr::{atyp, Address};
use crate::socks::consts::*;
use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Username/password credentials for the upstream proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username, 1 to 255 bytes
    pub username: String,
    /// Password, up to 255 bytes
    pub password: String,
}

impl Credentials {
    /// Whether the credentials fit the RFC 1929 wire limits.
    fn usable(&self) -> bool {
        !self.username.is_empty()
            && self.username.len() <= MAX_DOMAIN_LEN
            && self.password.len() <= MAX_DOMAIN_LEN
    }
}

/// Command the proxy to extend the connection to `target` (CONNECT).
///
/// `target` must be a canonical `host:port`. On success the stream is
/// tunneled to the target and handed back to the caller untouched.
pub async fn connect<S>(
    stream: &mut S,
    target: &str,
    credentials: Option<&Credentials>,
    proxy_addr: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate(stream, credentials, proxy_addr).await?;
    send_request(stream, SOCKS5_CMD_CONNECT, target)
        .await
        .with_context(|| {
            format!(
                "failed to write connect request to SOCKS5 proxy at {}",
                proxy_addr
            )
        })?;

    // VER REP RSV ATYP
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.with_context(|| {
        format!(
            "failed to read connect reply from SOCKS5 proxy at {}",
            proxy_addr
        )
    })?;
    if head[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(head[0]).into());
    }
    check_reply(head[1], proxy_addr)?;

    // Discard the bind address; the length depends on its type.
    let to_discard = match atyp(head[3]) {
        SOCKS5_ATYP_IPV4 => 4,
        SOCKS5_ATYP_IPV6 => 16,
        SOCKS5_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.with_context(|| {
                format!(
                    "failed to read domain length from SOCKS5 proxy at {}",
                    proxy_addr
                )
            })?;
            len[0] as usize
        }
        other => return Err(Socks5Error::AddressTypeNotSupported(other).into()),
    };

    let mut discard = vec![0u8; to_discard + 2]; // address plus port
    stream.read_exact(&mut discard).await.with_context(|| {
        format!(
            "failed to read bind address from SOCKS5 proxy at {}",
            proxy_addr
        )
    })?;

    Ok(())
}

/// Request a UDP association (UDP ASSOCIATE), returning the BND address
/// the proxy expects datagrams on.
///
/// The stream becomes the association's control channel; the session
/// lives until it closes.
pub async fn associate<S>(
    stream: &mut S,
    target: &str,
    credentials: Option<&Credentials>,
    proxy_addr: &str,
) -> Result<Address>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate(stream, credentials, proxy_addr).await?;
    send_request(stream, SOCKS5_CMD_UDP_ASSOCIATE, target)
        .await
        .with_context(|| {
            format!(
                "failed to write associate request to SOCKS5 proxy at {}",
                proxy_addr
            )
        })?;

    // VER REP RSV, then the BND address
    let mut head = [0u8; 3];
    stream.read_exact(&mut head).await.with_context(|| {
        format!(
            "failed to read associate reply from SOCKS5 proxy at {}",
            proxy_addr
        )
    })?;
    if head[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(head[0]).into());
    }
    check_reply(head[1], proxy_addr)?;

    Address::read_from(stream).await.with_context(|| {
        format!(
            "failed to read bind address from SOCKS5 proxy at {}",
            proxy_addr
        )
    })
}

/// Greeting and optional username/password sub-negotiation.
async fn negotiate<S>(
    stream: &mut S,
    credentials: Option<&Credentials>,
    proxy_addr: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let offer_password = credentials.map(Credentials::usable).unwrap_or(false);

    let greeting: &[u8] = if offer_password {
        &[
            SOCKS5_VERSION,
            2,
            SOCKS5_AUTH_METHOD_NONE,
            SOCKS5_AUTH_METHOD_PASSWORD,
        ]
    } else {
        &[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    };
    stream
        .write_all(greeting)
        .await
        .with_context(|| format!("failed to write greeting to SOCKS5 proxy at {}", proxy_addr))?;
    stream.flush().await?;

    let mut reply = [0u8; 2];
    stream
        .read_exact(&mut reply)
        .await
        .with_context(|| format!("failed to read greeting from SOCKS5 proxy at {}", proxy_addr))?;
    if reply[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(reply[0]).into());
    }

    match reply[1] {
        SOCKS5_AUTH_METHOD_NONE => Ok(()),
        SOCKS5_AUTH_METHOD_PASSWORD if offer_password => {
            // Credentials were validated by usable() above
            let creds = credentials.expect("offered password auth without credentials");
            authenticate(stream, creds, proxy_addr).await
        }
        SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE => Err(Socks5Error::AuthRequired)
            .with_context(|| format!("SOCKS5 proxy at {}", proxy_addr)),
        other => Err(Socks5Error::UnsupportedMethod(other).into()),
    }
}

/// RFC 1929 username/password sub-negotiation.
async fn authenticate<S>(stream: &mut S, creds: &Credentials, proxy_addr: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut req = BytesMut::with_capacity(3 + creds.username.len() + creds.password.len());
    req.put_u8(SOCKS5_AUTH_VERSION);
    req.put_u8(creds.username.len() as u8);
    req.put_slice(creds.username.as_bytes());
    req.put_u8(creds.password.len() as u8);
    req.put_slice(creds.password.as_bytes());

    stream.write_all(&req).await.with_context(|| {
        format!(
            "failed to write authentication request to SOCKS5 proxy at {}",
            proxy_addr
        )
    })?;
    stream.flush().await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.with_context(|| {
        format!(
            "failed to read authentication reply from SOCKS5 proxy at {}",
            proxy_addr
        )
    })?;

    if reply[1] != 0 {
        return Err(Socks5Error::CredentialsRejected)
            .with_context(|| format!("SOCKS5 proxy at {}", proxy_addr));
    }

    Ok(())
}

/// Write `VER CMD RSV` followed by the encoded target address.
async fn send_request<S>(stream: &mut S, cmd: u8, target: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let addr = Address::parse(target).ok_or_else(|| match target.rsplit_once(':') {
        Some((host, _)) if host.len() > MAX_DOMAIN_LEN => {
            Socks5Error::HostnameTooLong(host.to_string())
        }
        _ => Socks5Error::InvalidAddress(target.to_string()),
    })?;

    let mut req = BytesMut::with_capacity(3 + addr.serialized_len());
    req.put_u8(SOCKS5_VERSION);
    req.put_u8(cmd);
    req.put_u8(SOCKS5_RESERVED);
    addr.write_bytes(&mut req);

    stream.write_all(&req).await?;
    stream.flush().await?;
    Ok(())
}

/// Map a REP byte: zero passes, the known table and unknown bytes fail.
fn check_reply(rep: u8, proxy_addr: &str) -> Result<()> {
    if rep == 0 {
        return Ok(());
    }
    let err = match ReplyCode::try_from(rep) {
        Ok(code) => Socks5Error::Reply(code),
        Err(unknown) => unknown,
    };
    Err(err).with_context(|| format!("SOCKS5 proxy at {}", proxy_addr))
}
