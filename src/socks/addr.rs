//! SOCKS5 address codec
//!
//! Implements the RFC 1928 section 5 address form `ATYP | ADDR | PORT`
//! for IPv4, IPv6, and domain names. The codec is the single place in
//! the crate that understands the variable-length wire encoding; both
//! the handshake engine and the UDP header framing build on it.

use crate::error::Socks5Error;
use crate::socks::consts::*;
use anyhow::Result;
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Strip the non-standard UoT flag from an ATYP byte before classifying.
pub fn atyp(b: u8) -> u8 {
    b & !UOT_FLAG
}

/// Test whether the ATYP byte carries the UoT (UDP over TCP) flag.
///
/// The flag belongs to a separate tunneling layer; the codec masks it
/// out when classifying and never interprets it.
pub fn is_uot(b: u8) -> bool {
    b & UOT_FLAG == UOT_FLAG
}

/// A SOCKS5 destination address
///
/// Either an IP socket address or a domain name with a port. The wire
/// form is self-delimited by its leading ATYP byte; decoding consumes
/// exactly 7 (IPv4), 19 (IPv6), or `4 + len` (domain) bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port, forwarded opaquely (no resolution here)
    Domain(String, u16),
}

impl Address {
    /// Parse a `host:port` string.
    ///
    /// IP literals produce the matching v4/v6 form, collapsing
    /// IPv4-mapped IPv6 literals to v4. Anything else becomes a domain
    /// form when the host fits in 255 bytes. Returns `None` on any
    /// violation: missing port, port out of range, oversized host.
    pub fn parse(s: &str) -> Option<Address> {
        if let Ok(sa) = s.parse::<SocketAddr>() {
            return Some(Address::Ip(prefer_ipv4(sa)));
        }

        let (host, port) = s.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        if host.is_empty() || host.len() > MAX_DOMAIN_LEN || host.contains([':', '[', ']']) {
            return None;
        }

        Some(Address::Domain(host.to_string(), port))
    }

    /// Read one address from an async stream.
    ///
    /// Reads exactly the number of bytes dictated by the leading ATYP
    /// byte and no more, so the stream stays positioned at the next
    /// protocol field. Unknown address types fail with
    /// [`Socks5Error::AddressTypeNotSupported`].
    pub async fn read_from<R>(r: &mut R) -> Result<Address>
    where
        R: AsyncRead + Unpin,
    {
        let mut kind = [0u8; 1];
        r.read_exact(&mut kind).await?;

        match atyp(kind[0]) {
            SOCKS5_ATYP_IPV4 => {
                let mut buf = [0u8; 6];
                r.read_exact(&mut buf).await?;
                let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok(Address::Ip(SocketAddr::new(IpAddr::V4(ip), port)))
            }
            SOCKS5_ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                r.read_exact(&mut len).await?;
                let len = len[0] as usize;

                let mut buf = vec![0u8; len + 2];
                r.read_exact(&mut buf).await?;
                let domain = String::from_utf8(buf[..len].to_vec())
                    .map_err(|_| Socks5Error::InvalidAddress("non-UTF-8 domain".to_string()))?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                Ok(Address::Domain(domain, port))
            }
            SOCKS5_ATYP_IPV6 => {
                let mut buf = [0u8; 18];
                r.read_exact(&mut buf).await?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok(Address::Ip(SocketAddr::new(
                    IpAddr::V6(Ipv6Addr::from(octets)),
                    port,
                )))
            }
            other => Err(Socks5Error::AddressTypeNotSupported(other).into()),
        }
    }

    /// Decode one address from the head of a byte slice.
    ///
    /// Returns the address and the number of bytes it occupied, or
    /// `None` on truncation or an unknown ATYP. Never panics; trailing
    /// bytes beyond the frame are ignored.
    pub fn split(b: &[u8]) -> Option<(Address, usize)> {
        let kind = *b.first()?;

        match atyp(kind) {
            SOCKS5_ATYP_IPV4 => {
                if b.len() < 7 {
                    return None;
                }
                let ip = Ipv4Addr::new(b[1], b[2], b[3], b[4]);
                let port = u16::from_be_bytes([b[5], b[6]]);
                Some((Address::Ip(SocketAddr::new(IpAddr::V4(ip), port)), 7))
            }
            SOCKS5_ATYP_DOMAIN => {
                let len = *b.get(1)? as usize;
                let total = 1 + 1 + len + 2;
                if b.len() < total {
                    return None;
                }
                let domain = std::str::from_utf8(&b[2..2 + len]).ok()?.to_string();
                let port = u16::from_be_bytes([b[2 + len], b[3 + len]]);
                Some((Address::Domain(domain, port), total))
            }
            SOCKS5_ATYP_IPV6 => {
                if b.len() < 19 {
                    return None;
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&b[1..17]);
                let port = u16::from_be_bytes([b[17], b[18]]);
                Some((
                    Address::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)),
                    19,
                ))
            }
            _ => None,
        }
    }

    /// Append the wire encoding to a buffer.
    pub fn write_bytes(&self, buf: &mut BytesMut) {
        match self {
            Address::Ip(SocketAddr::V4(sa)) => {
                buf.put_u8(SOCKS5_ATYP_IPV4);
                buf.put_slice(&sa.ip().octets());
                buf.put_u16(sa.port());
            }
            Address::Ip(SocketAddr::V6(sa)) => {
                buf.put_u8(SOCKS5_ATYP_IPV6);
                buf.put_slice(&sa.ip().octets());
                buf.put_u16(sa.port());
            }
            Address::Domain(domain, port) => {
                buf.put_u8(SOCKS5_ATYP_DOMAIN);
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
            }
        }
    }

    /// Serialize to the wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.write_bytes(&mut buf);
        buf.to_vec()
    }

    /// Wire length of the encoding.
    pub fn serialized_len(&self) -> usize {
        match self {
            Address::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            Address::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            Address::Domain(domain, _) => 1 + 1 + domain.len() + 2,
        }
    }

    /// The port number.
    pub fn port(&self) -> u16 {
        match self {
            Address::Ip(sa) => sa.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// The ATYP byte the encoding starts with.
    pub fn addr_type(&self) -> u8 {
        match self {
            Address::Ip(SocketAddr::V4(_)) => SOCKS5_ATYP_IPV4,
            Address::Ip(SocketAddr::V6(_)) => SOCKS5_ATYP_IPV6,
            Address::Domain(_, _) => SOCKS5_ATYP_DOMAIN,
        }
    }
}

/// Collapse IPv4-mapped IPv6 socket addresses to their v4 form.
fn prefer_ipv4(sa: SocketAddr) -> SocketAddr {
    if let SocketAddr::V6(v6) = sa {
        if let Some(v4) = v6.ip().to_ipv4_mapped() {
            return SocketAddr::new(IpAddr::V4(v4), v6.port());
        }
    }
    sa
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(sa) => write!(f, "{}", sa),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(sa: SocketAddr) -> Self {
        Address::Ip(sa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_ipv4() {
        let addr = Address::parse("127.0.0.1:80").unwrap();
        assert_eq!(addr, Address::Ip("127.0.0.1:80".parse().unwrap()));
        assert_eq!(addr.addr_type(), SOCKS5_ATYP_IPV4);
        assert_eq!(addr.to_bytes(), vec![1, 127, 0, 0, 1, 0, 80]);
    }

    #[test]
    fn test_parse_ipv6() {
        let addr = Address::parse("[::1]:443").unwrap();
        assert_eq!(addr.addr_type(), SOCKS5_ATYP_IPV6);
        assert_eq!(addr.serialized_len(), 19);
    }

    #[test]
    fn test_parse_prefers_ipv4_for_mapped_literal() {
        let addr = Address::parse("[::ffff:192.0.2.1]:80").unwrap();
        assert_eq!(addr.addr_type(), SOCKS5_ATYP_IPV4);
        assert_eq!(addr.to_bytes()[0], SOCKS5_ATYP_IPV4);
    }

    #[test]
    fn test_parse_domain() {
        let addr = Address::parse("example.com:443").unwrap();
        assert_eq!(addr, Address::Domain("example.com".to_string(), 443));

        let bytes = addr.to_bytes();
        assert_eq!(bytes[0], SOCKS5_ATYP_DOMAIN);
        assert_eq!(bytes[1], 11);
        assert_eq!(&bytes[2..13], b"example.com");
        assert_eq!(&bytes[13..15], &443u16.to_be_bytes());
    }

    #[test]
    fn test_parse_rejects_oversized_domain() {
        let host = "a".repeat(256);
        assert!(Address::parse(&format!("{}:80", host)).is_none());

        let host = "a".repeat(255);
        assert!(Address::parse(&format!("{}:80", host)).is_some());
    }

    #[test]
    fn test_parse_rejects_bad_ports() {
        assert!(Address::parse("example.com").is_none());
        assert!(Address::parse("example.com:").is_none());
        assert!(Address::parse("example.com:65536").is_none());
        assert!(Address::parse("example.com:-1").is_none());
    }

    #[test]
    fn test_parse_rejects_empty_host() {
        assert!(Address::parse(":80").is_none());
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["127.0.0.1:80", "[::1]:443", "example.com:8080"] {
            let addr = Address::parse(s).unwrap();
            assert_eq!(addr.to_string(), s);
            // Idempotent under reparse
            let again = Address::parse(&addr.to_string()).unwrap();
            assert_eq!(again.to_string(), addr.to_string());
        }
    }

    #[test]
    fn test_split_is_self_delimiting() {
        for s in ["10.0.0.1:53", "[2001:db8::1]:853", "test.example:9999"] {
            let addr = Address::parse(s).unwrap();
            let mut wire = addr.to_bytes();
            let wire_len = wire.len();
            wire.extend_from_slice(b"trailing payload bytes");

            let (decoded, consumed) = Address::split(&wire).unwrap();
            assert_eq!(decoded, addr);
            assert_eq!(consumed, wire_len);
        }
    }

    #[test]
    fn test_split_truncation_returns_none() {
        let addr = Address::parse("example.com:80").unwrap();
        let wire = addr.to_bytes();

        for cut in 0..wire.len() {
            assert!(Address::split(&wire[..cut]).is_none(), "cut at {}", cut);
        }
        assert!(Address::split(&[]).is_none());
    }

    #[test]
    fn test_split_unknown_atyp_returns_none() {
        assert!(Address::split(&[0x02, 0, 0, 0, 0, 0, 0]).is_none());
        assert!(Address::split(&[0x7F, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_split_masks_uot_flag() {
        let addr = Address::parse("127.0.0.1:80").unwrap();
        let mut wire = addr.to_bytes();
        wire[0] |= UOT_FLAG;

        assert!(is_uot(wire[0]));
        let (decoded, consumed) = Address::split(&wire).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_atyp_masking() {
        assert_eq!(atyp(SOCKS5_ATYP_IPV4 | UOT_FLAG), SOCKS5_ATYP_IPV4);
        assert_eq!(atyp(SOCKS5_ATYP_DOMAIN | UOT_FLAG), SOCKS5_ATYP_DOMAIN);
        assert!(!is_uot(SOCKS5_ATYP_IPV6));
        assert!(is_uot(SOCKS5_ATYP_IPV6 | UOT_FLAG));
    }

    #[tokio::test]
    async fn test_read_from_ipv4() {
        let mut cursor = Cursor::new(vec![1, 127, 0, 0, 1, 0, 80, 0xAA, 0xBB]);
        let addr = Address::read_from(&mut cursor).await.unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:80");
        // Exactly 7 bytes consumed, trailing bytes untouched
        assert_eq!(cursor.position(), 7);
    }

    #[tokio::test]
    async fn test_read_from_domain() {
        let mut wire = vec![3, 11];
        wire.extend_from_slice(b"example.com");
        wire.extend_from_slice(&443u16.to_be_bytes());
        wire.push(0xFF);

        let mut cursor = Cursor::new(wire);
        let addr = Address::read_from(&mut cursor).await.unwrap();
        assert_eq!(addr, Address::Domain("example.com".to_string(), 443));
        assert_eq!(cursor.position(), 15);
    }

    #[tokio::test]
    async fn test_read_from_ipv6() {
        let mut wire = vec![4];
        wire.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        wire.extend_from_slice(&53u16.to_be_bytes());

        let mut cursor = Cursor::new(wire);
        let addr = Address::read_from(&mut cursor).await.unwrap();
        assert_eq!(addr.to_string(), "[::1]:53");
    }

    #[tokio::test]
    async fn test_read_from_unknown_atyp() {
        let mut cursor = Cursor::new(vec![0x05, 0, 0]);
        let err = Address::read_from(&mut cursor).await.unwrap_err();
        assert!(err.to_string().contains("address type not supported"));
    }

    #[tokio::test]
    async fn test_read_from_truncated_stream() {
        let mut cursor = Cursor::new(vec![1, 127, 0]);
        assert!(Address::read_from(&mut cursor).await.is_err());
    }

    #[test]
    fn test_split_of_parse_equals_parse() {
        for s in ["127.0.0.1:80", "[::1]:443", "example.com:8080"] {
            let addr = Address::parse(s).unwrap();
            let (split, consumed) = Address::split(&addr.to_bytes()).unwrap();
            assert_eq!(split, addr);
            assert_eq!(consumed, addr.serialized_len());
        }
    }
}
