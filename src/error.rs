//! Error types for sockslink
//!
//! Typed SOCKS5 protocol errors and the RFC 1928 reply-code table.

use std::fmt;
use std::io;
use thiserror::Error;

/// SOCKS5 protocol errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Unsupported SOCKS version
    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Empty method list in the greeting
    #[error("no authentication methods provided")]
    NoMethods,

    /// The proxy demands authentication we cannot provide (method 0xFF)
    #[error("proxy requires authentication")]
    AuthRequired,

    /// The proxy proposed a method we do not implement
    #[error("unsupported authentication method: {0}")]
    UnsupportedMethod(u8),

    /// RFC 1929 sub-negotiation failed
    #[error("proxy rejected username/password")]
    CredentialsRejected,

    /// Command byte outside CONNECT/UDP ASSOCIATE
    #[error("command not supported: {0}")]
    CommandNotSupported(u8),

    /// Unknown ATYP byte in an address
    #[error("address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Address failed to parse or did not fit the wire form
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Destination hostname exceeds the 255-byte wire limit
    #[error("destination hostname too long: {0}")]
    HostnameTooLong(String),

    /// The proxy answered a non-zero REP code
    #[error("proxy failed to connect: {0}")]
    Reply(ReplyCode),

    /// The proxy answered a REP byte outside the known table
    #[error("proxy failed to connect: unknown reply {0}")]
    UnknownReply(u8),

    /// Network name outside tcp/tcp4/tcp6
    #[error("no support for connection type {0}")]
    UnsupportedNetwork(String),
}

/// Reply codes for the SOCKS5 REP byte, RFC 1928 section 6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionForbidden = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl ReplyCode {
    /// Message text for the code, matching the classic table.
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyCode::Succeeded => "succeeded",
            ReplyCode::GeneralFailure => "general failure",
            ReplyCode::ConnectionForbidden => "connection forbidden",
            ReplyCode::NetworkUnreachable => "network unreachable",
            ReplyCode::HostUnreachable => "host unreachable",
            ReplyCode::ConnectionRefused => "connection refused",
            ReplyCode::TtlExpired => "TTL expired",
            ReplyCode::CommandNotSupported => "command not supported",
            ReplyCode::AddressTypeNotSupported => "address type not supported",
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ReplyCode {
    type Error = Socks5Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ReplyCode::Succeeded),
            0x01 => Ok(ReplyCode::GeneralFailure),
            0x02 => Ok(ReplyCode::ConnectionForbidden),
            0x03 => Ok(ReplyCode::NetworkUnreachable),
            0x04 => Ok(ReplyCode::HostUnreachable),
            0x05 => Ok(ReplyCode::ConnectionRefused),
            0x06 => Ok(ReplyCode::TtlExpired),
            0x07 => Ok(ReplyCode::CommandNotSupported),
            0x08 => Ok(ReplyCode::AddressTypeNotSupported),
            other => Err(Socks5Error::UnknownReply(other)),
        }
    }
}

impl From<&io::Error> for ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut => ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => ReplyCode::HostUnreachable,
            io::ErrorKind::PermissionDenied => ReplyCode::ConnectionForbidden,
            _ => ReplyCode::GeneralFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_code_round_trip() {
        for byte in 0u8..=8 {
            let code = ReplyCode::try_from(byte).unwrap();
            assert_eq!(u8::from(code), byte);
        }
    }

    #[test]
    fn test_reply_code_unknown_bytes() {
        assert!(matches!(
            ReplyCode::try_from(0x09),
            Err(Socks5Error::UnknownReply(0x09))
        ));
        assert!(matches!(
            ReplyCode::try_from(0xFF),
            Err(Socks5Error::UnknownReply(0xFF))
        ));
    }

    #[test]
    fn test_reply_code_messages() {
        assert_eq!(ReplyCode::GeneralFailure.to_string(), "general failure");
        assert_eq!(ReplyCode::ConnectionRefused.to_string(), "connection refused");
        assert_eq!(ReplyCode::TtlExpired.to_string(), "TTL expired");
        assert_eq!(
            ReplyCode::AddressTypeNotSupported.to_string(),
            "address type not supported"
        );
    }

    #[test]
    fn test_reply_code_from_io_error() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(ReplyCode::from(&err), ReplyCode::ConnectionRefused);

        let err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        assert_eq!(ReplyCode::from(&err), ReplyCode::HostUnreachable);

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(ReplyCode::from(&err), ReplyCode::ConnectionForbidden);

        let err = io::Error::new(io::ErrorKind::Other, "other");
        assert_eq!(ReplyCode::from(&err), ReplyCode::GeneralFailure);
    }

    #[test]
    fn test_socks5_error_display() {
        let err = Socks5Error::UnsupportedVersion(4);
        assert_eq!(err.to_string(), "unsupported SOCKS version: 4");

        let err = Socks5Error::AuthRequired;
        assert_eq!(err.to_string(), "proxy requires authentication");

        let err = Socks5Error::CredentialsRejected;
        assert_eq!(err.to_string(), "proxy rejected username/password");

        let err = Socks5Error::Reply(ReplyCode::HostUnreachable);
        assert_eq!(err.to_string(), "proxy failed to connect: host unreachable");

        let err = Socks5Error::UnknownReply(42);
        assert_eq!(err.to_string(), "proxy failed to connect: unknown reply 42");

        let err = Socks5Error::UnsupportedNetwork("unix".to_string());
        assert_eq!(err.to_string(), "no support for connection type unix");
    }
}
