//! Error types and the SOCKS5 reply-code table

use std::fmt;

use crate::addr::Addr;

/// The one-byte `REP` field of a SOCKS5 reply, per RFC 1928 §6.
///
/// Code 0 is success; codes 1-8 are the standard failure table. There is no
/// code 9 on the wire — `HandshakeOutcome::UdpAssociate` below replaces the
/// "sentinel error" the reply-code space used to be overloaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Success = 0x00,
    GeneralFailure = 0x01,
    ConnectionForbidden = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl ReplyCode {
    /// Map a raw `REP` byte to a code, falling back to `GeneralFailure` for
    /// anything outside the standard table.
    pub fn from_u8(rep: u8) -> Self {
        match rep {
            0x00 => ReplyCode::Success,
            0x01 => ReplyCode::GeneralFailure,
            0x02 => ReplyCode::ConnectionForbidden,
            0x03 => ReplyCode::NetworkUnreachable,
            0x04 => ReplyCode::HostUnreachable,
            0x05 => ReplyCode::ConnectionRefused,
            0x06 => ReplyCode::TtlExpired,
            0x07 => ReplyCode::CommandNotSupported,
            0x08 => ReplyCode::AddressTypeNotSupported,
            _ => ReplyCode::GeneralFailure,
        }
    }

    /// Human-readable message, used only for diagnostics.
    pub fn message(self) -> &'static str {
        match self {
            ReplyCode::Success => "success",
            ReplyCode::GeneralFailure => "general SOCKS server failure",
            ReplyCode::ConnectionForbidden => "connection not allowed by ruleset",
            ReplyCode::NetworkUnreachable => "network unreachable",
            ReplyCode::HostUnreachable => "host unreachable",
            ReplyCode::ConnectionRefused => "connection refused",
            ReplyCode::TtlExpired => "TTL expired",
            ReplyCode::CommandNotSupported => "command not supported",
            ReplyCode::AddressTypeNotSupported => "address type not supported",
        }
    }
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> u8 {
        code as u8
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// What the server-role handshake decided to do with an inbound connection.
///
/// Replaces overloading the error channel with a "continue, this is a UDP
/// associate" sentinel: the continuation case is its own variant instead.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// `CMD = CONNECT`; relay to this target.
    Connect(Addr),
    /// `CMD = UDP_ASSOCIATE`; hold the control connection open.
    UdpAssociate,
}

/// Errors produced anywhere in the proxy engine.
#[derive(Debug, thiserror::Error)]
pub enum Socks5Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("no acceptable authentication method")]
    NoAcceptableAuthMethod,

    #[error("upstream proxy requires authentication")]
    AuthRequired,

    #[error("upstream proxy rejected username/password")]
    CredentialsRejected,

    #[error("command not supported: {0:#04x}")]
    CommandNotSupported(u8),

    #[error("address type not supported: {0:#04x}")]
    AddressTypeNotSupported(u8),

    #[error("malformed address: {0}")]
    MalformedAddress(&'static str),

    #[error("domain name too long ({0} bytes, max 255)")]
    DomainTooLong(usize),

    #[error("{stage} against {proxy}: {reply}")]
    UpstreamRejected {
        proxy: String,
        stage: &'static str,
        reply: ReplyCode,
    },
}

pub type Result<T> = std::result::Result<T, Socks5Error>;
