//! RFC 1928 §5 address encoding: `ATYP ‖ ADDR ‖ PORT`
//!
//! Pure byte-level codec, no I/O beyond the async read of a framed address
//! off a connection. Used symmetrically by both handshake roles and by the
//! SOCKS5 UDP header in `pktconn`.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, Socks5Error};

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// High bit of the ATYP byte: a non-standard "UDP over TCP" marker.
/// Preserved through encode/decode, never interpreted here.
const UOT_BIT: u8 = 0x08;

/// The maximum wire length of an Addr: `1 (ATYP) + 1 (len) + 255 (domain) + 2 (port)`.
pub const MAX_ADDR_LEN: usize = 1 + 1 + 255 + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AddrKind {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Domain(String),
}

/// A self-delimited SOCKS5 address: host (v4, v6, or domain) plus port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    kind: AddrKind,
    port: u16,
    uot: bool,
}

impl Addr {
    fn new(kind: AddrKind, port: u16) -> Self {
        Self { kind, port, uot: false }
    }

    /// An IPv4 zero address (`0.0.0.0:0`), used as the BND address for a
    /// CONNECT reply and for any reply sent before a real bind is known.
    pub fn zero_v4() -> Self {
        Self::new(AddrKind::V4(Ipv4Addr::UNSPECIFIED), 0)
    }

    /// The masked address type: 1 (IPv4), 3 (domain), or 4 (IPv6). The UoT
    /// bit is never part of this value.
    pub fn atyp(&self) -> u8 {
        match self.kind {
            AddrKind::V4(_) => ATYP_IPV4,
            AddrKind::Domain(_) => ATYP_DOMAIN,
            AddrKind::V6(_) => ATYP_IPV6,
        }
    }

    /// Whether the non-standard "UDP over TCP" bit was set on this address.
    pub fn uot(&self) -> bool {
        self.uot
    }

    /// Returns a copy with the UoT bit set. The bit is carried opaquely; it
    /// is never interpreted by this crate.
    pub fn with_uot(mut self, uot: bool) -> Self {
        self.uot = uot;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wire length of this address, including the leading ATYP byte.
    pub fn encoded_len(&self) -> usize {
        match &self.kind {
            AddrKind::V4(_) => 1 + 4 + 2,
            AddrKind::V6(_) => 1 + 16 + 2,
            AddrKind::Domain(d) => 1 + 1 + d.len() + 2,
        }
    }

    /// Append the wire form of this address to `out`.
    pub fn encode(&self, out: &mut impl BufMut) {
        let atyp_byte = self.atyp() | if self.uot { UOT_BIT } else { 0 };
        out.put_u8(atyp_byte);
        match &self.kind {
            AddrKind::V4(ip) => {
                out.put_slice(&ip.octets());
            }
            AddrKind::V6(ip) => {
                out.put_slice(&ip.octets());
            }
            AddrKind::Domain(d) => {
                out.put_u8(d.len() as u8);
                out.put_slice(d.as_bytes());
            }
        }
        out.put_u16(self.port);
    }

    /// Wire-encode this address into a fresh `Vec<u8>`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    /// Bounds-checked parse of an address from the head of `b`, returning the
    /// address and the number of bytes it consumed. Never panics; fails
    /// cleanly (returns `None`) on truncation or an unknown ATYP, regardless
    /// of what follows in `b`.
    pub fn split_addr(b: &[u8]) -> Option<(Addr, usize)> {
        let raw_atyp = *b.first()?;
        let atyp = raw_atyp & !UOT_BIT;
        let uot = raw_atyp & UOT_BIT != 0;

        match atyp {
            ATYP_IPV4 => {
                if b.len() < 1 + 4 + 2 {
                    return None;
                }
                let ip = Ipv4Addr::new(b[1], b[2], b[3], b[4]);
                let port = u16::from_be_bytes([b[5], b[6]]);
                Some((Self::new(AddrKind::V4(ip), port).with_uot(uot), 1 + 4 + 2))
            }
            ATYP_DOMAIN => {
                let len = *b.get(1)? as usize;
                let needed = 1 + 1 + len + 2;
                if b.len() < needed {
                    return None;
                }
                let domain = std::str::from_utf8(&b[2..2 + len]).ok()?.to_string();
                let port = u16::from_be_bytes([b[2 + len], b[2 + len + 1]]);
                Some((Self::new(AddrKind::Domain(domain), port).with_uot(uot), needed))
            }
            ATYP_IPV6 => {
                if b.len() < 1 + 16 + 2 {
                    return None;
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&b[1..17]);
                let ip = Ipv6Addr::from(octets);
                let port = u16::from_be_bytes([b[17], b[18]]);
                Some((Self::new(AddrKind::V6(ip), port).with_uot(uot), 1 + 16 + 2))
            }
            _ => None,
        }
    }

    /// Parse `"host:port"` into an Addr: IPv4 if the host is a literal IPv4
    /// address, IPv6 if IPv6 (accepting the bracketed `[::1]:443` form), else
    /// a domain form if `len(host) <= 255`. Returns `None` on any violation
    /// (unparseable port, domain too long).
    pub fn parse_addr(s: &str) -> Option<Addr> {
        let (host, port_str) = s.rsplit_once(':')?;
        let port: u16 = port_str.parse().ok()?;

        let unbracketed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return Some(match ip {
                IpAddr::V4(v4) => Self::new(AddrKind::V4(v4), port),
                IpAddr::V6(v6) => Self::new(AddrKind::V6(v6), port),
            });
        }

        if host.len() > 255 {
            return None;
        }
        Some(Self::new(AddrKind::Domain(host.to_string()), port))
    }

    /// Read a framed address off an async reader, per RFC 1928 §5: the
    /// number of bytes consumed is dictated entirely by the first byte.
    /// `scratch` must have capacity for the largest possible frame
    /// (`MAX_ADDR_LEN`); this mirrors the teacher's fixed scratch-buffer
    /// read pattern rather than allocating per call.
    pub async fn read_addr<R: AsyncRead + Unpin>(r: &mut R, scratch: &mut [u8]) -> Result<Addr> {
        if scratch.len() < MAX_ADDR_LEN {
            return Err(Socks5Error::MalformedAddress("short buffer"));
        }

        r.read_exact(&mut scratch[..1]).await?;
        let raw_atyp = scratch[0];
        let atyp = raw_atyp & !UOT_BIT;
        let uot = raw_atyp & UOT_BIT != 0;

        let addr = match atyp {
            ATYP_IPV4 => {
                r.read_exact(&mut scratch[1..7]).await?;
                let ip = Ipv4Addr::new(scratch[1], scratch[2], scratch[3], scratch[4]);
                let port = u16::from_be_bytes([scratch[5], scratch[6]]);
                Self::new(AddrKind::V4(ip), port)
            }
            ATYP_DOMAIN => {
                r.read_exact(&mut scratch[1..2]).await?;
                let len = scratch[1] as usize;
                r.read_exact(&mut scratch[2..2 + len + 2]).await?;
                let domain = String::from_utf8(scratch[2..2 + len].to_vec())
                    .map_err(|_| Socks5Error::MalformedAddress("domain is not valid UTF-8"))?;
                let port = u16::from_be_bytes([scratch[2 + len], scratch[2 + len + 1]]);
                Self::new(AddrKind::Domain(domain), port)
            }
            ATYP_IPV6 => {
                r.read_exact(&mut scratch[1..19]).await?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&scratch[1..17]);
                let ip = Ipv6Addr::from(octets);
                let port = u16::from_be_bytes([scratch[17], scratch[18]]);
                Self::new(AddrKind::V6(ip), port)
            }
            _ => return Err(Socks5Error::AddressTypeNotSupported(raw_atyp)),
        };

        Ok(addr.with_uot(uot))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AddrKind::V4(ip) => write!(f, "{}:{}", ip, self.port),
            AddrKind::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
            AddrKind::Domain(d) => write!(f, "{}:{}", d, self.port),
        }
    }
}

impl From<SocketAddr> for Addr {
    fn from(sa: SocketAddr) -> Self {
        match sa {
            SocketAddr::V4(v4) => Self::new(AddrKind::V4(*v4.ip()), v4.port()),
            SocketAddr::V6(v6) => Self::new(AddrKind::V6(*v6.ip()), v6.port()),
        }
    }
}

impl TryFrom<&Addr> for SocketAddr {
    type Error = Socks5Error;

    /// Only IP-form addresses convert directly; a domain Addr must be
    /// resolved by the caller first (the dialer does this via normal DNS
    /// resolution through `ToSocketAddrs`).
    fn try_from(addr: &Addr) -> Result<SocketAddr> {
        match &addr.kind {
            AddrKind::V4(ip) => Ok(SocketAddr::new(IpAddr::V4(*ip), addr.port)),
            AddrKind::V6(ip) => Ok(SocketAddr::new(IpAddr::V6(*ip), addr.port)),
            AddrKind::Domain(_) => Err(Socks5Error::MalformedAddress(
                "cannot convert a domain Addr directly into a SocketAddr",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_idempotent() {
        for s in ["127.0.0.1:80", "[::1]:443", "example.com:8080"] {
            let once = Addr::parse_addr(s).unwrap().to_string();
            let twice = Addr::parse_addr(&once).unwrap().to_string();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn self_delimiting_ignores_suffix() {
        let addr = Addr::parse_addr("127.0.0.1:80").unwrap();
        let mut bytes = addr.to_bytes();
        bytes.extend_from_slice(b"trailing garbage");
        let (parsed, used) = Addr::split_addr(&bytes).unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(used, addr.encoded_len());
    }

    #[test]
    fn bounds_safety_on_truncation() {
        let addr = Addr::parse_addr("example.com:443").unwrap();
        let bytes = addr.to_bytes();
        for truncate_at in 0..bytes.len() {
            assert!(Addr::split_addr(&bytes[..truncate_at]).is_none());
        }
    }

    #[test]
    fn unknown_atyp_fails_cleanly() {
        assert!(Addr::split_addr(&[0x02, 0x00, 0x00]).is_none());
    }

    #[test]
    fn ipv4_preferred_over_domain_or_v6() {
        let addr = Addr::parse_addr("127.0.0.1:80").unwrap();
        assert_eq!(addr.atyp(), ATYP_IPV4);
    }

    #[test]
    fn bracketed_ipv6_literal_parses_as_v6_not_domain() {
        let addr = Addr::parse_addr("[::1]:443").unwrap();
        assert_eq!(addr.atyp(), ATYP_IPV6);
        assert_eq!(addr.port(), 443);
    }

    #[test]
    fn domain_length_over_255_rejected() {
        let long_host = "a".repeat(256);
        let s = format!("{}:80", long_host);
        assert!(Addr::parse_addr(&s).is_none());
    }

    #[test]
    fn uot_bit_is_preserved_through_wire_round_trip() {
        let addr = Addr::parse_addr("127.0.0.1:80").unwrap().with_uot(true);
        let bytes = addr.to_bytes();
        assert_eq!(bytes[0] & UOT_BIT, UOT_BIT);
        let (parsed, _) = Addr::split_addr(&bytes).unwrap();
        assert!(parsed.uot());
        assert_eq!(parsed.atyp(), ATYP_IPV4);
    }
}
