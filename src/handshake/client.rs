//! Client-role handshake: write a request, parse a reply, against an
//! upstream SOCKS5 proxy.

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::addr::{Addr, MAX_ADDR_LEN};
use crate::error::{ReplyCode, Result, Socks5Error};

use super::{AUTH_NONE, AUTH_NO_ACCEPTABLE, AUTH_USERPASS, USERPASS_VERSION, VERSION};

/// Credentials offered during the RFC 1929 sub-negotiation.
#[derive(Debug, Clone)]
pub struct Credentials<'a> {
    pub user: &'a str,
    pub pass: &'a str,
}

impl<'a> Credentials<'a> {
    /// Credentials are only usable if both fields fit the one-byte length
    /// prefix RFC 1929 uses and the username is non-empty.
    fn valid(&self) -> bool {
        !self.user.is_empty() && self.user.len() <= 255 && self.pass.len() <= 255
    }
}

/// Run the full client-role exchange: greeting, optional sub-negotiation,
/// request, reply. Returns the BND address the upstream proxy reports —
/// for CONNECT this is discarded by callers that don't need it; for UDP
/// ASSOCIATE it is the address datagrams must be sent to.
pub async fn negotiate<S>(
    stream: &mut S,
    cmd: u8,
    target: &Addr,
    creds: Option<Credentials<'_>>,
    proxy_label: &str,
) -> Result<Addr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let creds = creds.filter(Credentials::valid);

    let methods: &[u8] = if creds.is_some() {
        &[AUTH_NONE, AUTH_USERPASS]
    } else {
        &[AUTH_NONE]
    };
    let mut greeting = Vec::with_capacity(2 + methods.len());
    greeting.push(VERSION);
    greeting.push(methods.len() as u8);
    greeting.extend_from_slice(methods);
    stream.write_all(&greeting).await?;

    let mut method_reply = [0u8; 2];
    stream.read_exact(&mut method_reply).await?;
    if method_reply[0] != VERSION {
        return Err(Socks5Error::UnsupportedVersion(method_reply[0]));
    }

    match method_reply[1] {
        AUTH_NO_ACCEPTABLE => return Err(Socks5Error::AuthRequired),
        AUTH_USERPASS => {
            let creds = creds.ok_or(Socks5Error::AuthRequired)?;
            let mut sub_neg = Vec::with_capacity(3 + creds.user.len() + creds.pass.len());
            sub_neg.push(USERPASS_VERSION);
            sub_neg.push(creds.user.len() as u8);
            sub_neg.extend_from_slice(creds.user.as_bytes());
            sub_neg.push(creds.pass.len() as u8);
            sub_neg.extend_from_slice(creds.pass.as_bytes());
            stream.write_all(&sub_neg).await?;

            let mut sub_reply = [0u8; 2];
            stream.read_exact(&mut sub_reply).await?;
            if sub_reply[1] != 0x00 {
                return Err(Socks5Error::CredentialsRejected);
            }
        }
        AUTH_NONE => {}
        other => return Err(Socks5Error::UnsupportedVersion(other)),
    }

    let mut request = Vec::with_capacity(4 + target.encoded_len());
    request.put_u8(VERSION);
    request.put_u8(cmd);
    request.put_u8(0x00);
    target.encode(&mut request);
    stream.write_all(&request).await?;

    let mut reply_header = [0u8; 4];
    stream.read_exact(&mut reply_header).await?;
    if reply_header[0] != VERSION {
        return Err(Socks5Error::UnsupportedVersion(reply_header[0]));
    }
    let rep = reply_header[1];
    // reply_header[2] is RSV; reply_header[3] is the BND address's ATYP,
    // already consumed so `Addr::read_addr` below reads just the body. We
    // instead rebuild a one-byte cursor by pushing it back conceptually:
    // simplest is to read the rest of the BND address ourselves using the
    // ATYP we already hold.
    let mut scratch = [0u8; MAX_ADDR_LEN];
    scratch[0] = reply_header[3];
    let bind = read_addr_body(stream, reply_header[3], &mut scratch).await?;

    // Branch directly on `rep != 0`; the reply-code table is used purely
    // for the error message, never for control flow (see the discussion of
    // the overloaded byte-table check this replaces).
    if rep != 0x00 {
        return Err(Socks5Error::UpstreamRejected {
            proxy: proxy_label.to_string(),
            stage: "connect reply",
            reply: ReplyCode::from_u8(rep),
        });
    }

    Ok(bind)
}

/// Read the remainder of a SOCKS5 address whose ATYP byte has already been
/// consumed from the wire (as happens when the reply header's fourth byte
/// doubles as the BND address's ATYP).
async fn read_addr_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    atyp: u8,
    scratch: &mut [u8; MAX_ADDR_LEN],
) -> Result<Addr> {
    use crate::addr::{ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6};

    match atyp & !0x08 {
        ATYP_IPV4 => {
            stream.read_exact(&mut scratch[1..7]).await?;
        }
        ATYP_DOMAIN => {
            stream.read_exact(&mut scratch[1..2]).await?;
            let len = scratch[1] as usize;
            stream.read_exact(&mut scratch[2..2 + len + 2]).await?;
        }
        ATYP_IPV6 => {
            stream.read_exact(&mut scratch[1..19]).await?;
        }
        _ => return Err(Socks5Error::AddressTypeNotSupported(atyp)),
    }

    let (addr, _) = Addr::split_addr(scratch).ok_or(Socks5Error::MalformedAddress("truncated BND address"))?;
    Ok(addr)
}

/// Client-role CONNECT: tunnel `target` through `stream`, which must already
/// be an open TCP connection to the upstream proxy.
pub async fn connect<S>(
    stream: &mut S,
    target: &Addr,
    creds: Option<Credentials<'_>>,
    proxy_label: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate(stream, super::CMD_CONNECT, target, creds, proxy_label).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn user_pass_connect_client_role() {
        let (mut client_side, mut upstream) = duplex(512);

        let target = Addr::parse_addr("example.com:443").unwrap();
        let creds = Credentials { user: "u", pass: "p" };
        let handshake = tokio::spawn(async move {
            connect(&mut client_side, &target, Some(creds), "upstream:1080").await
        });

        let mut greeting = [0u8; 4];
        upstream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [0x05, 0x02, 0x00, 0x02]);
        upstream.write_all(&[0x05, 0x02]).await.unwrap();

        let mut sub_neg = [0u8; 5];
        upstream.read_exact(&mut sub_neg).await.unwrap();
        assert_eq!(sub_neg, [0x01, 0x01, b'u', 0x01, b'p']);
        upstream.write_all(&[0x01, 0x00]).await.unwrap();

        let mut request = vec![0u8; 4 + 1 + 11 + 2];
        upstream.read_exact(&mut request).await.unwrap();
        assert_eq!(
            request,
            vec![
                0x05, 0x01, 0x00, 0x03, 0x0B, b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.', b'c', b'o', b'm',
                0x01, 0xBB
            ]
        );
        upstream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();

        handshake.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rejected_credentials() {
        let (mut client_side, mut upstream) = duplex(512);

        let target = Addr::parse_addr("example.com:443").unwrap();
        let creds = Credentials { user: "u", pass: "p" };
        let handshake = tokio::spawn(async move {
            connect(&mut client_side, &target, Some(creds), "upstream:1080").await
        });

        let mut greeting = [0u8; 4];
        upstream.read_exact(&mut greeting).await.unwrap();
        upstream.write_all(&[0x05, 0x02]).await.unwrap();

        let mut sub_neg = [0u8; 5];
        upstream.read_exact(&mut sub_neg).await.unwrap();
        upstream.write_all(&[0x01, 0x01]).await.unwrap();

        let err = handshake.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::CredentialsRejected));
    }

    #[tokio::test]
    async fn auth_required_without_credentials() {
        let (mut client_side, mut upstream) = duplex(512);

        let target = Addr::parse_addr("example.com:443").unwrap();
        let handshake = tokio::spawn(async move { connect(&mut client_side, &target, None, "upstream:1080").await });

        let mut greeting = [0u8; 3];
        upstream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [0x05, 0x01, 0x00]);
        upstream.write_all(&[0x05, 0xFF]).await.unwrap();

        let err = handshake.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::AuthRequired));
    }
}
