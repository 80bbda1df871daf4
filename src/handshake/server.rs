//! Server-role handshake: parse an inbound request, write a reply.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::addr::{Addr, MAX_ADDR_LEN};
use crate::error::{HandshakeOutcome, Result, Socks5Error};
use crate::relay::wait_for_close;

use super::{AUTH_NONE, CMD_CONNECT, CMD_UDP_ASSOCIATE, VERSION};

/// Drive the method negotiation and request/reply exchange for one inbound
/// connection. Only the "no authentication required" method is offered;
/// this design does not support server-side username/password.
pub async fn handshake<S>(stream: &mut S, local_listen_addr: SocketAddr) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(Socks5Error::UnsupportedVersion(header[0]));
    }

    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    stream.write_all(&[VERSION, AUTH_NONE]).await?;

    let mut request_header = [0u8; 3];
    stream.read_exact(&mut request_header).await?;
    if request_header[0] != VERSION {
        return Err(Socks5Error::UnsupportedVersion(request_header[0]));
    }
    let cmd = request_header[1];
    // request_header[2] is RSV, ignored.

    let mut scratch = [0u8; MAX_ADDR_LEN];
    let target = Addr::read_addr(stream, &mut scratch).await?;

    match cmd {
        CMD_CONNECT => {
            write_reply(stream, 0x00, &Addr::zero_v4()).await?;
            Ok(HandshakeOutcome::Connect(target))
        }
        CMD_UDP_ASSOCIATE => {
            write_reply(stream, 0x00, &Addr::from(local_listen_addr)).await?;
            Ok(HandshakeOutcome::UdpAssociate)
        }
        other => Err(Socks5Error::CommandNotSupported(other)),
    }
}

async fn write_reply<S: AsyncWrite + Unpin>(stream: &mut S, rep: u8, bind: &Addr) -> Result<()> {
    let mut buf = Vec::with_capacity(3 + bind.encoded_len());
    buf.push(VERSION);
    buf.push(rep);
    buf.push(0x00);
    bind.encode(&mut buf);
    stream.write_all(&buf).await?;
    Ok(())
}

/// Hold a UDP-associate control connection open. The only non-terminal
/// outcome is a read timeout, which just loops; EOF, an I/O error, or
/// receiving unexpected data all end the hold and free the caller's UDP
/// session.
pub async fn hold_udp_associate<S: AsyncRead + Unpin>(stream: &mut S) {
    wait_for_close(stream).await;
}
