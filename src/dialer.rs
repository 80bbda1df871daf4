//! Upstream dialing: either straight to the network, or chained through
//! another SOCKS5 proxy via the client-role handshake.
//!
//! `Dialer` is a trait object so the TCP/UDP service loops don't need to
//! know which kind of upstream they're relaying to — an enrichment over the
//! teacher, which always dialed its one configured QUIC peer directly,
//! modeled on the `StreamTransport`/`DatagramTransport` trait-object pattern
//! used for multi-backend dialing elsewhere in the retrieved examples.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};

use crate::addr::Addr;
use crate::error::Result;
use crate::handshake::{client, CMD_UDP_ASSOCIATE};
use crate::pktconn::Socks5PktConn;

#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a TCP connection to `target`.
    async fn dial(&self, target: &Addr) -> Result<TcpStream>;

    /// Open a UDP packet connection suitable for relaying to `target`.
    async fn dial_udp(&self, target: &Addr) -> Result<Arc<Socks5PktConn>>;
}

/// Dials the target network directly; no chaining.
#[derive(Debug, Default)]
pub struct DirectDialer;

impl DirectDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, target: &Addr) -> Result<TcpStream> {
        Ok(TcpStream::connect(target.to_string()).await?)
    }

    async fn dial_udp(&self, target: &Addr) -> Result<Arc<Socks5PktConn>> {
        let resolved = resolve_one(target).await?;
        let bind_addr = unspecified_for(resolved);
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Socks5PktConn::new(Arc::new(socket), false, resolved, target.clone(), None))
    }
}

/// Dials a configured upstream SOCKS5 proxy using the client-role handshake.
pub struct ChainedDialer {
    upstream_addr: String,
    user: Option<String>,
    pass: Option<String>,
}

impl ChainedDialer {
    pub fn new(upstream_addr: String, user: Option<String>, pass: Option<String>) -> Self {
        Self {
            upstream_addr,
            user,
            pass,
        }
    }

    fn credentials(&self) -> Option<client::Credentials<'_>> {
        match (&self.user, &self.pass) {
            (Some(user), Some(pass)) => Some(client::Credentials { user, pass }),
            _ => None,
        }
    }
}

#[async_trait]
impl Dialer for ChainedDialer {
    async fn dial(&self, target: &Addr) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.upstream_addr).await?;
        client::connect(&mut stream, target, self.credentials(), &self.upstream_addr).await?;
        Ok(stream)
    }

    async fn dial_udp(&self, target: &Addr) -> Result<Arc<Socks5PktConn>> {
        let mut ctrl = TcpStream::connect(&self.upstream_addr).await?;
        let bnd = client::negotiate(&mut ctrl, CMD_UDP_ASSOCIATE, target, self.credentials(), &self.upstream_addr)
            .await?;
        let write_addr: SocketAddr = (&bnd).try_into()?;

        let socket = UdpSocket::bind(unspecified_for(write_addr)).await?;
        let conn = Socks5PktConn::new(Arc::new(socket), true, write_addr, target.clone(), Some(ctrl));
        tokio::spawn(conn.clone().watch_ctrl());
        Ok(conn)
    }
}

async fn resolve_one(target: &Addr) -> Result<SocketAddr> {
    tokio::net::lookup_host(target.to_string())
        .await?
        .next()
        .ok_or(crate::error::Socks5Error::MalformedAddress("could not resolve target address"))
}

fn unspecified_for(addr: SocketAddr) -> &'static str {
    if addr.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    }
}
