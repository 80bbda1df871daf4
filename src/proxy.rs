//! Top-level proxy engine: wires a configured [`Dialer`] to the TCP and UDP
//! service loops, and exposes the same dialer to callers that want to chain
//! through this instance's configured upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::addr::Addr;
use crate::config::Config;
use crate::dialer::{ChainedDialer, Dialer, DirectDialer};
use crate::nat::NatMap;
use crate::pktconn::Socks5PktConn;
use crate::server::{tcp, udp};

/// A running (or runnable) SOCKS5 relay engine: one bind address serving
/// both TCP CONNECT and UDP ASSOCIATE, dialing upstream either directly or
/// through a chained SOCKS5 proxy depending on configuration.
pub struct Proxy {
    bind_addr: SocketAddr,
    idle_timeout: Duration,
    buf_size: usize,
    dialer: Arc<dyn Dialer>,
    nat: Arc<NatMap>,
}

impl Proxy {
    pub fn new(config: Config) -> Self {
        let dialer: Arc<dyn Dialer> = match config.upstream.addr {
            Some(addr) => Arc::new(ChainedDialer::new(addr, config.upstream.user, config.upstream.pass)),
            None => Arc::new(DirectDialer::new()),
        };

        Self {
            bind_addr: config.server.bind_addr,
            idle_timeout: Duration::from_secs(config.udp.idle_timeout_secs),
            buf_size: config.udp.buf_size,
            dialer,
            nat: Arc::new(NatMap::new()),
        }
    }

    /// The live UDP NAT map, for wiring into the diagnostic API server.
    pub fn nat_map(&self) -> Arc<NatMap> {
        self.nat.clone()
    }

    /// Run the TCP and UDP service loops concurrently until either exits
    /// (which, barring a bind failure, is never under normal operation).
    pub async fn listen_and_serve(&self) -> Result<()> {
        let tcp_task = tcp::serve(self.bind_addr, self.dialer.clone());
        let udp_task = udp::serve(
            self.bind_addr,
            self.dialer.clone(),
            self.nat.clone(),
            self.idle_timeout,
            self.buf_size,
        );

        tokio::try_join!(tcp_task, udp_task)?;
        Ok(())
    }

    /// Dial `target` over TCP using this proxy's configured dialer —
    /// exposed so another component can chain through this instance as its
    /// own upstream.
    pub async fn dial(&self, target: &Addr) -> crate::error::Result<tokio::net::TcpStream> {
        self.dialer.dial(target).await
    }

    /// Dial `target` over UDP using this proxy's configured dialer.
    pub async fn dial_udp(&self, target: &Addr) -> crate::error::Result<Arc<Socks5PktConn>> {
        self.dialer.dial_udp(target).await
    }
}
