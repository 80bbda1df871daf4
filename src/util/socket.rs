//! Socket utilities

use anyhow::Result;
use socket2::SockRef;
use std::time::Duration;
use tokio::net::TcpStream;

/// Enable TCP keepalive on an accepted connection, matching the interval
/// the teacher used for its QUIC-era TCP listeners.
pub fn enable_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));

    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    Ok(())
}
