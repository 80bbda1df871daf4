//! TCP service loop: accept, handshake, dial upstream, relay.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::dialer::Dialer;
use crate::error::HandshakeOutcome;
use crate::handshake::server as handshake;
use crate::metrics::METRICS;
use crate::relay;
use crate::util;

/// Bind and run the TCP accept loop until cancelled.
pub async fn serve(bind_addr: SocketAddr, dialer: Arc<dyn Dialer>) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind SOCKS5 TCP listener to {bind_addr}"))?;

    info!(%bind_addr, "SOCKS5 TCP listener ready");

    loop {
        let (stream, client_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to accept TCP connection");
                continue;
            }
        };

        if let Err(e) = util::enable_tcp_keepalive(&stream) {
            debug!(error = %e, %client_addr, "failed to enable TCP keepalive");
        }

        let dialer = dialer.clone();
        tokio::spawn(async move {
            METRICS.connection_opened();
            if let Err(e) = handle_connection(stream, bind_addr, dialer).await {
                METRICS.error();
                debug!(error = %e, %client_addr, "SOCKS5 TCP session ended with error");
            }
            METRICS.connection_closed();
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    local_listen_addr: SocketAddr,
    dialer: Arc<dyn Dialer>,
) -> crate::error::Result<()> {
    match handshake::handshake(&mut stream, local_listen_addr).await? {
        HandshakeOutcome::Connect(target) => {
            debug!(%target, "SOCKS5 CONNECT");
            let upstream = dialer.dial(&target).await?;
            let (tx, rx) = relay::relay(stream, upstream).await?;
            debug!(bytes_to_upstream = tx, bytes_to_client = rx, %target, "CONNECT relay finished");
            METRICS.bytes_tx(tx);
            METRICS.bytes_rx(rx);
            Ok(())
        }
        HandshakeOutcome::UdpAssociate => {
            info!("SOCKS5 UDP ASSOCIATE established, holding control connection");
            handshake::hold_udp_associate(&mut stream).await;
            debug!("UDP ASSOCIATE control connection closed");
            Ok(())
        }
    }
}
