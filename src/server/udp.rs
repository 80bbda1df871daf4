//! UDP service loop: one shared listening socket, a NAT map keyed by client
//! source address, and a spawned reverse-copy task per session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::addr::Addr;
use crate::dialer::Dialer;
use crate::metrics::METRICS;
use crate::nat::{NatEntry, NatMap};
use crate::pktconn::Socks5PktConn;
use crate::relay;

/// Bind the shared UDP listener and run the receive loop until cancelled.
pub async fn serve(
    bind_addr: SocketAddr,
    dialer: Arc<dyn Dialer>,
    nat: Arc<NatMap>,
    idle_timeout: Duration,
    buf_size: usize,
) -> Result<()> {
    let socket = Arc::new(
        UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind SOCKS5 UDP listener to {bind_addr}"))?,
    );

    info!(%bind_addr, "SOCKS5 UDP listener ready");

    let mut buf = vec![0u8; buf_size];
    loop {
        let (n, client_addr) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to receive UDP datagram");
                continue;
            }
        };

        if let Err(e) = handle_datagram(
            &socket,
            &nat,
            &dialer,
            client_addr,
            &buf[..n],
            idle_timeout,
            buf_size,
        )
        .await
        {
            debug!(error = %e, %client_addr, "dropping malformed SOCKS5 UDP datagram");
        }
    }
}

async fn handle_datagram(
    listener_socket: &Arc<UdpSocket>,
    nat: &Arc<NatMap>,
    dialer: &Arc<dyn Dialer>,
    client_addr: SocketAddr,
    datagram: &[u8],
    idle_timeout: Duration,
    buf_size: usize,
) -> crate::error::Result<()> {
    if datagram.len() < 3 {
        return Err(crate::error::Socks5Error::MalformedAddress(
            "UDP datagram shorter than header",
        ));
    }
    let frag = datagram[2];
    if frag != 0 {
        METRICS.datagram_frag_dropped();
        return Err(crate::error::Socks5Error::MalformedAddress(
            "fragmented SOCKS5 UDP datagram",
        ));
    }

    let (target, used) = Addr::split_addr(&datagram[3..])
        .ok_or(crate::error::Socks5Error::MalformedAddress("truncated SOCKS5 UDP header"))?;
    let payload = &datagram[3 + used..];

    let key = client_addr.to_string();

    let entry = match nat.get(&key) {
        Some(entry) => {
            entry.touch();
            entry
        }
        None => {
            let upstream_conn = dialer.dial_udp(&target).await?;
            let entry = NatEntry::new(upstream_conn, target.clone());
            METRICS.nat_session_opened();

            if let Some(loser) = nat.store(key.clone(), entry.clone()) {
                warn!(%client_addr, "racing UDP ASSOCIATE datagrams, closing displaced session");
                loser.conn.close().await;
            } else {
                spawn_reverse_copy(
                    listener_socket.clone(),
                    nat.clone(),
                    key.clone(),
                    entry.clone(),
                    client_addr,
                    idle_timeout,
                    buf_size,
                );
            }
            entry
        }
    };

    entry.conn.write_to(payload).await?;
    Ok(())
}

/// Build a "local responder" over the shared listener socket aimed back at
/// `client_addr`, and pump datagrams from the upstream connection to it
/// until either side closes or goes idle.
fn spawn_reverse_copy(
    listener_socket: Arc<UdpSocket>,
    nat: Arc<NatMap>,
    key: String,
    entry: Arc<NatEntry>,
    client_addr: SocketAddr,
    idle_timeout: Duration,
    buf_size: usize,
) {
    tokio::spawn(async move {
        let responder = Socks5PktConn::new(
            listener_socket,
            true,
            client_addr,
            entry.target.clone(),
            None,
        );

        relay::timed_copy(entry.conn.clone(), responder.clone(), idle_timeout, buf_size).await;

        entry.conn.close().await;
        nat.remove_if_current(&key, &entry);
        METRICS.nat_session_closed();
        debug!(%client_addr, target = %entry.target, "UDP NAT session evicted");
    });
}
