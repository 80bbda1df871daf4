//! Generic relay primitives: bidirectional TCP byte-copy and the
//! timed one-way UDP copy used for NAT idle eviction.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::debug;

use crate::error::Result;
use crate::pktconn::Socks5PktConn;
use crate::metrics::METRICS;

/// Bidirectional byte copy between two halves of (usually) a TCP connection
/// and a dialed upstream connection. Returns `(bytes_a_to_b, bytes_b_to_a)`
/// on the first side to close; I/O timeouts are not expected here (relay
/// has no timeout of its own — NAT idle eviction is handled separately by
/// `timed_copy`).
pub async fn relay<A, B>(mut a: A, mut b: B) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (n_ab, n_ba) = tokio::io::copy_bidirectional(&mut a, &mut b).await?;
    Ok((n_ab, n_ba))
}

/// Copy datagrams from `src` to `dst`, terminating after `idle` of
/// continuous silence. On expiry (or on `dst` being closed by its watcher),
/// closes both ends and returns so the caller can remove the NAT entry.
pub async fn timed_copy(src: Arc<Socks5PktConn>, dst: Arc<Socks5PktConn>, idle: Duration, buf_size: usize) {
    let mut buf = vec![0u8; buf_size];
    loop {
        let read = tokio::select! {
            biased;
            _ = dst.closed() => {
                debug!("destination packet connection closed, ending relay");
                break;
            }
            result = tokio::time::timeout(idle, src.read_from(&mut buf)) => result,
        };

        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!(error = %e, "error reading from source packet connection");
                break;
            }
            Err(_elapsed) => {
                debug!(idle_secs = idle.as_secs(), "UDP NAT entry idle timeout");
                break;
            }
        };

        if let Err(e) = dst.write_to(&buf[..n]).await {
            debug!(error = %e, "error forwarding datagram");
            break;
        }
        METRICS.datagram_tx();
    }

    src.close().await;
    dst.close().await;
}

/// Block on reads from `stream`, swallowing timeouts, until any other
/// outcome (EOF, error, or unexpected data) occurs. Used both to hold a
/// UDP-associate control connection open and to watch an upstream control
/// connection for closure.
pub async fn wait_for_close<S: AsyncRead + Unpin>(stream: &mut S) {
    const POLL_INTERVAL: Duration = Duration::from_secs(30);
    let mut buf = [0u8; 1];
    loop {
        match tokio::time::timeout(POLL_INTERVAL, stream.read(&mut buf)).await {
            Err(_elapsed) => continue,
            Ok(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn timed_copy_closes_both_ends_after_idle_timeout() {
        let src_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dst_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let src = Socks5PktConn::new_unbound(Arc::new(src_socket), false);
        let dst = Socks5PktConn::new_unbound(Arc::new(dst_socket), false);

        // No datagrams ever arrive on `src`, so the idle timeout (not a read
        // or a `dst` closure) must be what ends the copy.
        timed_copy(src.clone(), dst.clone(), Duration::from_millis(50), 1024).await;

        assert!(src.is_closed());
        assert!(dst.is_closed());
    }

    #[tokio::test]
    async fn timed_copy_forwards_datagrams_before_idling_out() {
        use crate::addr::Addr;

        let src_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dst_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let src_addr = src_socket.local_addr().unwrap();
        let receiver_addr = receiver_socket.local_addr().unwrap();

        sender_socket.connect(src_addr).await.unwrap();

        let src = Socks5PktConn::new_unbound(Arc::new(src_socket), false);
        // `write_to` needs a known write address up front; the unused target
        // is never consulted since this side carries no SOCKS5 header.
        let unused_target = Addr::parse_addr("127.0.0.1:1").unwrap();
        let dst = Socks5PktConn::new(Arc::new(dst_socket), false, receiver_addr, unused_target, None);

        sender_socket.send(b"hello").await.unwrap();

        let copy = tokio::spawn(timed_copy(src.clone(), dst.clone(), Duration::from_millis(200), 1024));

        let mut buf = [0u8; 16];
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), receiver_socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"hello");

        copy.await.unwrap();
        assert!(src.is_closed());
        assert!(dst.is_closed());
    }
}
