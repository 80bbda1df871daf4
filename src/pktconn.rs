//! `Socks5PktConn`: a datagram endpoint decorated with the SOCKS5 UDP header
//! and, optionally, a TCP control connection whose closure ends the session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::addr::Addr;
use crate::error::{Result, Socks5Error};

/// A datagram socket wrapped with SOCKS5 UDP framing.
///
/// `write_addr` and `tgt_addr` may be known up front (as they are when
/// [`crate::dialer::Dialer::dial_udp`] constructs one) or learned lazily
/// from the first received packet, per RFC 1928 §7. Once set they are not
/// revisited — later packets' embedded target is trusted as-is, which is
/// the documented last-write-wins policy: the first packet's sender and
/// declared target win, and nothing here re-validates subsequent packets
/// against them.
pub struct Socks5PktConn {
    socket: Arc<UdpSocket>,
    /// Whether this side must add/strip the SOCKS5 UDP header at all, or
    /// simply pass payloads straight through to a socket already aimed at
    /// the real target (the case for a direct, unchained dial).
    tgt_header: bool,
    write_addr: Mutex<Option<SocketAddr>>,
    tgt_addr: Mutex<Option<Addr>>,
    /// The paired TCP control connection, present only when this packet
    /// connection was opened against an upstream SOCKS5 proxy (see
    /// `ChainedDialer::dial_udp`). Its closure is the liveness signal for
    /// the whole session.
    ctrl_conn: Option<AsyncMutex<Option<tokio::net::TcpStream>>>,
    closed: AtomicBool,
    notify_close: Notify,
}

impl Socks5PktConn {
    /// Build a packet connection whose write/target addresses are already
    /// known, as returned by a `dial_udp` call.
    pub fn new(
        socket: Arc<UdpSocket>,
        tgt_header: bool,
        write_addr: SocketAddr,
        tgt_addr: Addr,
        ctrl_conn: Option<tokio::net::TcpStream>,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket,
            tgt_header,
            write_addr: Mutex::new(Some(write_addr)),
            tgt_addr: Mutex::new(Some(tgt_addr)),
            ctrl_conn: ctrl_conn.map(|c| AsyncMutex::new(Some(c))),
            closed: AtomicBool::new(false),
            notify_close: Notify::new(),
        })
    }

    /// Build a packet connection that has not yet learned its write/target
    /// addresses; they are populated opportunistically by the first
    /// `read_from` call.
    pub fn new_unbound(socket: Arc<UdpSocket>, tgt_header: bool) -> Arc<Self> {
        Arc::new(Self {
            socket,
            tgt_header,
            write_addr: Mutex::new(None),
            tgt_addr: Mutex::new(None),
            ctrl_conn: None,
            closed: AtomicBool::new(false),
            notify_close: Notify::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn target(&self) -> Option<Addr> {
        self.tgt_addr.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until this connection is closed, for use in a `select!` guarding
    /// a blocking receive.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.notify_close.notified().await;
    }

    /// Receive one datagram. If framed, strips the SOCKS5 UDP header and
    /// returns only the payload length, recording `write_addr`/`tgt_addr`
    /// on first use if they were not already known. Unframed connections
    /// pass the datagram straight through.
    pub async fn read_from(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.tgt_header {
            return Ok(self.socket.recv(buf).await?);
        }

        let mut scratch = vec![0u8; buf.len().max(3)];
        let (n, from) = self.socket.recv_from(&mut scratch).await?;
        if n < 3 {
            return Err(Socks5Error::MalformedAddress("UDP datagram shorter than header"));
        }
        let frag = scratch[2];
        if frag != 0 {
            return Err(Socks5Error::MalformedAddress("fragmented SOCKS5 UDP datagram"));
        }

        let (addr, used) = Addr::split_addr(&scratch[3..n])
            .ok_or(Socks5Error::MalformedAddress("truncated SOCKS5 UDP header"))?;
        let payload_start = 3 + used;
        let payload_len = n - payload_start;
        if payload_len > buf.len() {
            return Err(Socks5Error::MalformedAddress("payload larger than destination buffer"));
        }
        buf[..payload_len].copy_from_slice(&scratch[payload_start..n]);

        {
            let mut w = self.write_addr.lock();
            if w.is_none() {
                *w = Some(from);
            }
        }
        {
            let mut t = self.tgt_addr.lock();
            if t.is_none() {
                *t = Some(addr);
            }
        }

        Ok(payload_len)
    }

    /// Send one payload. If framed, prepends `00 00 00 ‖ tgt_addr` and sends
    /// to the stored `write_addr` — never the caller's notion of where to
    /// send, since this wrapper owns routing once it knows its target.
    pub async fn write_to(&self, buf: &[u8]) -> Result<usize> {
        let write_addr: SocketAddr = (*self.write_addr.lock())
            .ok_or(Socks5Error::MalformedAddress("write address not yet known"))?;

        if !self.tgt_header {
            return Ok(self.socket.send_to(buf, write_addr).await?);
        }

        let tgt_addr = self
            .tgt_addr
            .lock()
            .clone()
            .ok_or(Socks5Error::MalformedAddress("target address not yet known"))?;

        let mut out = Vec::with_capacity(3 + tgt_addr.encoded_len() + buf.len());
        out.extend_from_slice(&[0, 0, 0]);
        tgt_addr.encode(&mut out);
        out.extend_from_slice(buf);

        self.socket.send_to(&out, write_addr).await?;
        Ok(buf.len())
    }

    /// Close the paired control connection (if any), then mark the datagram
    /// side closed. Idempotent: a second call is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ctrl) = &self.ctrl_conn {
            if let Some(mut stream) = ctrl.lock().await.take() {
                if let Err(e) = stream.shutdown().await {
                    debug!(error = %e, "error shutting down control connection");
                }
            }
        }
        self.notify_close.notify_waiters();
    }

    /// Run the control-connection watcher: blocks on reads, swallowing
    /// timeouts, and closes this connection on any other outcome (EOF,
    /// error, or unexpected data) — the signal that the upstream session
    /// has ended.
    pub async fn watch_ctrl(self: Arc<Self>) {
        let Some(ctrl) = &self.ctrl_conn else { return };
        {
            let mut guard = ctrl.lock().await;
            if let Some(stream) = guard.as_mut() {
                crate::relay::wait_for_close(stream).await;
            }
        }
        self.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn udp_header_round_trip() {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();

        let target = Addr::parse_addr("93.184.216.34:80").unwrap();
        let conn = Socks5PktConn::new(Arc::new(sender), true, receiver_addr, target.clone(), None);

        let payload = b"hello socks5";
        conn.write_to(payload).await.unwrap();

        let mut wire = vec![0u8; 512];
        let (n, _from) = receiver.recv_from(&mut wire).await.unwrap();
        assert_eq!(&wire[..3], &[0, 0, 0]);
        let (parsed_target, used) = Addr::split_addr(&wire[3..n]).unwrap();
        assert_eq!(parsed_target, target);
        assert_eq!(&wire[3 + used..n], payload);

        // And read_from on an unbound receiver learns write_addr/tgt_addr.
        let reflector = Socks5PktConn::new_unbound(Arc::new(receiver), true);
        let mut out = vec![0u8; 512];

        // Re-send the same captured wire bytes as if `reflector` received them.
        let echo_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reflector_addr = reflector.local_addr().unwrap();
        echo_sock.send_to(&wire[..n], reflector_addr).await.unwrap();

        let len = reflector.read_from(&mut out).await.unwrap();
        assert_eq!(&out[..len], payload);
        assert_eq!(reflector.target().unwrap(), target);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let conn = Socks5PktConn::new_unbound(Arc::new(socket), false);
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
    }
}
