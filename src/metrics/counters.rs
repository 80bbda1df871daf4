//! Atomic counters for hot-path metrics
//!
//! Lock-free counters that can be safely updated from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // TCP connection metrics
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,

    // Traffic metrics (TCP CONNECT relays)
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,

    // UDP NAT session metrics
    pub nat_sessions_opened: AtomicU64,
    pub nat_sessions_active: AtomicU64,

    // UDP datagram metrics
    pub datagrams_sent: AtomicU64,
    pub datagrams_frag_dropped: AtomicU64,

    // Error metrics
    pub errors_total: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            nat_sessions_opened: AtomicU64::new(0),
            nat_sessions_active: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            datagrams_frag_dropped: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
        }
    }

    // Connection tracking
    #[inline]
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    // Traffic tracking
    #[inline]
    pub fn bytes_rx(&self, count: u64) {
        self.bytes_received.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn bytes_tx(&self, count: u64) {
        self.bytes_sent.fetch_add(count, Ordering::Relaxed);
    }

    // UDP NAT session tracking
    #[inline]
    pub fn nat_session_opened(&self) {
        self.nat_sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.nat_sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn nat_session_closed(&self) {
        self.nat_sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    // Datagram tracking
    #[inline]
    pub fn datagram_tx(&self) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn datagram_frag_dropped(&self) {
        self.datagrams_frag_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    #[inline]
    pub fn error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            nat_sessions_opened: self.nat_sessions_opened.load(Ordering::Relaxed),
            nat_sessions_active: self.nat_sessions_active.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_frag_dropped: self.datagrams_frag_dropped.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub nat_sessions_opened: u64,
    pub nat_sessions_active: u64,
    pub datagrams_sent: u64,
    pub datagrams_frag_dropped: u64,
    pub errors_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_lifecycle_updates_active_count() {
        let m = Metrics::new();
        m.connection_opened();
        m.connection_opened();
        m.connection_closed();
        let snap = m.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
    }

    #[test]
    fn nat_session_lifecycle_updates_active_count() {
        let m = Metrics::new();
        m.nat_session_opened();
        m.nat_session_closed();
        let snap = m.snapshot();
        assert_eq!(snap.nat_sessions_opened, 1);
        assert_eq!(snap.nat_sessions_active, 0);
    }
}
