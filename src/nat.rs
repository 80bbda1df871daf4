//! The UDP NAT map: client-source-address-string → upstream packet-socket.
//!
//! Concurrent-safe via `dashmap`, in the shape of the teacher's
//! `ConnectionManager`, generalized from connection-ID keys to client
//! source-address-string keys. At most one entry per key is live at a time;
//! a racing pair of first-datagrams for the same source resolves by
//! last-writer-wins, with the displaced entry's packet connection closed.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::addr::Addr;
use crate::pktconn::Socks5PktConn;

/// One live UDP session: the upstream packet connection dialed for it, the
/// target it was dialed toward, and bookkeeping timestamps for the
/// diagnostic `/sessions` endpoint.
pub struct NatEntry {
    pub conn: Arc<Socks5PktConn>,
    pub target: Addr,
    pub created_at: Instant,
    last_active: Mutex<Instant>,
}

impl NatEntry {
    pub fn new(conn: Arc<Socks5PktConn>, target: Addr) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            conn,
            target,
            created_at: now,
            last_active: Mutex::new(now),
        })
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active.lock().elapsed()
    }
}

/// The NAT map itself.
#[derive(Default)]
pub struct NatMap {
    entries: DashMap<String, Arc<NatEntry>>,
}

impl NatMap {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<Arc<NatEntry>> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Insert `entry` under `key`, returning whatever was there before.
    /// Callers must close the returned entry's connection — it is the
    /// "loser" of a last-writer-wins race.
    pub fn store(&self, key: String, entry: Arc<NatEntry>) -> Option<Arc<NatEntry>> {
        self.entries.insert(key, entry)
    }

    /// Remove `key` only if it still points at `entry` — guards against an
    /// eviction task removing a newer entry that raced in after this one
    /// was superseded.
    pub fn remove_if_current(&self, key: &str, entry: &Arc<NatEntry>) {
        self.entries.remove_if(key, |_, v| Arc::ptr_eq(v, entry));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all live sessions, for the `/sessions` diagnostic API.
    pub fn snapshot(&self) -> Vec<(String, Arc<NatEntry>)> {
        self.entries.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    async fn dummy_entry(target_port: u16) -> Arc<NatEntry> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = Addr::parse_addr(&format!("127.0.0.1:{target_port}")).unwrap();
        let conn = Socks5PktConn::new_unbound(Arc::new(socket), false);
        NatEntry::new(conn, target)
    }

    #[tokio::test]
    async fn racing_inserts_resolve_last_writer_wins() {
        let map = NatMap::new();
        let first = dummy_entry(1).await;
        let second = dummy_entry(2).await;

        let evicted = map.store("1.2.3.4:9999".to_string(), first.clone());
        assert!(evicted.is_none());

        let evicted = map.store("1.2.3.4:9999".to_string(), second.clone());
        assert!(Arc::ptr_eq(&evicted.unwrap(), &first));

        let current = map.get("1.2.3.4:9999").unwrap();
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[tokio::test]
    async fn remove_if_current_ignores_stale_handle() {
        let map = NatMap::new();
        let first = dummy_entry(1).await;
        let second = dummy_entry(2).await;

        map.store("k".to_string(), first.clone());
        map.store("k".to_string(), second.clone());

        // A stale eviction task for `first` must not remove `second`.
        map.remove_if_current("k", &first);
        assert!(map.get("k").is_some());

        map.remove_if_current("k", &second);
        assert!(map.get("k").is_none());
    }
}
