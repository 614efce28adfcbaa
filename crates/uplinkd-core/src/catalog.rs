//! The connection catalog: every adopted uplink, ranked on demand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use uplinkd_netops::AccessPoint;

use crate::score::connection_score;

/// An adopted uplink. (BSSID, radio name) identifies it; the score is
/// derived from the stored measurements, never stored itself.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub ap: AccessPoint,
    pub radio: String,
    pub strategy: String,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    pub connected: bool,
}

impl Connection {
    pub fn score(&self) -> f64 {
        connection_score(
            self.download_mbps,
            self.upload_mbps,
            self.latency_ms,
            self.ap.signal_strength,
        )
    }

    fn key(&self) -> (&str, &str) {
        (self.ap.bssid.as_str(), self.radio.as_str())
    }
}

/// Mutex-guarded ordered collection of connections.
///
/// Writers: the dispatcher (append) and the monitor policy (remove by
/// interface). Readers take snapshots; nobody iterates under the lock while
/// doing I/O. The revision counter lets the push stream detect changes.
#[derive(Default)]
pub struct ConnectionCatalog {
    entries: Mutex<Vec<Connection>>,
    revision: AtomicU64,
}

impl ConnectionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an adopted connection, replacing any previous entry for the
    /// same (BSSID, radio) pair so no two connected entries share a key.
    pub fn adopt(&self, connection: Connection) {
        let mut entries = self.entries.lock().expect("catalog poisoned");
        entries.retain(|existing| existing.key() != connection.key());
        entries.push(connection);
        drop(entries);
        self.bump();
    }

    /// Whether some entry for this BSSID is currently flagged connected.
    pub fn is_connected_bssid(&self, bssid: &str) -> bool {
        self.entries
            .lock()
            .expect("catalog poisoned")
            .iter()
            .any(|c| c.connected && c.ap.bssid == bssid)
    }

    /// Drop every entry bound to the given radio. Returns how many went.
    pub fn remove_for_radio(&self, radio: &str) -> usize {
        let mut entries = self.entries.lock().expect("catalog poisoned");
        let before = entries.len();
        entries.retain(|c| c.radio != radio);
        let removed = before - entries.len();
        drop(entries);
        if removed > 0 {
            self.bump();
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<Connection> {
        self.entries.lock().expect("catalog poisoned").clone()
    }

    /// Highest-scoring connected entry; earlier entries win ties.
    pub fn best(&self) -> Option<Connection> {
        let entries = self.entries.lock().expect("catalog poisoned");
        let mut best: Option<&Connection> = None;
        for entry in entries.iter().filter(|c| c.connected) {
            match best {
                Some(current) if entry.score() <= current.score() => {}
                _ => best = Some(entry),
            }
        }
        best.cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("catalog poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::Relaxed);
    }
}
