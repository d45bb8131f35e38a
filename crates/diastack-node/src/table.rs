use diastack_peer_runtime::{PeerHandle, PeerId, PeerSettings};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One configured peer and its running task
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Insertion order, used as the routing preference
    pub seq: u64,
    pub settings: PeerSettings,
    pub handle: PeerHandle,
}

/// Immutable view of the peer table
#[derive(Debug, Default, Clone)]
pub struct PeerSet {
    peers: BTreeMap<PeerId, PeerEntry>,
    next_seq: u64,
}

impl PeerSet {
    pub fn get(&self, id: &PeerId) -> Option<&PeerEntry> {
        self.peers.get(id)
    }

    /// Look a peer up by Origin-Host
    pub fn by_host(&self, host: &str) -> Option<&PeerEntry> {
        self.peers
            .values()
            .filter(|entry| entry.handle.id().host().eq_ignore_ascii_case(host))
            .min_by_key(|entry| entry.seq)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers ordered by insertion, then identity
    pub fn in_order(&self) -> Vec<&PeerEntry> {
        let mut entries: Vec<&PeerEntry> = self.peers.values().collect();
        entries.sort_by(|a, b| {
            a.seq
                .cmp(&b.seq)
                .then_with(|| a.handle.id().cmp(b.handle.id()))
        });
        entries
    }
}

/// Copy-on-write peer table.
///
/// Readers take a snapshot and never wait on writers for longer than an
/// `Arc` clone; a writer publishes a whole new set, so a snapshot never
/// shows a half-applied change.
#[derive(Debug, Default)]
pub struct PeerTable {
    current: RwLock<Arc<PeerSet>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<PeerSet> {
        self.current.read().clone()
    }

    /// Insert unless `id` is present. `spawn` runs under the write lock and
    /// only for a new peer. Returns the entry and whether it was created.
    pub fn insert_with<F>(&self, id: &PeerId, settings: PeerSettings, spawn: F) -> (PeerEntry, bool)
    where
        F: FnOnce(&PeerSettings) -> PeerHandle,
    {
        let mut current = self.current.write();
        if let Some(existing) = current.get(id) {
            return (existing.clone(), false);
        }

        let mut next = (**current).clone();
        let entry = PeerEntry {
            seq: next.next_seq,
            handle: spawn(&settings),
            settings,
        };
        next.next_seq += 1;
        next.peers.insert(id.clone(), entry.clone());
        *current = Arc::new(next);

        (entry, true)
    }

    pub fn remove(&self, id: &PeerId) -> Option<PeerEntry> {
        let mut current = self.current.write();
        if current.get(id).is_none() {
            return None;
        }

        let mut next = (**current).clone();
        let removed = next.peers.remove(id);
        *current = Arc::new(next);
        removed
    }
}
