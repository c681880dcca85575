use std::collections::{hash_map, HashMap, HashSet};

use libp2p::PeerId;

/// Tracks which peers must survive connection pruning.
///
/// A peer stays protected while at least one tag holds it.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    protected: HashMap<PeerId, HashSet<String>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protect(&mut self, peer_id: PeerId, tag: &str) {
        let _ignored = self
            .protected
            .entry(peer_id)
            .or_default()
            .insert(tag.to_owned());
    }

    /// Releases `tag` on `peer_id`, returning whether the peer is still
    /// protected by some other tag.
    pub fn unprotect(&mut self, peer_id: PeerId, tag: &str) -> bool {
        let hash_map::Entry::Occupied(mut entry) = self.protected.entry(peer_id) else {
            return false;
        };

        let _ignored = entry.get_mut().remove(tag);

        if entry.get().is_empty() {
            let _ignored = entry.remove();
            return false;
        }

        true
    }

    #[must_use]
    pub fn is_protected(&self, peer_id: &PeerId) -> bool {
        self.protected.contains_key(peer_id)
    }

    /// Unprotected peers to disconnect so that at most `max_peers` remain.
    #[must_use]
    pub fn prune_candidates(&self, connected: &[PeerId], max_peers: usize) -> Vec<PeerId> {
        let excess = connected.len().saturating_sub(max_peers);

        connected
            .iter()
            .filter(|peer_id| !self.is_protected(peer_id))
            .take(excess)
            .copied()
            .collect()
    }
}
