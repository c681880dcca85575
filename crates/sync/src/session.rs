#[cfg(test)]
#[path = "tests/session.rs"]
mod tests;

use core::fmt;
use std::collections::HashSet;
use std::sync::Arc;

use blocksync_network::{Host, PeerId};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::SyncError;

/// Peers we have an outstanding block request with.
///
/// Membership decides how inbound payloads from a peer are decoded, so the
/// set is only reachable through lock guards. Every insertion protects the
/// peer's connection and every removal unprotects it.
pub struct SessionTracker {
    syncing: RwLock<HashSet<PeerId>>,
    host: Arc<dyn Host>,
    tag: String,
}

impl fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTracker")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl SessionTracker {
    pub fn new(host: Arc<dyn Host>, tag: impl Into<String>) -> Self {
        Self {
            syncing: RwLock::default(),
            host,
            tag: tag.into(),
        }
    }

    pub async fn read(&self) -> SessionsRead<'_> {
        SessionsRead {
            syncing: self.syncing.read().await,
        }
    }

    /// Exclusive access. Hold the guard across everything that must look
    /// atomic to readers, including the network send a new session depends on.
    pub async fn write(&self) -> SessionsWrite<'_> {
        SessionsWrite {
            syncing: self.syncing.write().await,
            host: &*self.host,
            tag: &self.tag,
        }
    }

    pub async fn is_syncing(&self, peer: &PeerId) -> bool {
        self.read().await.is_syncing(peer)
    }

    pub async fn end(&self, peer: &PeerId) -> bool {
        self.write().await.end(peer)
    }

    pub async fn len(&self) -> usize {
        self.syncing.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.syncing.read().await.is_empty()
    }
}

#[derive(Debug)]
pub struct SessionsRead<'a> {
    syncing: RwLockReadGuard<'a, HashSet<PeerId>>,
}

impl SessionsRead<'_> {
    #[must_use]
    pub fn is_syncing(&self, peer: &PeerId) -> bool {
        self.syncing.contains(peer)
    }
}

#[derive(Debug)]
pub struct SessionsWrite<'a> {
    syncing: RwLockWriteGuard<'a, HashSet<PeerId>>,
    host: &'a dyn Host,
    tag: &'a str,
}

impl SessionsWrite<'_> {
    #[must_use]
    pub fn is_syncing(&self, peer: &PeerId) -> bool {
        self.syncing.contains(peer)
    }

    /// Registers a session with `peer` and protects its connection. Leaves
    /// everything untouched if one is already registered.
    pub fn try_begin(&mut self, peer: PeerId) -> Result<(), SyncError> {
        if !self.syncing.insert(peer) {
            return Err(SyncError::AlreadySyncing { peer });
        }

        self.host.protect(peer, self.tag);

        Ok(())
    }

    /// Removes the session with `peer`, if any, and unprotects its
    /// connection. Returns whether there was one.
    pub fn end(&mut self, peer: &PeerId) -> bool {
        if !self.syncing.remove(peer) {
            return false;
        }

        self.host.unprotect(*peer, self.tag);

        true
    }
}
