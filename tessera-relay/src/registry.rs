//! Connection registry: publishers and viewers by peer id.
//!
//! Two namespaces keyed by [`PeerId`], plus a reverse index from connection
//! to its single listing so deregistration never scans. All maps live
//! behind one lock; readers take ordered snapshots and send after the lock
//! is released.

use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::peer::{ConnectionId, PeerClass, PeerHandle, PeerId};

#[derive(Default)]
struct Namespaces {
    publishers: BTreeMap<PeerId, PeerHandle>,
    viewers: BTreeMap<PeerId, PeerHandle>,
    /// connection → where it is listed
    owners: HashMap<ConnectionId, (PeerClass, PeerId)>,
}

impl Namespaces {
    fn map_mut(&mut self, class: PeerClass) -> &mut BTreeMap<PeerId, PeerHandle> {
        match class {
            PeerClass::Publisher => &mut self.publishers,
            PeerClass::Viewer => &mut self.viewers,
        }
    }

    /// Remove whatever listing `handle` currently has.
    fn detach(&mut self, handle: &PeerHandle) -> Option<(PeerClass, PeerId)> {
        let (class, id) = self.owners.remove(&handle.id())?;
        let map = self.map_mut(class);
        if map.get(&id) == Some(handle) {
            map.remove(&id);
        }
        Some((class, id))
    }

    fn insert(&mut self, class: PeerClass, id: PeerId, handle: PeerHandle) -> Option<PeerHandle> {
        self.detach(&handle);
        self.owners.insert(handle.id(), (class, id.clone()));
        let previous = self.map_mut(class).insert(id, handle)?;
        // The superseded connection keeps running but is no longer reachable.
        self.owners.remove(&previous.id());
        Some(previous)
    }
}

/// Shared routing table for all sessions.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Namespaces>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher, replacing any handle under the same id.
    ///
    /// Returns the superseded handle. Its connection is not closed.
    pub async fn register_publisher(&self, id: PeerId, handle: PeerHandle) -> Option<PeerHandle> {
        let mut inner = self.inner.write().await;
        let previous = inner.insert(PeerClass::Publisher, id.clone(), handle);
        if let Some(ref old) = previous {
            log::warn!(
                "Publisher {id} re-registered; connection {} from {} is no longer routable but stays open",
                old.id(),
                old.remote_addr()
            );
        }
        previous
    }

    /// Register a viewer. Ids are generated, so a collision is unexpected;
    /// it is logged and resolved the same way as for publishers.
    pub async fn register_viewer(&self, id: PeerId, handle: PeerHandle) -> Option<PeerHandle> {
        let mut inner = self.inner.write().await;
        let previous = inner.insert(PeerClass::Viewer, id.clone(), handle);
        if let Some(ref old) = previous {
            log::warn!(
                "Viewer id {id} collided; connection {} from {} is no longer routable",
                old.id(),
                old.remote_addr()
            );
        }
        previous
    }

    /// Remove the entry owned by `handle`. Idempotent.
    pub async fn unregister(&self, handle: &PeerHandle) -> Option<(PeerClass, PeerId)> {
        let mut inner = self.inner.write().await;
        inner.detach(handle)
    }

    pub async fn lookup_publisher(&self, id: &PeerId) -> Option<PeerHandle> {
        self.inner.read().await.publishers.get(id).cloned()
    }

    /// Point-in-time copy of all publishers, ordered by id.
    pub async fn snapshot_publishers(&self) -> Vec<(PeerId, PeerHandle)> {
        let inner = self.inner.read().await;
        inner
            .publishers
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect()
    }

    /// Point-in-time copy of all viewers, ordered by id.
    pub async fn snapshot_viewers(&self) -> Vec<(PeerId, PeerHandle)> {
        let inner = self.inner.read().await;
        inner
            .viewers
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect()
    }

    pub async fn publisher_ids(&self) -> Vec<PeerId> {
        self.inner.read().await.publishers.keys().cloned().collect()
    }

    pub async fn publisher_count(&self) -> usize {
        self.inner.read().await.publishers.len()
    }

    pub async fn viewer_count(&self) -> usize {
        self.inner.read().await.viewers.len()
    }
}
