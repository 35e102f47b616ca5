use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

/// Owns the peer connections of live viewers, keyed by session id.
///
/// Generic over the connection type so the bookkeeping can be tested
/// without a peer stack.
pub struct PeerRegistry<P> {
    peers: Mutex<HashMap<Uuid, Arc<P>>>,
}

impl<P> PeerRegistry<P> {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, id: Uuid, peer: Arc<P>) {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, peer);
    }

    /// Takes the connection out of the registry. At most one caller gets it.
    pub fn remove(&self, id: &Uuid) -> Option<Arc<P>> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Empties the registry, handing every connection to the caller.
    pub fn drain(&self) -> Vec<Arc<P>> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, peer)| peer)
            .collect()
    }
}

impl<P> Default for PeerRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
