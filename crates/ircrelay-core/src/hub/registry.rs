//! Registry of connected downstream clients.
//!
//! Owned exclusively by the hub loop. Insertion order only matters for
//! iteration determinism; removal swaps the last entry into the hole.

use super::ClientId;
use crate::transport::IrcClient;
use std::sync::Arc;

/// A registered client and the id the hub issued for it.
pub(crate) struct ClientHandle {
    pub id: ClientId,
    pub client: Arc<dyn IrcClient>,
}

/// The authoritative set of currently connected clients.
pub(crate) struct ClientRegistry {
    clients: Vec<ClientHandle>,
    /// Monotonic id counter; ids are never reused within one hub.
    next_id: u64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Vec::new(),
            next_id: 1,
        }
    }

    /// Add a client and return its freshly issued id.
    pub fn insert(&mut self, client: Arc<dyn IrcClient>) -> ClientId {
        let id = ClientId(self.next_id);
        self.next_id += 1;
        self.clients.push(ClientHandle { id, client });
        id
    }

    /// Whether this exact connection is already registered.
    pub fn contains_connection(&self, client: &Arc<dyn IrcClient>) -> bool {
        let needle = Arc::as_ptr(client) as *const ();
        self.clients
            .iter()
            .any(|h| Arc::as_ptr(&h.client) as *const () == needle)
    }

    pub fn get(&self, index: usize) -> Option<&ClientHandle> {
        self.clients.get(index)
    }

    /// Remove the entry at `index`, moving the last entry into its slot.
    pub fn swap_remove(&mut self, index: usize) -> ClientHandle {
        self.clients.swap_remove(index)
    }

    /// Remove every entry.
    pub fn take_all(&mut self) -> Vec<ClientHandle> {
        std::mem::take(&mut self.clients)
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|h| h.id).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}
