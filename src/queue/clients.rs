use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use crate::error::{QueueError, Result};
use crate::ident::{ClientId, WuId};
use crate::model::Client;

/// Known workers, keyed by id. Heartbeats refresh `last_seen`; the
/// periodic sweep evicts workers silent beyond the TTL and the caller
/// requeues whatever they held.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Client) -> ClientId {
        let id = client.id.clone();
        tracing::info!(client = %id, group = %client.group, "client registered");
        self.clients.insert(id.clone(), client);
        id
    }

    pub fn heartbeat(&mut self, id: &ClientId) -> Result<()> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| QueueError::not_found(format!("client {}", id)))?;
        client.heartbeat();
        Ok(())
    }

    pub fn get(&self, id: &ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn get_mut(&mut self, id: &ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    pub fn set_suspended(&mut self, id: &ClientId, suspended: bool) -> Result<()> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| QueueError::not_found(format!("client {}", id)))?;
        client.suspended = suspended;
        Ok(())
    }

    /// Record a checkout on the client's bookkeeping.
    pub fn assign(&mut self, id: &ClientId, wuid: WuId) {
        if let Some(client) = self.clients.get_mut(id) {
            client.current_work.insert(wuid);
            client.busy = true;
            client.total_checkout += 1;
        }
    }

    /// Clear a finished checkout from the client's bookkeeping.
    pub fn finish(&mut self, id: &ClientId, wuid: &WuId, success: bool) {
        if let Some(client) = self.clients.get_mut(id) {
            client.current_work.remove(wuid);
            client.busy = !client.current_work.is_empty();
            if success {
                client.total_completed += 1;
            } else {
                client.total_failed += 1;
            }
        }
    }

    /// Drop a single checkout without counting it either way (used
    /// when a stale checkout is reclaimed by the sweep).
    pub fn unassign(&mut self, id: &ClientId, wuid: &WuId) {
        if let Some(client) = self.clients.get_mut(id) {
            client.current_work.remove(wuid);
            client.busy = !client.current_work.is_empty();
        }
    }

    /// Remove clients whose last heartbeat is older than `ttl` and
    /// return them; the caller requeues their checkouts.
    pub fn evict_stale(&mut self, ttl: Duration) -> Vec<Client> {
        let now = Utc::now();
        let stale: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| !c.is_alive(ttl, now))
            .map(|c| c.id.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.clients.remove(&id))
            .collect()
    }

    pub fn deregister(&mut self, id: &ClientId) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn all(&self) -> Vec<&Client> {
        self.clients.values().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
