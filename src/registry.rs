//! Application-owned collection of clients for multi-connection programs.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::client::Client;

/// Map from application keys to clients.
///
/// There is no process-wide registry; create one where it is needed and
/// pass it around.
#[derive(Debug)]
pub struct ClientRegistry<K> {
    clients: RwLock<HashMap<K, Arc<Client>>>,
}

impl<K> Default for ClientRegistry<K> {
    fn default() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash> ClientRegistry<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, Arc<Client>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, Arc<Client>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `client` under `key`, returning the client it replaced.
    pub fn insert(&self, key: K, client: Client) -> Option<Arc<Client>> {
        self.insert_shared(key, Arc::new(client))
    }

    /// Register an already shared client.
    pub fn insert_shared(&self, key: K, client: Arc<Client>) -> Option<Arc<Client>> {
        self.write().insert(key, client)
    }

    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<Client>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.read().get(key).cloned()
    }

    /// Unregister a client. Its session is left as is.
    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<Client>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.write().remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Start the closing handshake on every registered client.
    ///
    /// Clients stay registered. Returns how many close frames could not be
    /// written.
    pub async fn disconnect_all(&self) -> usize {
        let clients: Vec<Arc<Client>> = self.read().values().cloned().collect();
        let mut failed = 0;
        for client in clients {
            if let Err(e) = client.disconnect().await {
                debug!(target = %client.target(), error = %e, "disconnect failed");
                failed += 1;
            }
        }
        failed
    }
}
