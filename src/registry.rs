use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, warn};

use crate::connection::{ConnectionRef, ConnectionState};
use crate::owner::{Owner, OwnerKey, SubscriptionToken, owner_label};

/// Owner-scoped table of open connections.
///
/// At most one connection exists per (owner instance, connection string).
/// Owners are told apart by [`OwnerKey`], never by name. The first
/// connection an owner opens subscribes a removal hook; closing its last
/// connection unsubscribes it again.
pub struct ConnectionRegistry<H> {
    inner: Arc<Mutex<RegistryState<H>>>,
}

struct RegistryState<H> {
    owners: HashMap<OwnerKey, OwnerEntry<H>>,
}

struct OwnerEntry<H> {
    // Also pins the owner's allocation, so its key cannot be reused while registered.
    owner: Weak<dyn Owner>,
    label: String,
    token: Option<SubscriptionToken>,
    connections: HashMap<String, ConnectionRef<H>>,
}

impl<H: Send + 'static> ConnectionRegistry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryState {
                owners: HashMap::new(),
            })),
        }
    }

    /// Register a connection for `owner`, or return the one already registered
    /// under the same connection string. An existing entry keeps its original
    /// persistence flag.
    pub fn open(
        &self,
        connection_string: &str,
        owner: &Arc<dyn Owner>,
        persistent: bool,
    ) -> ConnectionRef<H> {
        let key = OwnerKey::of(owner.as_ref());
        let (conn, first_for_owner) = {
            let mut state = self.lock();
            if let Some(existing) = state
                .owners
                .get(&key)
                .and_then(|entry| entry.connections.get(connection_string))
            {
                warn!(
                    owner = %owner_label(owner.as_ref()),
                    connection = connection_string,
                    "connection already open for owner; returning existing connection"
                );
                return existing.clone();
            }

            let conn = ConnectionRef::new(connection_string.to_string(), owner, persistent);
            let first_for_owner = !state.owners.contains_key(&key);
            state
                .owners
                .entry(key)
                .or_insert_with(|| OwnerEntry {
                    owner: Arc::downgrade(owner),
                    label: owner_label(owner.as_ref()),
                    token: None,
                    connections: HashMap::new(),
                })
                .connections
                .insert(connection_string.to_string(), conn.clone());
            (conn, first_for_owner)
        };

        if first_for_owner {
            self.subscribe(key, owner);
        }
        debug!(
            owner = %conn.owner_label(),
            connection = conn.id(),
            target = connection_string,
            persistent,
            "connection registered"
        );
        conn
    }

    /// Unregister `conn` and close its native handle. Closing an unknown or
    /// already-closed connection does nothing.
    pub fn close(&self, conn: &ConnectionRef<H>) {
        if !conn.release() {
            return;
        }

        let key = conn.owner_key();
        let emptied = {
            let mut state = self.lock();
            let emptied = match state.owners.get_mut(&key) {
                Some(entry) => {
                    if entry
                        .connections
                        .get(conn.connection_string())
                        .is_some_and(|registered| registered == conn)
                    {
                        entry.connections.remove(conn.connection_string());
                    }
                    entry.connections.is_empty()
                }
                None => false,
            };
            if emptied {
                state.owners.remove(&key)
            } else {
                None
            }
        };

        close_native(conn);
        if let Some(entry) = emptied {
            unsubscribe(&entry);
        }
        debug!(owner = %conn.owner_label(), connection = conn.id(), "connection closed");
    }

    /// Force-close everything the owner instance `owner` still holds and drop its hook.
    ///
    /// Other live owners with the same name are untouched.
    pub fn on_owner_removed(&self, owner: OwnerKey) {
        let Some(entry) = self.lock().owners.remove(&owner) else {
            return;
        };

        for conn in entry.connections.values() {
            if conn.state() != ConnectionState::Closed {
                warn!(
                    owner = %conn.owner_label(),
                    connection = conn.id(),
                    target = conn.connection_string(),
                    "owner removed with connection still open; force-closing leaked connection"
                );
            }
            conn.release();
            close_native(conn);
        }
        unsubscribe(&entry);
        debug!(
            owner = %entry.label,
            reclaimed = entry.connections.len(),
            "owner connections reclaimed"
        );
    }

    /// Close every registered connection. Used when the engine shuts down.
    pub fn close_all(&self) {
        let owners: Vec<OwnerEntry<H>> = self.lock().owners.drain().map(|(_, e)| e).collect();
        for entry in &owners {
            for conn in entry.connections.values() {
                conn.release();
                close_native(conn);
            }
            unsubscribe(entry);
        }
        if !owners.is_empty() {
            debug!(owners = owners.len(), "closed all registered connections");
        }
    }

    #[must_use]
    pub fn get(&self, owner: &dyn Owner, connection_string: &str) -> Option<ConnectionRef<H>> {
        self.lock()
            .owners
            .get(&OwnerKey::of(owner))
            .and_then(|entry| entry.connections.get(connection_string).cloned())
    }

    #[must_use]
    pub fn connections_for(&self, owner: &dyn Owner) -> Vec<ConnectionRef<H>> {
        self.lock()
            .owners
            .get(&OwnerKey::of(owner))
            .map(|entry| entry.connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a removal hook is currently held for `owner`.
    #[must_use]
    pub fn is_subscribed(&self, owner: &dyn Owner) -> bool {
        self.lock()
            .owners
            .get(&OwnerKey::of(owner))
            .is_some_and(|entry| entry.token.is_some())
    }

    /// Number of registered connections across all owners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock()
            .owners
            .values()
            .map(|entry| entry.connections.len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn subscribe(&self, key: OwnerKey, owner: &Arc<dyn Owner>) {
        let registry = Arc::downgrade(&self.inner);
        let token = owner.subscribe_removed(Box::new(move |_name: &str| {
            if let Some(inner) = registry.upgrade() {
                ConnectionRegistry { inner }.on_owner_removed(key);
            }
        }));

        let mut state = self.lock();
        match state.owners.get_mut(&key) {
            Some(entry) if entry.token.is_none() => entry.token = Some(token),
            _ => {
                drop(state);
                owner.unsubscribe(token);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<H>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn close_native<H>(conn: &ConnectionRef<H>) {
    if !conn.try_close_native() {
        debug!(
            connection = conn.id(),
            "connection busy with a running job; worker closes it when the job finishes"
        );
    }
}

fn unsubscribe<H>(entry: &OwnerEntry<H>) {
    if let (Some(owner), Some(token)) = (entry.owner.upgrade(), entry.token) {
        owner.unsubscribe(token);
    }
}

impl<H: Send + 'static> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Clone for ConnectionRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> fmt::Debug for ConnectionRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}
