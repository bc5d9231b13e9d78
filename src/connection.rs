use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};

use crate::driver::Interrupt;
use crate::owner::{Owner, OwnerKey, owner_label};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a connection's native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Closed,
    Open,
    Broken,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Open,
            2 => ConnectionState::Broken,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Closed => 0,
            ConnectionState::Open => 1,
            ConnectionState::Broken => 2,
        }
    }
}

pub(crate) struct Connection<H> {
    id: u64,
    connection_string: String,
    owner_key: OwnerKey,
    owner_name: String,
    owner_label: String,
    owner: Mutex<Option<Weak<dyn Owner>>>,
    persistent: bool,
    last_insert_row_id: AtomicI64,
    state: AtomicU8,
    // Set once the registry entry is gone; never cleared.
    released: AtomicBool,
    native: Mutex<Option<H>>,
}

/// Opaque, cloneable reference to a registered connection.
///
/// Callers use it only as a job target and to read connection metadata; the
/// native handle stays with the engine.
pub struct ConnectionRef<H> {
    inner: Arc<Connection<H>>,
}

impl<H> ConnectionRef<H> {
    pub(crate) fn new(connection_string: String, owner: &Arc<dyn Owner>, persistent: bool) -> Self {
        Self {
            inner: Arc::new(Connection {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                connection_string,
                owner_key: OwnerKey::of(owner.as_ref()),
                owner_name: owner.name().to_string(),
                owner_label: owner_label(owner.as_ref()),
                owner: Mutex::new(Some(Arc::downgrade(owner))),
                persistent,
                last_insert_row_id: AtomicI64::new(0),
                state: AtomicU8::new(ConnectionState::Closed.as_u8()),
                released: AtomicBool::new(false),
                native: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.inner.connection_string
    }

    /// Identity of the owner instance that opened this connection.
    #[must_use]
    pub fn owner_key(&self) -> OwnerKey {
        self.inner.owner_key
    }

    #[must_use]
    pub fn owner_name(&self) -> &str {
        &self.inner.owner_name
    }

    /// `name vX.Y` of the owner, kept after the owner reference is cleared.
    #[must_use]
    pub fn owner_label(&self) -> &str {
        &self.inner.owner_label
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.inner.persistent
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Row id of the last successful non-query on this connection, as of the
    /// most recently dispatched completion.
    #[must_use]
    pub fn last_insert_row_id(&self) -> i64 {
        self.inner.last_insert_row_id.load(Ordering::SeqCst)
    }

    /// True once the connection was closed through the registry or its owner was removed.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// The owner, if it is still registered and alive.
    #[must_use]
    pub fn owner(&self) -> Option<Arc<dyn Owner>> {
        lock(&self.inner.owner).as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.inner.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn set_last_insert_row_id(&self, id: i64) {
        self.inner.last_insert_row_id.store(id, Ordering::SeqCst);
    }

    pub(crate) fn interrupt(&self) -> Interrupt<'_> {
        Interrupt::new(&self.inner.released)
    }

    /// Lock the native slot. Only the worker holds this across a statement.
    pub(crate) fn native(&self) -> MutexGuard<'_, Option<H>> {
        lock(&self.inner.native)
    }

    /// Mark released and clear the owner reference. Returns false if already released.
    pub(crate) fn release(&self) -> bool {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        lock(&self.inner.owner).take();
        true
    }

    /// Drop the native handle unless a job is using it right now.
    ///
    /// Returns false when the slot is busy; the worker then closes it after the
    /// job because the connection is already released.
    pub(crate) fn try_close_native(&self) -> bool {
        let mut slot = match self.inner.native.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        slot.take();
        self.set_state(ConnectionState::Closed);
        true
    }

    /// Drop the native handle, waiting for the slot. Worker thread only.
    pub(crate) fn close_native(&self) {
        let mut slot = self.native();
        if slot.take().is_some() {
            tracing::trace!(connection = self.id(), "native handle closed");
        }
        self.set_state(ConnectionState::Closed);
    }
}

impl<H> Clone for ConnectionRef<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> PartialEq for ConnectionRef<H> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<H> Eq for ConnectionRef<H> {}

impl<H> fmt::Debug for ConnectionRef<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRef")
            .field("id", &self.id())
            .field("connection_string", &self.connection_string())
            .field("owner", &self.owner_label())
            .field("persistent", &self.is_persistent())
            .field("state", &self.state())
            .field("released", &self.is_released())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
