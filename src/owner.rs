//! Caller identity and removal notification.
//!
//! An [`Owner`] is whatever dynamically loaded unit submits SQL work. The engine
//! only needs a name for log attribution and a way to hear about removal so
//! connections left behind can be reclaimed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Callback fired when an owner is removed. Receives the owner's name.
pub type RemovalHook = Box<dyn Fn(&str) + Send + Sync>;

/// Handle returned by [`Owner::subscribe_removed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Identity of one live owner instance.
///
/// Two owners sharing a name (an unloaded plugin and its reloaded
/// replacement) still get distinct keys. A key stays unique while any `Arc`
/// or `Weak` to the owner exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerKey(usize);

impl OwnerKey {
    #[must_use]
    pub fn of(owner: &dyn Owner) -> Self {
        Self(std::ptr::from_ref(owner).cast::<()>() as usize)
    }
}

/// The removal-aware identity of a caller.
pub trait Owner: Send + Sync {
    /// Display name for log attribution. Not unique: connections are keyed by [`OwnerKey`].
    fn name(&self) -> &str;

    /// Version string, used only in log output.
    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Register `hook` to run when this owner is removed.
    fn subscribe_removed(&self, hook: RemovalHook) -> SubscriptionToken;

    /// Drop a hook registered with [`Owner::subscribe_removed`]. Unknown tokens are ignored.
    fn unsubscribe(&self, token: SubscriptionToken);
}

/// `name vX.Y` label for log fields.
pub(crate) fn owner_label(owner: &dyn Owner) -> String {
    format!("{} v{}", owner.name(), owner.version())
}

type SharedHook = Arc<dyn Fn(&str) + Send + Sync>;

/// In-process [`Owner`] whose removal is triggered explicitly with [`LocalOwner::remove`].
pub struct LocalOwner {
    name: String,
    version: String,
    hooks: Mutex<Vec<(SubscriptionToken, SharedHook)>>,
    next_token: AtomicU64,
    removed: AtomicBool,
}

impl LocalOwner {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            version: version.into(),
            hooks: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            removed: AtomicBool::new(false),
        })
    }

    /// Fire every removal hook once. Later calls do nothing.
    ///
    /// Hooks run against a snapshot, so they may unsubscribe themselves while firing.
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        let snapshot: Vec<SharedHook> = self
            .lock_hooks()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in snapshot {
            hook(&self.name);
        }
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock_hooks().len()
    }

    fn lock_hooks(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionToken, SharedHook)>> {
        match self.hooks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Owner for LocalOwner {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn subscribe_removed(&self, hook: RemovalHook) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.lock_hooks().push((token, Arc::from(hook)));
        token
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.lock_hooks().retain(|(t, _)| *t != token);
    }
}

impl fmt::Debug for LocalOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalOwner")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("subscribers", &self.subscriber_count())
            .field("removed", &self.is_removed())
            .finish()
    }
}
