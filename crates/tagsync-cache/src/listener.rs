//! Listener interfaces exposed to cache users.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tagsync_core::{Tag, TagId};

/// Receives value updates for subscribed tags.
///
/// Callbacks run on whichever thread applied the update (a push-update
/// transport thread, a subscription worker or the caller of `subscribe`).
/// The cache never holds one of its own locks while calling a listener, so a
/// listener may call back into the cache.
pub trait TagListener: Send + Sync {
    /// Called with a snapshot of the tag after every change.
    fn on_update(&self, tag: &Tag);

    /// Called once per subscription call with the initial snapshots, when the
    /// subscriber asked for separate initial delivery.
    ///
    /// The default implementation forwards each snapshot to [`on_update`].
    ///
    /// [`on_update`]: TagListener::on_update
    fn on_initial_update(&self, tags: &[Tag]) {
        for tag in tags {
            self.on_update(tag);
        }
    }
}

/// Shared handle to a [`TagListener`], compared by identity.
///
/// Two handles are equal when they point to the same listener allocation.
/// Keep a clone of the handle used for subscribing to unsubscribe later.
#[derive(Clone)]
pub struct ListenerHandle(Arc<dyn TagListener>);

impl ListenerHandle {
    /// Wraps a listener.
    pub fn new(listener: Arc<dyn TagListener>) -> Self {
        Self(listener)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl std::ops::Deref for ListenerHandle {
    type Target = dyn TagListener;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl<L: TagListener + 'static> From<Arc<L>> for ListenerHandle {
    fn from(listener: Arc<L>) -> Self {
        Self(listener)
    }
}

impl PartialEq for ListenerHandle {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl Eq for ListenerHandle {}

impl Hash for ListenerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.addr() as usize).hash(state);
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerHandle({:p})", self.addr())
    }
}

/// Observes tags entering and leaving the cache.
///
/// Used for instance by a playback controller to learn which tags need
/// historical backfill.
pub trait TagSubscriptionListener: Send + Sync {
    /// Tags that were added to the cache by a subscription.
    fn on_new_tag_subscriptions(&self, ids: &BTreeSet<TagId>);

    /// Tags that were removed from the cache because nobody listens to them
    /// anymore.
    fn on_unsubscribe(&self, ids: &BTreeSet<TagId>);
}

/// How a subscriber receives the current values of the tags it subscribes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitialDelivery {
    /// Through [`TagListener::on_update`], one call per tag.
    #[default]
    Inline,
    /// Through a single [`TagListener::on_initial_update`] call.
    Separate,
}
