//! Dual-mode tag store.
//!
//! The store owns the live map, the history map and the flag telling which
//! of them is active. One reader/writer lock guards map membership and the
//! active pointer; a separate re-entrant mutex serializes mode switches and
//! can be held by callers that must not see the mode change in the middle of
//! a multi-step operation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{
    ReentrantMutex, ReentrantMutexGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard,
    RwLockWriteGuard,
};
use tracing::info;

use tagsync_core::TagId;

use crate::entry::TagEntry;

/// Map from tag id to cache entry.
pub type TagMap = HashMap<TagId, Arc<TagEntry>>;

/// Which map answers lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    #[default]
    Live,
    History,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::History => f.write_str("history"),
        }
    }
}

#[derive(Debug, Default)]
struct Maps {
    live: TagMap,
    history: TagMap,
    mode: CacheMode,
}

impl Maps {
    fn active(&self) -> &TagMap {
        match self.mode {
            CacheMode::Live => &self.live,
            CacheMode::History => &self.history,
        }
    }
}

/// The live and history maps behind one lock.
#[derive(Debug, Default)]
pub struct TagCacheStore {
    maps: RwLock<Maps>,
    mode_lock: ReentrantMutex<()>,
}

/// Shared access to the maps.
pub struct StoreReadGuard<'a>(RwLockReadGuard<'a, Maps>);

impl StoreReadGuard<'_> {
    /// The map currently answering lookups.
    pub fn active(&self) -> &TagMap {
        self.0.active()
    }

    /// The live map.
    pub fn live(&self) -> &TagMap {
        &self.0.live
    }

    /// The history map (empty in live mode).
    pub fn history(&self) -> &TagMap {
        &self.0.history
    }

    /// Current mode.
    pub fn mode(&self) -> CacheMode {
        self.0.mode
    }

    /// Returns true in history mode.
    pub fn is_history_mode(&self) -> bool {
        self.0.mode == CacheMode::History
    }
}

/// Exclusive access to the maps, for structural changes.
pub struct StoreWriteGuard<'a>(RwLockWriteGuard<'a, Maps>);

impl StoreWriteGuard<'_> {
    /// The map currently answering lookups.
    pub fn active(&self) -> &TagMap {
        self.0.active()
    }

    /// Mutable access to the active map.
    pub fn active_mut(&mut self) -> &mut TagMap {
        let maps = &mut *self.0;
        match maps.mode {
            CacheMode::Live => &mut maps.live,
            CacheMode::History => &mut maps.history,
        }
    }

    /// The live map.
    pub fn live(&self) -> &TagMap {
        &self.0.live
    }

    /// Mutable access to the live map.
    pub fn live_mut(&mut self) -> &mut TagMap {
        &mut self.0.live
    }

    /// The history map.
    pub fn history(&self) -> &TagMap {
        &self.0.history
    }

    /// Mutable access to the history map.
    pub fn history_mut(&mut self) -> &mut TagMap {
        &mut self.0.history
    }

    /// Returns true in history mode.
    pub fn is_history_mode(&self) -> bool {
        self.0.mode == CacheMode::History
    }
}

impl TagCacheStore {
    /// Creates an empty store in live mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the shared lock.
    ///
    /// Guards must not be held while calling listeners or awaiting.
    pub fn read(&self) -> StoreReadGuard<'_> {
        StoreReadGuard(self.maps.read())
    }

    /// Acquires the exclusive lock.
    pub fn write(&self) -> StoreWriteGuard<'_> {
        StoreWriteGuard(self.maps.write())
    }

    /// Acquires the mode-switch lock.
    ///
    /// While the guard is held no other thread can switch modes. The lock is
    /// re-entrant, so the holder may itself call [`set_history_mode`].
    ///
    /// [`set_history_mode`]: TagCacheStore::set_history_mode
    pub fn lock_mode(&self) -> ReentrantMutexGuard<'_, ()> {
        self.mode_lock.lock()
    }

    /// Current mode.
    pub fn mode(&self) -> CacheMode {
        self.maps.read().mode
    }

    /// Returns true in history mode.
    pub fn is_history_mode(&self) -> bool {
        self.mode() == CacheMode::History
    }

    /// Number of entries in the live map.
    pub fn live_size(&self) -> usize {
        self.maps.read().live.len()
    }

    /// Number of entries in the active map.
    pub fn active_size(&self) -> usize {
        self.maps.read().active().len()
    }

    /// Switches between live and history mode.
    ///
    /// Entering history mode copies every live entry into the history map and
    /// moves its listeners onto the copy; live entries keep receiving push
    /// updates but notify nobody. Leaving history mode moves the listeners
    /// back and drops the history map. The copy pass runs under an
    /// upgradable read lock so lookups are not blocked; only the final swap
    /// takes the write lock.
    ///
    /// Returns false if the store already was in the requested mode.
    pub fn set_history_mode(&self, enable: bool) -> bool {
        let _switch = self.mode_lock.lock();
        let target = if enable { CacheMode::History } else { CacheMode::Live };

        let maps = self.maps.upgradable_read();
        if maps.mode == target {
            info!(mode = %target, "Cache already in requested mode");
            return false;
        }

        if enable {
            let mut history = TagMap::with_capacity(maps.live.len());
            for (id, live) in &maps.live {
                let copy = live.clone_detached();
                copy.adopt_listeners(live.take_listeners());
                history.insert(*id, Arc::new(copy));
            }

            let mut maps = RwLockUpgradableReadGuard::upgrade(maps);
            maps.history = history;
            maps.mode = CacheMode::History;
            info!(entries = maps.history.len(), "History mode enabled");
        } else {
            for (id, copy) in &maps.history {
                let listeners = copy.take_listeners();
                if let Some(live) = maps.live.get(id) {
                    live.adopt_listeners(listeners);
                }
            }

            let mut maps = RwLockUpgradableReadGuard::upgrade(maps);
            maps.history.clear();
            maps.mode = CacheMode::Live;
            info!(entries = maps.live.len(), "History mode disabled");
        }

        true
    }
}
