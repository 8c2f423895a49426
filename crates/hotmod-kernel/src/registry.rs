//! Version registry
//!
//! Maps module names to their currently active [`LoadedUnit`]. Publishing
//! to one name is serialised by a per-module lock; reads only take a short
//! read lock on the slot and never wait for a publisher's follow-up work.

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::cell::Cell;
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::{debug, info};

use crate::unit::{LoadedCode, LoadedUnit, ModuleName};

/// Publisher-side state, only touched while holding the publish lock
struct PublishState {
    /// Last assigned version
    version: Cell<u64>,
    /// Re-entrant acquisition depth of the owning thread
    depth: Cell<u32>,
}

/// Per-module registry slot
struct ModuleSlot {
    /// Serialises publishers
    publish_lock: ReentrantMutex<PublishState>,
    /// Thread holding `publish_lock`, if any
    publisher: Mutex<Option<ThreadId>>,
    /// Currently published unit
    current: RwLock<Option<LoadedUnit>>,
}

impl ModuleSlot {
    fn new() -> Self {
        Self {
            publish_lock: ReentrantMutex::new(PublishState {
                version: Cell::new(0),
                depth: Cell::new(0),
            }),
            publisher: Mutex::new(None),
            current: RwLock::new(None),
        }
    }
}

/// Held publish lock that records its owning thread
struct PublishGuard<'a> {
    slot: &'a ModuleSlot,
    state: parking_lot::ReentrantMutexGuard<'a, PublishState>,
}

impl<'a> PublishGuard<'a> {
    fn acquire(slot: &'a ModuleSlot) -> Self {
        let state = slot.publish_lock.lock();
        if state.depth.get() == 0 {
            *slot.publisher.lock() = Some(std::thread::current().id());
        }
        state.depth.set(state.depth.get() + 1);
        Self { slot, state }
    }
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        let depth = self.state.depth.get() - 1;
        self.state.depth.set(depth);
        if depth == 0 {
            *self.slot.publisher.lock() = None;
        }
    }
}

/// Result of a publish: the unit it replaced and the unit now current
#[derive(Debug, Clone)]
pub struct Swap {
    pub previous: Option<LoadedUnit>,
    pub current: LoadedUnit,
}

/// Registry of the current unit per module
pub struct VersionRegistry {
    slots: DashMap<ModuleName, Arc<ModuleSlot>>,
}

impl VersionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    fn slot(&self, name: &ModuleName) -> Arc<ModuleSlot> {
        if let Some(slot) = self.slots.get(name.as_str()) {
            return slot.clone();
        }
        self.slots
            .entry(name.clone())
            .or_insert_with(|| Arc::new(ModuleSlot::new()))
            .clone()
    }

    /// Install `code` as the current unit for `name` and return the unit it
    /// replaced, if any.
    pub fn publish(&self, name: impl Into<ModuleName>, code: LoadedCode) -> Option<LoadedUnit> {
        self.swap(&name.into(), code).previous
    }

    /// Install `code` as current and return both sides of the swap
    pub fn swap(&self, name: &ModuleName, code: LoadedCode) -> Swap {
        self.swap_then(name, code, |_| ()).0
    }

    /// Publish and run `after` while still holding the module's publish lock.
    ///
    /// Readers are not blocked while `after` runs; other publishers to the
    /// same module are, so work done in `after` (such as notifying
    /// subscribers) happens in publish order. `after` may publish to the same
    /// module again from the same thread.
    pub fn swap_then<R>(
        &self,
        name: &ModuleName,
        code: LoadedCode,
        after: impl FnOnce(&Swap) -> R,
    ) -> (Swap, R) {
        let slot = self.slot(name);
        let guard = PublishGuard::acquire(&slot);
        let swap = self.install(name, &slot, &guard, code);
        let result = after(&swap);
        drop(guard);
        (swap, result)
    }

    /// Like [`swap_then`](Self::swap_then), but checks `proceed` once the
    /// publish lock is held and publishes nothing when it returns false.
    pub fn try_swap_then<R>(
        &self,
        name: &ModuleName,
        code: LoadedCode,
        proceed: impl FnOnce() -> bool,
        after: impl FnOnce(&Swap) -> R,
    ) -> Option<(Swap, R)> {
        let slot = self.slot(name);
        let guard = PublishGuard::acquire(&slot);
        if !proceed() {
            debug!("Publish of {} abandoned under the publish lock", name);
            return None;
        }
        let swap = self.install(name, &slot, &guard, code);
        let result = after(&swap);
        drop(guard);
        Some((swap, result))
    }

    fn install(
        &self,
        name: &ModuleName,
        slot: &ModuleSlot,
        guard: &PublishGuard<'_>,
        code: LoadedCode,
    ) -> Swap {
        let version = guard.state.version.get() + 1;
        guard.state.version.set(version);

        let unit = LoadedUnit::sealed(name.clone(), version, code);
        let previous = slot.current.write().replace(unit.clone());

        match &previous {
            Some(prev) => info!(
                "Module {} swapped v{} -> v{}",
                name,
                prev.version(),
                version
            ),
            None => info!("Module {} published v{}", name, version),
        }

        Swap {
            previous,
            current: unit,
        }
    }

    /// Whether the calling thread is inside a publish of `name`, including
    /// the subscriber notifications run under its publish lock
    pub fn is_publishing(&self, name: &str) -> bool {
        let current = std::thread::current().id();
        self.slots
            .get(name)
            .is_some_and(|slot| *slot.publisher.lock() == Some(current))
    }

    /// The currently published unit for `name`
    pub fn current(&self, name: &str) -> Option<LoadedUnit> {
        self.slots
            .get(name)
            .and_then(|slot| slot.current.read().clone())
    }

    /// The current unit for the fallback's module, or the fallback itself
    pub fn latest_or(&self, fallback: &LoadedUnit) -> LoadedUnit {
        self.current(fallback.name().as_str())
            .unwrap_or_else(|| fallback.clone())
    }

    /// Whether a unit is currently published for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.current(name).is_some()
    }

    /// Names of all modules with a current unit
    pub fn modules(&self) -> Vec<ModuleName> {
        let mut names: Vec<ModuleName> = self
            .slots
            .iter()
            .filter(|entry| entry.value().current.read().is_some())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Number of modules with a current unit
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().current.read().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Withdraw the current unit for `name`.
    ///
    /// Version numbering continues where it left off if the module is
    /// published again.
    pub fn remove(&self, name: &str) -> Option<LoadedUnit> {
        let slot = self.slots.get(name).map(|slot| slot.clone())?;
        let _publishing = PublishGuard::acquire(&slot);
        let removed = slot.current.write().take();
        if let Some(unit) = &removed {
            debug!("Module {} withdrawn at v{}", name, unit.version());
        }
        removed
    }

    /// Withdraw every current unit
    pub fn clear(&self) {
        let names: Vec<ModuleName> = self.slots.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.remove(name.as_str());
        }
    }
}

impl Default for VersionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
