//! In-process container cache in front of a [`ContainerStore`]
//!
//! Each `(scope, group)` container lives in its own slot behind its own
//! mutex, so file I/O for one group never stalls another. The outer map lock
//! is only held long enough to find or create a slot.

use std::{collections::HashMap, sync::Arc};

use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::WriteMode,
    key::Scope,
    metrics::{CacheMetrics, GroupStats},
    storage::{CacheEntry, ChangeSet, ContainerStore, GroupContainer},
};

/// Identifies one in-memory container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotId {
    /// A durable container for one scope
    Persistent { scope: Scope, group: String },
    /// The single process-wide container of a non-persistent group
    Volatile { group: String },
}

impl SlotId {
    pub fn group(&self) -> &str {
        match self {
            SlotId::Persistent { group, .. } | SlotId::Volatile { group } => group,
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, SlotId::Persistent { .. })
    }
}

/// Precondition for [`RuntimeCache::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Overwrite unconditionally
    Always,
    /// Only when the key is absent
    IfAbsent,
    /// Only when the key is present
    IfPresent,
}

struct GroupSlot {
    container: GroupContainer,
    loaded: bool,
    /// Changes made here since the container was last saved
    pending: ChangeSet,
    dirty: bool,
    /// Dropped from the slot map by a flush or reset; callers must re-fetch
    retired: bool,
}

impl GroupSlot {
    fn new(id: &SlotId) -> Self {
        let (scope, group) = match id {
            SlotId::Persistent { scope, group } => (*scope, group.as_str()),
            SlotId::Volatile { group } => (Scope::Global, group.as_str()),
        };
        Self {
            container: GroupContainer::new(scope, group),
            loaded: !id.is_persistent(),
            pending: ChangeSet::new(),
            dirty: false,
            retired: false,
        }
    }

    fn record(&mut self, key: &str, change: Option<CacheEntry>) {
        self.pending.insert(key.to_string(), change);
    }
}

/// Runtime cache: group containers plus hit/miss counters
pub struct RuntimeCache {
    slots: RwLock<HashMap<SlotId, Arc<Mutex<GroupSlot>>>>,
    store: Arc<dyn ContainerStore>,
    metrics: CacheMetrics,
    max_ttl: Option<Duration>,
    write_mode: WriteMode,
}

impl RuntimeCache {
    pub fn new(
        store: Arc<dyn ContainerStore>,
        write_mode: WriteMode,
        max_ttl: Option<std::time::Duration>,
    ) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            store,
            metrics: CacheMetrics::new(),
            max_ttl: max_ttl.and_then(|ttl| Duration::from_std(ttl).ok()),
            write_mode,
        }
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    fn slot(&self, id: &SlotId) -> Arc<Mutex<GroupSlot>> {
        if let Some(slot) = self.slots.read().get(id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(
            slots
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(GroupSlot::new(id)))),
        )
    }

    /// Run `f` against the current slot for `id` with its lock held
    fn with_slot<R>(&self, id: &SlotId, f: impl FnOnce(&mut GroupSlot) -> R) -> R {
        loop {
            let slot = self.slot(id);
            let mut slot = slot.lock();
            if slot.retired {
                continue;
            }
            return f(&mut *slot);
        }
    }

    /// Empty the slot map, retiring every slot. With `save`, dirty
    /// containers are written out first.
    ///
    /// The map stays write-locked throughout, so no new slot can load from
    /// storage until `then` has run.
    fn retire_all(&self, save: bool, then: impl FnOnce() -> bool) -> bool {
        let mut slots = self.slots.write();
        let mut all_saved = true;
        for (id, slot) in slots.drain() {
            let mut slot = slot.lock();
            if save && slot.dirty && !self.save_slot(&id, &mut slot) {
                all_saved = false;
            }
            slot.container.entries.clear();
            slot.pending.clear();
            slot.dirty = false;
            slot.retired = true;
        }
        let done = then();
        all_saved && done
    }

    fn ensure_loaded(&self, id: &SlotId, slot: &mut GroupSlot) {
        if slot.loaded {
            return;
        }
        if let SlotId::Persistent { scope, group } = id {
            let mut container = self.store.load(*scope, group);
            container.apply(&slot.pending);
            slot.container = container;
            debug!(
                "Loaded {} entries for group '{}' in scope {}",
                slot.container.len(),
                group,
                scope
            );
        }
        slot.loaded = true;
    }

    fn reload(&self, id: &SlotId, slot: &mut GroupSlot) {
        slot.loaded = false;
        self.ensure_loaded(id, slot);
    }

    /// Live entry for `key`, dropping it from memory if it has expired
    fn live_entry<'a>(&self, slot: &'a mut GroupSlot, key: &str) -> Option<&'a mut CacheEntry> {
        let expired = slot
            .container
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired_at(Utc::now(), self.max_ttl));
        if expired {
            slot.container.entries.remove(key);
            self.metrics.record_expirations(1);
            return None;
        }
        slot.container.entries.get_mut(key)
    }

    /// Push a mutated persistent container towards storage per the write mode
    fn persist(&self, id: &SlotId, slot: &mut GroupSlot) -> bool {
        if !id.is_persistent() {
            return true;
        }
        match self.write_mode {
            WriteMode::Deferred => {
                slot.dirty = true;
                true
            }
            WriteMode::Immediate => self.save_slot(id, slot),
        }
    }

    fn save_slot(&self, id: &SlotId, slot: &mut GroupSlot) -> bool {
        let SlotId::Persistent { scope, group } = id else {
            return true;
        };

        let result = if self.store.merges_on_save() {
            self.store
                .update(*scope, group, &slot.pending)
                .map(|merged| slot.container = merged)
        } else {
            let expired = slot.container.purge_expired(Utc::now(), self.max_ttl);
            self.metrics.record_expirations(expired);
            self.store.save(&slot.container)
        };

        match result {
            Ok(()) => {
                slot.pending.clear();
                slot.dirty = false;
                true
            }
            Err(e) => {
                warn!("Failed to save group '{}' in scope {}: {}", group, scope, e);
                self.metrics.record_write_failure();
                slot.dirty = true;
                false
            }
        }
    }

    /// Look a key up, counting a hit or a miss.
    ///
    /// With `bypass` set, a persistent container is re-read from storage
    /// first (keeping any unsaved local changes on top).
    pub fn get(&self, id: &SlotId, key: &str, bypass: bool) -> Option<Value> {
        self.with_slot(id, |slot| {
            if bypass && id.is_persistent() {
                self.reload(id, slot);
            } else {
                self.ensure_loaded(id, slot);
            }

            match self.live_entry(slot, key) {
                Some(entry) => {
                    self.metrics.record_hit();
                    Some(entry.value.clone())
                }
                None => {
                    self.metrics.record_miss();
                    None
                }
            }
        })
    }

    /// Whether a live entry exists, without touching the counters
    pub fn contains(&self, id: &SlotId, key: &str) -> bool {
        self.with_slot(id, |slot| {
            self.ensure_loaded(id, slot);
            self.live_entry(slot, key).is_some()
        })
    }

    /// Store `entry` under `key` if `mode` allows it.
    ///
    /// Returns `false` when the precondition fails (nothing changes) or when
    /// the write could not be saved (the in-memory value is still updated).
    pub fn insert(&self, id: &SlotId, key: &str, entry: CacheEntry, mode: InsertMode) -> bool {
        self.with_slot(id, |slot| {
            self.ensure_loaded(id, slot);

            let present = self.live_entry(slot, key).is_some();
            let allowed = match mode {
                InsertMode::Always => true,
                InsertMode::IfAbsent => !present,
                InsertMode::IfPresent => present,
            };
            if !allowed {
                return false;
            }

            slot.container
                .entries
                .insert(key.to_string(), entry.clone());
            if id.is_persistent() {
                slot.record(key, Some(entry));
            }
            self.persist(id, slot)
        })
    }

    /// Remove `key`. `false` when it was absent or the removal failed to save.
    pub fn remove(&self, id: &SlotId, key: &str) -> bool {
        self.with_slot(id, |slot| {
            self.ensure_loaded(id, slot);

            if self.live_entry(slot, key).is_none() {
                return false;
            }
            slot.container.entries.remove(key);
            if id.is_persistent() {
                slot.record(key, None);
            }
            self.persist(id, slot)
        })
    }

    /// Add `offset` to the integer at `key`, clamping at zero.
    ///
    /// `None` when the key is absent or the result could not be saved.
    pub fn adjust(&self, id: &SlotId, key: &str, offset: i64) -> Option<i64> {
        self.with_slot(id, |slot| -> Option<i64> {
            self.ensure_loaded(id, slot);

            let entry = self.live_entry(slot, key)?;
            let next = counter_value(&entry.value).saturating_add(offset).max(0);
            entry.value = Value::from(next);
            let updated = entry.clone();

            if id.is_persistent() {
                slot.record(key, Some(updated));
            }
            self.persist(id, slot).then_some(next)
        })
    }

    /// Empty one container.
    ///
    /// Persistent containers are also removed from storage and report whether
    /// that completed. Volatile containers report whether anything was there.
    pub fn clear_group(&self, id: &SlotId) -> bool {
        self.with_slot(id, |slot| match id {
            SlotId::Volatile { .. } => {
                let had_entries = !slot.container.is_empty();
                slot.container.entries.clear();
                had_entries
            }
            SlotId::Persistent { scope, group } => {
                slot.container.entries.clear();
                slot.pending.clear();
                slot.dirty = false;
                slot.loaded = true;
                match self.store.delete_group(*scope, group) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Failed to delete group '{}' in scope {}: {}", group, scope, e);
                        self.metrics.record_write_failure();
                        slot.loaded = false;
                        false
                    }
                }
            }
        })
    }

    /// Drop every container in memory and on disk
    pub fn clear_all(&self) -> bool {
        self.retire_all(false, || match self.store.flush_all() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to flush cache storage: {}", e);
                self.metrics.record_write_failure();
                false
            }
        })
    }

    /// Save every dirty persistent container. `true` when all saves succeeded.
    pub fn save_dirty(&self) -> bool {
        let slots: Vec<(SlotId, Arc<Mutex<GroupSlot>>)> = self
            .slots
            .read()
            .iter()
            .filter(|(id, _)| id.is_persistent())
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut all_saved = true;
        for (id, slot) in slots {
            let mut slot = slot.lock();
            if slot.dirty && !self.save_slot(&id, &mut slot) {
                all_saved = false;
            }
        }
        all_saved
    }

    /// Forget every in-memory container after saving dirty ones
    pub fn forget(&self) -> bool {
        self.retire_all(true, || true)
    }

    /// Sizes of the containers currently in memory
    pub fn group_stats(&self) -> Vec<GroupStats> {
        let slots: Vec<(SlotId, Arc<Mutex<GroupSlot>>)> = self
            .slots
            .read()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut stats: Vec<GroupStats> = slots
            .into_iter()
            .map(|(id, slot)| {
                let slot = slot.lock();
                let scope = match &id {
                    SlotId::Persistent { scope, .. } => Some(*scope),
                    SlotId::Volatile { .. } => None,
                };
                GroupStats {
                    group: id.group().to_string(),
                    scope,
                    persistent: id.is_persistent(),
                    entries: slot.container.len(),
                    size_bytes: slot.container.size_bytes(),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.group.cmp(&b.group).then(a.scope.cmp(&b.scope)));
        stats
    }
}

/// Integer view of a stored value for counter arithmetic
fn counter_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}
