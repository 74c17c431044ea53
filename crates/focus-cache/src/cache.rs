//! Object cache facade
//!
//! Mirrors the add/set/replace/incr/decr contract of memcached-style object
//! caches. Every outcome is a `bool` or an `Option`; storage problems are
//! logged and reported as `false`, never raised.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::{CacheConfig, ConfigLoader, WriteMode},
    error::Result,
    key::{KeyCodec, Scope},
    metrics::CacheStats,
    registry::GroupRegistry,
    runtime::{InsertMode, RuntimeCache, SlotId},
    storage::{CacheEntry, ContainerStore, FileStore},
};

/// Group used when an operation is given an empty group name
pub const DEFAULT_GROUP: &str = "default";

fn normalize_group(group: &str) -> &str {
    if group.is_empty() {
        DEFAULT_GROUP
    } else {
        group
    }
}

/// File-backed object cache
///
/// One instance corresponds to one request/process lifecycle. Independent
/// instances pointed at the same cache directory see each other's persistent
/// writes the next time they load the affected group.
pub struct ObjectCache {
    codec: KeyCodec,
    registry: GroupRegistry,
    runtime: RuntimeCache,
    tenant: AtomicU64,
    multisite: bool,
}

impl ObjectCache {
    /// Create a file-backed cache from a configuration
    pub fn new(config: CacheConfig) -> Result<Self> {
        CacheBuilder::new().config(config).build()
    }

    /// Create a cache configured from `FOCUS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ConfigLoader::new().load()?)
    }

    /// Mark groups as shared by every tenant
    pub fn add_global_groups<I, S>(&self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.register_global(groups);
    }

    /// Mark groups as memory-only
    pub fn add_non_persistent_groups<I, S>(&self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.register_non_persistent(groups);
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    pub fn current_tenant(&self) -> u64 {
        self.tenant.load(Ordering::Relaxed)
    }

    pub fn is_multisite(&self) -> bool {
        self.multisite
    }

    /// Scope and fully-qualified key for `key` in `group`
    fn address(&self, key: &str, group: &str) -> (SlotId, String) {
        let group = normalize_group(group);
        let scope = Scope::resolve(self.registry.is_global(group), self.current_tenant());
        let full_key = self.codec.derive(key, group, scope);
        let id = if self.registry.is_persistent(group) {
            SlotId::Persistent {
                scope,
                group: group.to_string(),
            }
        } else {
            SlotId::Volatile {
                group: group.to_string(),
            }
        };
        (id, full_key)
    }

    /// Fully-qualified key `key` would be stored under right now
    pub fn full_key(&self, key: &str, group: &str) -> String {
        self.address(key, group).1
    }

    /// Raw stored value. `force` re-reads a persistent group from disk first.
    ///
    /// `Some(Value::Null)` means a stored null; `None` means a miss.
    pub fn get_value(&self, key: &str, group: &str, force: bool) -> Option<Value> {
        let (id, full_key) = self.address(key, group);
        self.runtime.get(&id, &full_key, force)
    }

    /// Typed lookup. A value that does not deserialize as `T` reads as `None`
    /// but is still counted as a hit, since the key was present.
    pub fn get<T: DeserializeOwned>(&self, key: &str, group: &str) -> Option<T> {
        self.get_value(key, group, false)
            .and_then(|value| decode(key, value))
    }

    /// Typed lookup that bypasses the in-memory copy; decoding counts like `get`
    pub fn get_forced<T: DeserializeOwned>(&self, key: &str, group: &str) -> Option<T> {
        self.get_value(key, group, true)
            .and_then(|value| decode(key, value))
    }

    /// Look several keys up in one group; one hit or miss is counted per key
    pub fn get_multiple<I, S>(&self, keys: I, group: &str, force: bool) -> HashMap<String, Option<Value>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        keys.into_iter()
            .map(|key| {
                let key = key.as_ref();
                (key.to_string(), self.get_value(key, group, force))
            })
            .collect()
    }

    fn write<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        group: &str,
        ttl: Option<Duration>,
        mode: InsertMode,
    ) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!("Refusing to cache unserializable value for '{}': {}", key, e);
                return false;
            }
        };
        let (id, full_key) = self.address(key, group);
        self.runtime
            .insert(&id, &full_key, CacheEntry::new(value, ttl), mode)
    }

    /// Store unconditionally
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, group: &str) -> bool {
        self.write(key, value, group, None, InsertMode::Always)
    }

    pub fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        group: &str,
        ttl: Duration,
    ) -> bool {
        self.write(key, value, group, Some(ttl), InsertMode::Always)
    }

    /// Store only if the key is absent
    pub fn add<T: Serialize + ?Sized>(&self, key: &str, value: &T, group: &str) -> bool {
        self.write(key, value, group, None, InsertMode::IfAbsent)
    }

    pub fn add_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        group: &str,
        ttl: Duration,
    ) -> bool {
        self.write(key, value, group, Some(ttl), InsertMode::IfAbsent)
    }

    /// Store only if the key is present
    pub fn replace<T: Serialize + ?Sized>(&self, key: &str, value: &T, group: &str) -> bool {
        self.write(key, value, group, None, InsertMode::IfPresent)
    }

    pub fn replace_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        group: &str,
        ttl: Duration,
    ) -> bool {
        self.write(key, value, group, Some(ttl), InsertMode::IfPresent)
    }

    /// Remove a key; `false` if it was absent
    pub fn delete(&self, key: &str, group: &str) -> bool {
        let (id, full_key) = self.address(key, group);
        self.runtime.remove(&id, &full_key)
    }

    /// Add `offset` to an existing counter, never going below zero
    pub fn incr(&self, key: &str, offset: i64, group: &str) -> Option<i64> {
        let (id, full_key) = self.address(key, group);
        self.runtime.adjust(&id, &full_key, offset)
    }

    /// Subtract `offset` from an existing counter, never going below zero
    pub fn decr(&self, key: &str, offset: i64, group: &str) -> Option<i64> {
        self.incr(key, offset.saturating_neg(), group)
    }

    /// Remove every key of `group` in the current scope.
    ///
    /// Persistent groups report whether the removal completed, so an empty
    /// group still returns `true`. Non-persistent groups report whether
    /// anything was removed.
    pub fn delete_group(&self, group: &str) -> bool {
        let (id, _) = self.address("", group);
        debug!("Deleting group '{}'", id.group());
        self.runtime.clear_group(&id)
    }

    /// Remove everything in every group and scope
    pub fn flush(&self) -> bool {
        debug!("Flushing object cache");
        self.runtime.clear_all()
    }

    /// Change the tenant used for non-global groups.
    ///
    /// Ignored unless the cache is configured as multisite.
    pub fn switch_tenant(&self, tenant: u64) {
        if !self.multisite {
            debug!("Ignoring switch to tenant {} outside multisite", tenant);
            return;
        }
        let previous = self.tenant.swap(tenant, Ordering::Relaxed);
        debug!("Switched tenant {} -> {}", previous, tenant);
    }

    /// Counters plus a per-container breakdown
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.runtime.metrics().snapshot();
        stats.groups = self.runtime.group_stats();
        stats
    }

    pub fn hits(&self) -> u64 {
        self.runtime.metrics().hits()
    }

    pub fn misses(&self) -> u64 {
        self.runtime.metrics().misses()
    }

    /// Zero the counters
    pub fn reset_stats(&self) {
        self.runtime.metrics().reset();
    }

    /// Save containers with deferred writes. `true` when every save succeeded.
    pub fn close(&self) -> bool {
        self.runtime.save_dirty()
    }

    /// Drop the in-memory copy of every group so the next read goes to disk.
    ///
    /// Deferred writes are saved first. Non-persistent groups are lost.
    pub fn reset_runtime(&self) -> bool {
        self.runtime.forget()
    }
}

impl Drop for ObjectCache {
    fn drop(&mut self) {
        if !self.runtime.save_dirty() {
            warn!("Some deferred cache writes were lost on shutdown");
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!("Cached value for '{}' has an unexpected shape: {}", key, e);
            None
        }
    }
}

/// Builder pattern for cache construction
pub struct CacheBuilder {
    config: CacheConfig,
    store: Option<Arc<dyn ContainerStore>>,
    global_groups: Vec<String>,
    non_persistent_groups: Vec<String>,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            store: None,
            global_groups: Vec::new(),
            non_persistent_groups: Vec::new(),
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of a [`FileStore`] at `config.cache_dir`
    pub fn store(mut self, store: Arc<dyn ContainerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn global_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn non_persistent_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_persistent_groups
            .extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn write_mode(mut self, write_mode: WriteMode) -> Self {
        self.config.write_mode = write_mode;
        self
    }

    pub fn build(self) -> Result<ObjectCache> {
        self.config.validate()?;
        let config = self.config;

        let store = self.store.unwrap_or_else(|| {
            Arc::new(
                FileStore::new(&config.cache_dir)
                    .with_max_ttl(config.max_ttl_duration())
                    .with_locking(config.file_locking),
            )
        });

        let registry = GroupRegistry::new();
        registry.register_global(&self.global_groups);
        registry.register_non_persistent(&self.non_persistent_groups);

        debug!(
            "Object cache ready at {} (tenant {}, multisite {})",
            config.cache_dir.display(),
            config.initial_tenant,
            config.multisite
        );

        Ok(ObjectCache {
            codec: KeyCodec::new(config.key_salt.as_deref()),
            registry,
            runtime: RuntimeCache::new(store, config.write_mode, config.max_ttl_duration()),
            tenant: AtomicU64::new(config.initial_tenant),
            multisite: config.multisite,
        })
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::storage::MemoryStore;

    fn file_cache(dir: &TempDir) -> ObjectCache {
        ObjectCache::new(CacheConfig::with_cache_dir(dir.path())).unwrap()
    }

    fn multisite_cache(dir: &TempDir) -> ObjectCache {
        let mut config = CacheConfig::with_cache_dir(dir.path());
        config.multisite = true;
        ObjectCache::new(config).unwrap()
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        title: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_set_get_delete_scenario() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);

        assert!(cache.set("x", &5, "default"));
        assert_eq!(cache.get::<i64>("x", "default"), Some(5));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 0);

        assert!(cache.delete("x", "default"));
        assert_eq!(cache.get_value("x", "default", false), None);
        assert_eq!(cache.misses(), 1);
        assert!(!cache.delete("x", "default"));
    }

    #[test]
    fn test_empty_group_means_default() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);

        cache.set("k", "v", "");
        assert_eq!(cache.get::<String>("k", "default"), Some("v".to_string()));
        assert_eq!(cache.full_key("k", ""), cache.full_key("k", "default"));
    }

    #[test]
    fn test_values_are_copied_in_and_out() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);

        let mut post = Post {
            title: "alpha".into(),
            tags: vec!["a".into()],
        };
        cache.set("post", &post, "posts");
        post.title = "bravo".into();

        let mut fetched: Post = cache.get("post", "posts").unwrap();
        assert_eq!(fetched.title, "alpha");
        fetched.tags.push("mutated".into());

        let again: Post = cache.get("post", "posts").unwrap();
        assert_eq!(again.tags, vec!["a".to_string()]);
        assert_eq!(post.title, "bravo");
    }

    #[test]
    fn test_stored_null_and_false_are_hits() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);

        assert!(cache.add("nothing", &Value::Null, "default"));
        assert!(cache.set("no", &false, "default"));
        assert!(cache.reset_runtime());
        cache.reset_stats();

        assert_eq!(cache.get_value("nothing", "default", false), Some(Value::Null));
        assert_eq!(cache.get::<bool>("no", "default"), Some(false));
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn test_add_and_replace() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);

        assert!(!cache.replace("k", "v", "default"));
        assert_eq!(cache.get_value("k", "default", false), None);

        assert!(cache.add("k", "v1", "default"));
        assert!(!cache.add("k", "v2", "default"));
        assert_eq!(cache.get::<String>("k", "default").as_deref(), Some("v1"));

        assert!(cache.replace("k", "v3", "default"));
        assert_eq!(cache.get::<String>("k", "default").as_deref(), Some("v3"));
    }

    #[test]
    fn test_counters() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);

        assert_eq!(cache.incr("n", 1, "default"), None);
        assert_eq!(cache.decr("n", 1, "default"), None);
        assert_eq!(cache.hits() + cache.misses(), 0);

        cache.set("n", &0, "default");
        assert_eq!(cache.decr("n", 5, "default"), Some(0));
        assert_eq!(cache.incr("n", 3, "default"), Some(3));
        assert_eq!(cache.incr("n", -5, "default"), Some(0));
        assert_eq!(cache.decr("n", -2, "default"), Some(2));
        assert_eq!(cache.get::<i64>("n", "default"), Some(2));
    }

    #[test]
    fn test_groups_are_independent() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);

        cache.set("k", "one", "g1");
        cache.set("k", "two", "g2");
        assert_eq!(cache.get::<String>("k", "g1").as_deref(), Some("one"));
        assert_eq!(cache.get::<String>("k", "g2").as_deref(), Some("two"));
    }

    #[test]
    fn test_tenant_scoping() {
        let dir = TempDir::new().unwrap();
        let cache = multisite_cache(&dir);
        cache.add_global_groups(["global-cache-test"]);

        cache.set("k", "site-1", "default");
        cache.set("k", "shared", "global-cache-test");

        cache.switch_tenant(999);
        assert_eq!(cache.current_tenant(), 999);
        assert_eq!(cache.get_value("k", "default", false), None);
        assert_eq!(
            cache.get::<String>("k", "global-cache-test").as_deref(),
            Some("shared")
        );

        cache.set("k", "site-999", "default");
        cache.switch_tenant(1);
        assert_eq!(cache.get::<String>("k", "default").as_deref(), Some("site-1"));
    }

    #[test]
    fn test_switch_tenant_is_ignored_outside_multisite() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);

        cache.set("k", "v", "default");
        cache.switch_tenant(999);
        assert_eq!(cache.current_tenant(), 1);
        assert_eq!(cache.get::<String>("k", "default").as_deref(), Some("v"));
    }

    #[test]
    fn test_delete_group_asymmetry() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);
        cache.add_non_persistent_groups(["volatile"]);

        assert!(cache.delete_group("persistent"));
        assert!(!cache.delete_group("volatile"));

        cache.set("k", &1, "volatile");
        assert!(cache.delete_group("volatile"));
        assert!(!cache.delete_group("volatile"));
    }

    #[test]
    fn test_non_persistent_group_stays_off_disk() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);
        cache.add_non_persistent_groups(["counts"]);

        cache.set("k", &1, "counts");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        assert!(cache.reset_runtime());
        assert_eq!(cache.get_value("k", "counts", false), None);
    }

    #[test]
    fn test_flush_clears_every_scope() {
        let dir = TempDir::new().unwrap();
        let cache = multisite_cache(&dir);
        cache.add_non_persistent_groups(["volatile"]);

        cache.set("a", &1, "default");
        cache.set("b", &2, "volatile");
        cache.switch_tenant(2);
        cache.set("c", &3, "default");

        assert!(cache.flush());
        assert_eq!(cache.get_value("c", "default", false), None);
        cache.switch_tenant(1);
        assert_eq!(cache.get_value("a", "default", false), None);
        assert_eq!(cache.get_value("b", "volatile", false), None);
    }

    #[test]
    fn test_typed_get_with_wrong_shape_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);
        cache.set("k", "not a number", "default");
        assert_eq!(cache.get::<i64>("k", "default"), None);
        assert_eq!(cache.get_forced::<i64>("k", "default"), None);
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn test_get_multiple() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);
        cache.set("a", &1, "default");

        let found = cache.get_multiple(["a", "b"], "default", false);
        assert_eq!(found["a"], Some(json!(1)));
        assert_eq!(found["b"], None);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_set_with_ttl_keeps_expiry_on_disk() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);

        assert!(cache.set_with_ttl("k", "v", "default", Duration::from_secs(3600)));
        let store = FileStore::new(dir.path());
        let container = store.load(Scope::Tenant(1), "default");
        let entry = &container.entries[&cache.full_key("k", "default")];
        assert!(entry.expires_at.is_some());
    }

    #[test]
    fn test_ttl_beyond_calendar_range_is_kept_forever() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);
        let huge = Duration::from_secs(10_000_000_000_000);

        assert!(cache.set_with_ttl("k", "v", "default", huge));
        assert!(cache.add_with_ttl("a", "v", "default", huge));
        assert!(cache.replace_with_ttl("k", "w", "default", huge));
        assert_eq!(cache.get::<String>("k", "default").as_deref(), Some("w"));
        assert_eq!(cache.get_forced::<String>("a", "default").as_deref(), Some("v"));
    }

    #[test]
    fn test_max_ttl_beyond_calendar_range_never_expires() {
        let dir = TempDir::new().unwrap();
        let mut config = CacheConfig::with_cache_dir(dir.path());
        config.max_ttl = Some(10_000_000_000_000);
        let cache = ObjectCache::new(config).unwrap();

        assert!(cache.set("k", "v", "default"));
        assert_eq!(cache.get_value("k", "default", false), Some(json!("v")));
        assert_eq!(cache.get_value("k", "default", true), Some(json!("v")));
    }

    #[test]
    fn test_deferred_writes_saved_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let mut config = CacheConfig::with_cache_dir(dir.path());
            config.write_mode = WriteMode::Deferred;
            let cache = ObjectCache::new(config).unwrap();
            cache.set("k", "v", "default");
            assert!(FileStore::new(dir.path())
                .load(Scope::Tenant(1), "default")
                .is_empty());
        }

        let reader = file_cache(&dir);
        assert_eq!(reader.get::<String>("k", "default").as_deref(), Some("v"));
    }

    #[test]
    fn test_builder_with_memory_store() {
        let cache = CacheBuilder::new()
            .store(Arc::new(MemoryStore::new()))
            .global_groups(["users"])
            .non_persistent_groups(["plugins"])
            .build()
            .unwrap();

        assert!(cache.registry().is_global("users"));
        assert!(!cache.registry().is_persistent("plugins"));
        assert!(cache.set("k", "v", "users"));
        assert_eq!(cache.full_key("k", "users"), ":global:users:k");
    }

    #[test]
    fn test_salt_prefixes_keys() {
        let dir = TempDir::new().unwrap();
        let mut config = CacheConfig::with_cache_dir(dir.path());
        config.key_salt = Some("prod".into());
        let cache = ObjectCache::new(config).unwrap();
        assert_eq!(cache.full_key("k", "posts"), "prod:1:posts:k");
    }

    #[test]
    fn test_stats_lists_groups() {
        let dir = TempDir::new().unwrap();
        let cache = file_cache(&dir);
        cache.add_non_persistent_groups(["volatile"]);
        cache.set("a", &1, "default");
        cache.set("b", &2, "volatile");
        cache.get::<i64>("a", "default");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count(), 2);
        assert_eq!(stats.groups.len(), 2);
        assert!(stats.groups.iter().any(|g| g.group == "volatile" && !g.persistent));
    }
}
