//! Durable container storage
//!
//! One container per `(scope, group)`. The file store lays them out as
//! `<root>/<scope>/<sanitized group>.json` and always rewrites a container
//! whole, through a temporary file renamed into place.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{CacheError, IoOperation, Result},
    key::{sanitize, Scope, GLOBAL_SCOPE},
    lock::ContainerLock,
};

const CONTAINER_EXTENSION: &str = "json";
const CONTAINER_FORMAT_VERSION: u32 = 1;

/// Pending per-key changes: `Some` is an upsert, `None` a delete
pub type ChangeSet = HashMap<String, Option<CacheEntry>>;

/// A stored value with its timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached data
    pub value: serde_json::Value,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
    /// When the entry expires, if it was written with a TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Create a new entry stamped now.
    ///
    /// A TTL too large to represent as a timestamp never expires.
    pub fn new(value: serde_json::Value, ttl: Option<std::time::Duration>) -> Self {
        let stored_at = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| Duration::from_std(ttl).ok())
            .and_then(|ttl| stored_at.checked_add_signed(ttl));

        Self {
            value,
            stored_at,
            expires_at,
        }
    }

    /// Whether the entry is past its own expiry or older than `max_ttl`
    pub fn is_expired_at(&self, now: DateTime<Utc>, max_ttl: Option<Duration>) -> bool {
        if self.expires_at.is_some_and(|expires| now > expires) {
            return true;
        }
        max_ttl
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .is_some_and(|deadline| now > deadline)
    }
}

/// All entries of one group under one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupContainer {
    #[serde(default = "default_version")]
    pub version: u32,
    pub group: String,
    pub scope: Scope,
    #[serde(default)]
    pub entries: HashMap<String, CacheEntry>,
}

fn default_version() -> u32 {
    CONTAINER_FORMAT_VERSION
}

impl GroupContainer {
    pub fn new(scope: Scope, group: impl Into<String>) -> Self {
        Self {
            version: CONTAINER_FORMAT_VERSION,
            group: group.into(),
            scope,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&mut self, now: DateTime<Utc>, max_ttl: Option<Duration>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired_at(now, max_ttl));
        before - self.entries.len()
    }

    /// Apply upserts and deletes
    pub fn apply(&mut self, changes: &ChangeSet) {
        for (key, change) in changes {
            match change {
                Some(entry) => {
                    self.entries.insert(key.clone(), entry.clone());
                }
                None => {
                    self.entries.remove(key);
                }
            }
        }
    }

    /// Approximate serialized size of the entries in bytes
    pub fn size_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|(key, entry)| {
                let value_len = serde_json::to_string(&entry.value)
                    .map(|s| s.len())
                    .unwrap_or(0);
                (key.len() + value_len) as u64
            })
            .sum()
    }
}

/// Durable storage for group containers
///
/// `load` fails open: a missing or unreadable container comes back empty.
/// Writes report failure so the caller can turn it into a `false` result.
pub trait ContainerStore: Send + Sync {
    /// Load the container for `(scope, group)`, empty if absent or corrupt
    fn load(&self, scope: Scope, group: &str) -> GroupContainer;

    /// Replace the stored container with `container`
    fn save(&self, container: &GroupContainer) -> Result<()>;

    /// Remove one container. Succeeds when nothing was there.
    fn delete_group(&self, scope: Scope, group: &str) -> Result<()>;

    /// Remove every container of every scope
    fn flush_all(&self) -> Result<()>;

    /// Every stored `(scope, group)` pair
    fn containers(&self) -> Result<Vec<(Scope, String)>>;

    /// Whether saves should go through [`ContainerStore::update`]
    fn merges_on_save(&self) -> bool {
        false
    }

    /// Read-modify-write: re-read the container, apply `changes`, save it and
    /// return the merged result
    fn update(&self, scope: Scope, group: &str, changes: &ChangeSet) -> Result<GroupContainer> {
        let mut container = self.load(scope, group);
        container.apply(changes);
        self.save(&container)?;
        Ok(container)
    }
}

/// File-backed container store
pub struct FileStore {
    root: PathBuf,
    max_ttl: Option<Duration>,
    locking: bool,
    temp_counter: AtomicU64,
}

impl FileStore {
    /// Create a store rooted at `root`. Nothing is created until the first save.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_ttl: None,
            locking: false,
            temp_counter: AtomicU64::new(0),
        }
    }

    /// Treat entries older than `max_ttl` as absent
    pub fn with_max_ttl(mut self, max_ttl: Option<std::time::Duration>) -> Self {
        self.max_ttl = max_ttl.and_then(|ttl| Duration::from_std(ttl).ok());
        self
    }

    /// Serialize writers across processes with advisory lock files
    pub fn with_locking(mut self, locking: bool) -> Self {
        self.locking = locking;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the container file for `(scope, group)`
    pub fn container_path(&self, scope: Scope, group: &str) -> PathBuf {
        self.root
            .join(scope.as_segment())
            .join(format!("{}.{}", sanitize(group), CONTAINER_EXTENSION))
    }

    fn lock_path(container_path: &Path) -> PathBuf {
        let mut name = container_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn temp_path(&self, container_path: &Path) -> PathBuf {
        let sequence = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let file_name = container_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        container_path.with_file_name(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            sequence
        ))
    }

    fn read_container(&self, path: &Path, scope: Scope, group: &str) -> Result<GroupContainer> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(GroupContainer::new(scope, group));
            }
            Err(e) => return Err(CacheError::io(path, IoOperation::Read, e)),
        };

        let mut container: GroupContainer =
            serde_json::from_str(&content).map_err(|e| CacheError::Deserialization {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let expired = container.purge_expired(Utc::now(), self.max_ttl);
        if expired > 0 {
            debug!("Dropped {} expired entries from {}", expired, path.display());
        }
        Ok(container)
    }

    fn write_container(&self, path: &Path, container: &GroupContainer) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CacheError::io(parent, IoOperation::Write, e))?;
        }

        let mut container_to_write = container.clone();
        container_to_write.purge_expired(Utc::now(), self.max_ttl);

        let json = serde_json::to_string(&container_to_write).map_err(|e| {
            CacheError::Serialization {
                message: format!("Failed to serialize container {}: {}", path.display(), e),
            }
        })?;

        let temp_path = self.temp_path(path);
        if let Err(e) = fs::write(&temp_path, json) {
            let _ = fs::remove_file(&temp_path);
            return Err(CacheError::io(temp_path, IoOperation::Write, e));
        }
        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(CacheError::io(path, IoOperation::Write, e));
        }

        debug!(
            "Saved {} entries to {}",
            container_to_write.len(),
            path.display()
        );
        Ok(())
    }

    fn parse_scope(segment: &str) -> Option<Scope> {
        if segment == GLOBAL_SCOPE {
            return Some(Scope::Global);
        }
        segment.parse::<u64>().ok().map(Scope::Tenant)
    }
}

impl ContainerStore for FileStore {
    fn load(&self, scope: Scope, group: &str) -> GroupContainer {
        let path = self.container_path(scope, group);

        let _guard = if self.locking && path.exists() {
            match ContainerLock::shared(&Self::lock_path(&path)) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!("Reading {} without a lock: {}", path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        match self.read_container(&path, scope, group) {
            Ok(container) => container,
            Err(e) => {
                warn!("Treating unreadable container as empty: {}", e);
                GroupContainer::new(scope, group)
            }
        }
    }

    fn save(&self, container: &GroupContainer) -> Result<()> {
        let path = self.container_path(container.scope, &container.group);
        let _guard = if self.locking {
            Some(ContainerLock::exclusive(&Self::lock_path(&path))?)
        } else {
            None
        };
        self.write_container(&path, container)
    }

    fn delete_group(&self, scope: Scope, group: &str) -> Result<()> {
        let path = self.container_path(scope, group);
        let _guard = if self.locking && path.exists() {
            Some(ContainerLock::exclusive(&Self::lock_path(&path))?)
        } else {
            None
        };

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted container {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, IoOperation::Delete, e)),
        }
    }

    fn flush_all(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::io(&self.root, IoOperation::Read, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&self.root, IoOperation::Read, e))?;
            let path = entry.path();
            let is_scope_dir = path.is_dir()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(Self::parse_scope)
                    .is_some();
            if is_scope_dir {
                match fs::remove_dir_all(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::io(path, IoOperation::Delete, e)),
                }
            }
        }

        debug!("Flushed every container under {}", self.root.display());
        Ok(())
    }

    fn containers(&self) -> Result<Vec<(Scope, String)>> {
        let scopes = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.root, IoOperation::Read, e)),
        };

        let mut found = Vec::new();
        for scope_entry in scopes.flatten() {
            let scope_path = scope_entry.path();
            let Some(scope) = scope_path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(Self::parse_scope)
            else {
                continue;
            };
            let files = fs::read_dir(&scope_path)
                .map_err(|e| CacheError::io(&scope_path, IoOperation::Read, e))?;
            for file in files.flatten() {
                let path = file.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some(CONTAINER_EXTENSION) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                if stem.starts_with('.') {
                    continue;
                }
                if let Ok(group) = urlencoding::decode(stem) {
                    found.push((scope, group.into_owned()));
                }
            }
        }

        found.sort();
        Ok(found)
    }

    fn merges_on_save(&self) -> bool {
        self.locking
    }

    fn update(&self, scope: Scope, group: &str, changes: &ChangeSet) -> Result<GroupContainer> {
        let path = self.container_path(scope, group);
        let _guard = if self.locking {
            Some(ContainerLock::exclusive(&Self::lock_path(&path))?)
        } else {
            None
        };

        let mut container = match self.read_container(&path, scope, group) {
            Ok(container) => container,
            Err(e) => {
                warn!("Overwriting unreadable container: {}", e);
                GroupContainer::new(scope, group)
            }
        };
        container.apply(changes);
        self.write_container(&path, &container)?;
        Ok(container)
    }
}

/// In-memory container store for embedding without a filesystem and for tests
///
/// Drops entries past their own expiry; `max_ttl` is left to the runtime cache.
#[derive(Default)]
pub struct MemoryStore {
    containers: RwLock<HashMap<(Scope, String), GroupContainer>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContainerStore for MemoryStore {
    fn load(&self, scope: Scope, group: &str) -> GroupContainer {
        let mut container = self
            .containers
            .read()
            .get(&(scope, group.to_string()))
            .cloned()
            .unwrap_or_else(|| GroupContainer::new(scope, group));
        container.purge_expired(Utc::now(), None);
        container
    }

    fn save(&self, container: &GroupContainer) -> Result<()> {
        let mut stored = container.clone();
        stored.purge_expired(Utc::now(), None);
        self.containers
            .write()
            .insert((stored.scope, stored.group.clone()), stored);
        Ok(())
    }

    fn delete_group(&self, scope: Scope, group: &str) -> Result<()> {
        self.containers.write().remove(&(scope, group.to_string()));
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        self.containers.write().clear();
        Ok(())
    }

    fn containers(&self) -> Result<Vec<(Scope, String)>> {
        let mut found: Vec<(Scope, String)> = self.containers.read().keys().cloned().collect();
        found.sort();
        Ok(found)
    }
}
