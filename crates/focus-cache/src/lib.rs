//! # FOCUS Cache
//!
//! File-backed object cache for request/response applications.
//!
//! ## Features
//!
//! - **Groups**: keys live in named groups that can be deleted as a unit
//! - **Tenant scoping**: non-global groups are isolated per tenant id
//! - **Persistence**: one JSON container per group and scope, rewritten atomically
//! - **Non-persistent groups**: memory-only groups for the current instance
//! - **Counters**: `incr`/`decr` that never go below zero
//! - **Statistics**: hit and miss counts with a per-group breakdown
//!
//! ## Example
//!
//! ```no_run
//! use focus_cache::{CacheConfig, ObjectCache};
//!
//! # fn main() -> focus_cache::Result<()> {
//! let cache = ObjectCache::new(CacheConfig::with_cache_dir("/tmp/focus-cache"))?;
//! cache.add_global_groups(["users"]);
//!
//! cache.set("post:1", "Hello", "posts");
//! assert_eq!(cache.get::<String>("post:1", "posts").as_deref(), Some("Hello"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod lock;
pub mod metrics;
pub mod registry;
pub mod runtime;
pub mod storage;

pub use cache::{CacheBuilder, ObjectCache, DEFAULT_GROUP};
pub use config::{CacheConfig, ConfigLoader, WriteMode};
pub use error::{CacheError, Result};
pub use key::{KeyCodec, Scope};
pub use metrics::{CacheMetrics, CacheStats, GroupStats};
pub use registry::GroupRegistry;
pub use storage::{CacheEntry, ContainerStore, FileStore, GroupContainer, MemoryStore};
