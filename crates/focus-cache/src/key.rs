//! Fully-qualified key derivation
//!
//! A stored slot is addressed by `salt:scope:group:key`. The salt and group are
//! percent-encoded, so neither contains `:` or a path separator, and the scope
//! is either a decimal tenant id or the `global` sentinel. Every component
//! before the raw key is therefore `:`-free, which makes the derivation
//! injective: two distinct `(scope, group, key)` triples never share a
//! fully-qualified key.

use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};

/// Sentinel used in place of a tenant id for global groups
pub const GLOBAL_SCOPE: &str = "global";

/// Namespace a key lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Per-tenant storage
    Tenant(u64),
    /// Shared by every tenant
    Global,
}

impl Scope {
    /// Pick the scope for a group given whether it is registered global
    pub fn resolve(is_global: bool, tenant: u64) -> Self {
        if is_global {
            Scope::Global
        } else {
            Scope::Tenant(tenant)
        }
    }

    /// Directory segment used by the file store
    pub fn as_segment(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Tenant(id) => write!(f, "{}", id),
            Scope::Global => f.write_str(GLOBAL_SCOPE),
        }
    }
}

/// Make a string safe to use as a single path segment.
///
/// Percent-encodes everything outside `[A-Za-z0-9_.~-]`, including `%`
/// itself, so distinct inputs always stay distinct.
pub fn sanitize(segment: &str) -> Cow<'_, str> {
    urlencoding::encode(segment)
}

/// Derives fully-qualified keys from raw keys
#[derive(Debug, Clone, Default)]
pub struct KeyCodec {
    salt: String,
}

impl KeyCodec {
    /// Create a codec with an optional deployment-wide salt
    pub fn new(salt: Option<&str>) -> Self {
        Self {
            salt: salt.map(|s| sanitize(s).into_owned()).unwrap_or_default(),
        }
    }

    /// The sanitized salt
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Build the fully-qualified key for `key` in `group` under `scope`
    pub fn derive(&self, key: &str, group: &str, scope: Scope) -> String {
        format!("{}:{}:{}:{}", self.salt, scope, sanitize(group), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_layout() {
        let codec = KeyCodec::default();
        assert_eq!(codec.derive("x", "default", Scope::Tenant(1)), ":1:default:x");
        assert_eq!(codec.derive("x", "users", Scope::Global), ":global:users:x");
    }

    #[test]
    fn test_salt_is_sanitized() {
        let codec = KeyCodec::new(Some("site:a/b"));
        assert_eq!(codec.salt(), "site%3Aa%2Fb");
        assert_eq!(
            codec.derive("k", "g", Scope::Tenant(2)),
            "site%3Aa%2Fb:2:g:k"
        );
    }

    #[test]
    fn test_sanitize_strips_path_separators() {
        let clean = sanitize("../etc/passwd\0");
        assert!(!clean.contains('/'));
        assert!(!clean.contains('\\'));
        assert!(!clean.contains('\0'));
    }

    #[test]
    fn test_sanitize_keeps_similar_groups_apart() {
        assert_ne!(sanitize("a/b"), sanitize("ab"));
        assert_ne!(sanitize("a/b"), sanitize("a%2Fb"));
        assert_ne!(sanitize("a:b"), sanitize("a_b"));
    }

    #[test]
    fn test_colons_in_keys_do_not_collide_across_groups() {
        let codec = KeyCodec::default();
        let a = codec.derive("b:c", "a", Scope::Tenant(1));
        let b = codec.derive("c", "a:b", Scope::Tenant(1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_scope_resolve() {
        assert_eq!(Scope::resolve(true, 7), Scope::Global);
        assert_eq!(Scope::resolve(false, 7), Scope::Tenant(7));
        assert_eq!(Scope::Tenant(7).as_segment(), "7");
        assert_eq!(Scope::Global.as_segment(), "global");
    }
}
