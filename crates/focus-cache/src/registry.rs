//! Global and non-persistent group registration

use std::collections::HashSet;

use parking_lot::RwLock;

/// Process-wide record of which groups are global and which are memory-only.
///
/// Registration is additive and idempotent. A group may be both global and
/// non-persistent; non-persistence decides storage routing while globality
/// still decides key scope.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    global: RwLock<HashSet<String>>,
    non_persistent: RwLock<HashSet<String>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark groups as shared across tenants
    pub fn register_global<I, S>(&self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut global = self.global.write();
        for group in groups {
            global.insert(group.as_ref().to_string());
        }
    }

    /// Mark groups as never touching durable storage
    pub fn register_non_persistent<I, S>(&self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut non_persistent = self.non_persistent.write();
        for group in groups {
            non_persistent.insert(group.as_ref().to_string());
        }
    }

    pub fn is_global(&self, group: &str) -> bool {
        self.global.read().contains(group)
    }

    pub fn is_persistent(&self, group: &str) -> bool {
        !self.non_persistent.read().contains(group)
    }

    /// Registered global groups, sorted
    pub fn global_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.global.read().iter().cloned().collect();
        groups.sort();
        groups
    }

    /// Registered non-persistent groups, sorted
    pub fn non_persistent_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.non_persistent.read().iter().cloned().collect();
        groups.sort();
        groups
    }
}
