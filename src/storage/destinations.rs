//! Storage destinations per API group.
//!
//! # Responsibilities
//! - Map (group, resource) to the backend that persists it
//! - Let single resources override their group's default backend
//! - Report every backend address for health checking
//!
//! # Design Decisions
//! - Populated during assembly only; read-only (and freely shared) afterwards
//! - Unknown groups resolve to `None` and log an error instead of panicking

use std::collections::{BTreeSet, HashMap};

use crate::config::schema::StorageConfig;
use crate::storage::backend::{StaticStorage, StorageHandle};

/// Backends of a single API group.
#[derive(Debug, Default, Clone)]
pub struct GroupDestinations {
    pub default: Option<StorageHandle>,
    pub overrides: HashMap<String, StorageHandle>,
}

/// Mapping from API group and resource to storage.
#[derive(Debug, Default, Clone)]
pub struct StorageDestinations {
    api_groups: HashMap<String, GroupDestinations>,
}

impl StorageDestinations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build destinations from configured server lists.
    pub fn from_config(config: &StorageConfig) -> Self {
        let mut destinations = Self::new();
        for group in &config.groups {
            let storage = StaticStorage::new(group.servers.clone(), config.path_prefix.clone());
            destinations.add_api_group(&group.group, Some(storage.handle()));
        }
        for o in &config.overrides {
            let storage = StaticStorage::new(o.servers.clone(), config.path_prefix.clone());
            destinations.add_storage_override(&o.group, &o.resource, storage.handle());
        }
        destinations
    }

    /// Register a group with its default backend. Replaces any earlier entry.
    pub fn add_api_group(&mut self, group: &str, default: Option<StorageHandle>) {
        self.api_groups.insert(
            group.to_string(),
            GroupDestinations {
                default,
                overrides: HashMap::new(),
            },
        );
    }

    /// Register a resource-specific backend, creating the group if needed.
    pub fn add_storage_override(&mut self, group: &str, resource: &str, storage: StorageHandle) {
        self.api_groups
            .entry(group.to_string())
            .or_default()
            .overrides
            .insert(resource.to_string(), storage);
    }

    /// Resolve the backend for a resource: override, then group default.
    pub fn get(&self, group: &str, resource: &str) -> Option<StorageHandle> {
        let Some(destinations) = self.api_groups.get(group) else {
            tracing::error!(group = %group, resource = %resource, "No storage defined for API group");
            return None;
        };
        destinations
            .overrides
            .get(resource)
            .or(destinations.default.as_ref())
            .cloned()
    }

    pub fn contains_group(&self, group: &str) -> bool {
        self.api_groups.contains_key(group)
    }

    /// Every backend address across all groups and overrides, deduplicated and sorted.
    pub fn backends(&self) -> Vec<String> {
        let mut addresses = BTreeSet::new();
        for group in self.api_groups.values() {
            let storages = group.default.iter().chain(group.overrides.values());
            for storage in storages {
                addresses.extend(storage.backends());
            }
        }
        addresses.into_iter().collect()
    }
}
