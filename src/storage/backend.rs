//! Storage backend abstraction.
//!
//! The persistence engine itself lives outside this crate. The server only
//! needs to hand a backend to resource handlers and to ask it where its
//! servers are for health checking.

use std::fmt;
use std::sync::Arc;

/// Storage contract as seen by the API server.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Addresses of the servers behind this backend.
    fn backends(&self) -> Vec<String>;

    /// Key prefix under which this backend stores objects.
    fn path_prefix(&self) -> &str {
        ""
    }
}

/// Shared handle to a storage backend.
pub type StorageHandle = Arc<dyn Storage>;

/// A backend described only by its server list, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticStorage {
    servers: Vec<String>,
    path_prefix: String,
}

impl StaticStorage {
    pub fn new(servers: Vec<String>, path_prefix: impl Into<String>) -> Self {
        Self {
            servers,
            path_prefix: path_prefix.into(),
        }
    }

    pub fn handle(self) -> StorageHandle {
        Arc::new(self)
    }
}

impl Storage for StaticStorage {
    fn backends(&self) -> Vec<String> {
        self.servers.clone()
    }

    fn path_prefix(&self) -> &str {
        &self.path_prefix
    }
}

/// Wrapping applied by resource handlers when they build their stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDecorator {
    /// Serve list and watch from an in-memory cache kept in sync with the backend.
    WatchCache,
    /// Talk to the backend directly.
    Undecorated,
}

impl StorageDecorator {
    pub fn from_watch_cache(enabled: bool) -> Self {
        if enabled {
            StorageDecorator::WatchCache
        } else {
            StorageDecorator::Undecorated
        }
    }

    pub fn is_cached(self) -> bool {
        self == StorageDecorator::WatchCache
    }
}
