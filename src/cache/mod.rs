//! Response caching layer for reads and offline support.
//!
//! This module provides:
//! - A storage port (`Store`) with SQLite, in-memory and no-op backends
//! - Cache-first serving of static assets
//! - Network-first serving of API reads and pages, with cached fallback
//! - Versioned namespaces that are swapped wholesale on upgrade

mod fallback;
mod key;
mod layer;
mod storage;
mod traits;

pub use fallback::{offline_response, OFFLINE_STATUS};
pub use key::RequestKey;
pub use layer::{classify, CacheEngine, CacheNames, InstallReport, Lifecycle};
pub use storage::{MemoryStore, NoopStore, SqliteStore, Store, StoredEntry};
pub use traits::{CachedResponse, ResourceClass, ResponseSource};
