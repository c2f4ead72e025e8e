//! Durable, generation-scoped response cache.
//!
//! This module provides the storage side of the worker:
//! - A `CacheStorage` backend holding named generations plus the current pointer
//! - A `CacheHandle` scoped to exactly one generation
//! - Provenance types for routed responses (cache vs network)

mod handle;
mod storage;
mod traits;

pub use handle::CacheHandle;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheKey, CachedEntry, ResponseSource, RoutedResponse};
