//! Handle onto a single named cache generation.

use color_eyre::Result;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::{CacheKey, CachedEntry};
use crate::net::Response;

/// A named view onto one generation of the durable store.
///
/// Handles are cheap to clone; every clone shares the same backend.
#[derive(Clone)]
pub struct CacheHandle {
  storage: Arc<dyn CacheStorage>,
  name: String,
}

impl CacheHandle {
  /// Open (creating if absent) the generation `name`.
  pub fn open(storage: Arc<dyn CacheStorage>, name: &str) -> Result<Self> {
    storage.open_generation(name)?;
    Ok(Self {
      storage,
      name: name.to_string(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Exact-key lookup.
  pub fn match_request(&self, key: &impl CacheKey) -> Result<Option<CachedEntry>> {
    self.storage.get_entry(&self.name, &key.cache_key())
  }

  pub fn put(&self, key: &impl CacheKey, response: &Response) -> Result<()> {
    self.storage.put_entry(&self.name, &key.cache_key(), response)
  }

  #[cfg(test)]
  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.entry_keys(&self.name)
  }
}

impl std::fmt::Debug for CacheHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheHandle")
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}
