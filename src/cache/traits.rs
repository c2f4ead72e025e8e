//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use url::Url;

use crate::net::{Request, Response};

/// Anything that identifies a cache entry.
///
/// Entries are keyed by the absolute request URL. The method is not part of
/// the key: only GET responses are stored, and the router never looks up
/// other methods.
pub trait CacheKey {
  fn cache_key(&self) -> String;
}

impl CacheKey for Request {
  fn cache_key(&self) -> String {
    self.url.as_str().to_string()
  }
}

impl CacheKey for Url {
  fn cache_key(&self) -> String {
    self.as_str().to_string()
  }
}

/// A response stored in a cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// A routed response together with metadata about where it came from.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl RoutedResponse {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }
}

/// Indicates where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Served from the current cache generation
  Cache,
  /// Live network fetch after a cache miss
  Network,
}
