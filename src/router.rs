//! Per-request routing: decline, or cache lookup with network fallback.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};
use url::{Origin, Url};

use crate::cache::{CacheHandle, RoutedResponse};
use crate::net::{FetchError, Fetcher, Request};

/// How a request is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Cross-origin and unknown: left to the platform
  Passthrough,
  /// Cross-origin but listed as an opportunistic resource
  Opportunistic,
  SameOrigin,
}

/// Result of handling one intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// The router did not respond; default network handling applies
  Declined,
  Responded(RoutedResponse),
}

/// Counters observable by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
  pub hits: u64,
  pub misses: u64,
  pub declined: u64,
}

#[derive(Debug, Default)]
struct Counters {
  hits: AtomicU64,
  misses: AtomicU64,
  declined: AtomicU64,
}

/// Resolves intercepted requests against the current cache generation.
///
/// The router holds a handle onto exactly one generation and never writes to
/// it; population belongs to generation creation alone.
pub struct Router {
  origin: Origin,
  opportunistic: HashSet<String>,
  cache: CacheHandle,
  fetcher: Arc<dyn Fetcher>,
  counters: Counters,
}

impl Router {
  pub fn new(
    scope: &Url,
    opportunistic: &[Url],
    cache: CacheHandle,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    Self {
      origin: scope.origin(),
      opportunistic: opportunistic.iter().map(|u| u.as_str().to_string()).collect(),
      cache,
      fetcher,
      counters: Counters::default(),
    }
  }

  /// Name of the generation this router reads from.
  pub fn generation(&self) -> &str {
    self.cache.name()
  }

  pub fn classify(&self, request: &Request) -> Route {
    if request.url.origin() == self.origin {
      Route::SameOrigin
    } else if self.opportunistic.contains(request.url.as_str()) {
      Route::Opportunistic
    } else {
      Route::Passthrough
    }
  }

  /// Handle one request: cache first, then network. Non-GET requests skip
  /// the cache and always go to the network.
  ///
  /// A network failure on a cache miss is returned to the caller as-is.
  pub async fn handle(&self, request: &Request) -> Result<FetchOutcome, FetchError> {
    let route = self.classify(request);
    if route == Route::Passthrough {
      self.counters.declined.fetch_add(1, Ordering::Relaxed);
      debug!(url = %request.url, "Declined cross-origin request");
      return Ok(FetchOutcome::Declined);
    }

    // Only retrievals can match a cached entry
    if request.method == "GET" {
      match self.cache.match_request(request) {
        Ok(Some(entry)) => {
          self.counters.hits.fetch_add(1, Ordering::Relaxed);
          debug!(url = %request.url, ?route, "Cache hit");
          return Ok(FetchOutcome::Responded(RoutedResponse::from_cache(entry)));
        }
        Ok(None) => {}
        Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, using network"),
      }
    }

    self.counters.misses.fetch_add(1, Ordering::Relaxed);
    debug!(url = %request.url, ?route, "Cache miss");
    let response = self.fetcher.fetch(request).await?;
    Ok(FetchOutcome::Responded(RoutedResponse::from_network(response)))
  }

  pub fn stats(&self) -> RouterStats {
    RouterStats {
      hits: self.counters.hits.load(Ordering::Relaxed),
      misses: self.counters.misses.load(Ordering::Relaxed),
      declined: self.counters.declined.load(Ordering::Relaxed),
    }
  }
}
