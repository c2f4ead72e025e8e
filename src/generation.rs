//! Cache generation creation and purging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheHandle, CacheStorage};
use crate::net::{Fetcher, Request, Response};

/// Failures that abort generation creation.
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
  #[error("Cache storage error: {0}")]
  Storage(String),

  #[error("Failed to fetch seed resource {url}: {reason}")]
  SeedFetch { url: String, reason: String },

  #[error("Seed resource {url} answered with status {status}")]
  SeedStatus { url: String, status: u16 },
}

/// Outcome of a purge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
  pub deleted: Vec<String>,
  pub failed: Vec<String>,
}

/// Creates cache generations and purges superseded ones.
pub struct GenerationManager {
  storage: Arc<dyn CacheStorage>,
  fetcher: Arc<dyn Fetcher>,
  /// Cumulative count of failed deletions across all purges
  purge_failures: AtomicU64,
}

impl GenerationManager {
  pub fn new(storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      storage,
      fetcher,
      purge_failures: AtomicU64::new(0),
    }
  }

  /// Open a handle onto an existing or new generation.
  pub fn open(&self, name: &str) -> Result<CacheHandle> {
    CacheHandle::open(Arc::clone(&self.storage), name)
  }

  /// Populate generation `name`.
  ///
  /// Every seed must fetch with a 2xx status and be stored, otherwise the
  /// whole call fails and the generation must not be promoted. Seeds are
  /// fetched concurrently and only written once all of them arrived.
  /// Opportunistic resources are then cached best-effort.
  pub async fn create_generation(
    &self,
    name: &str,
    seeds: &[Url],
    opportunistic: &[Url],
  ) -> Result<(), GenerationError> {
    let cache = self
      .open(name)
      .map_err(|e| GenerationError::Storage(e.to_string()))?;

    let responses = try_join_all(seeds.iter().map(|url| self.fetch_seed(url))).await?;

    for (url, response) in seeds.iter().zip(&responses) {
      cache
        .put(url, response)
        .map_err(|e| GenerationError::Storage(e.to_string()))?;
    }
    debug!(generation = %name, count = seeds.len(), "Seed resources cached");

    let cache = &cache;
    let results = join_all(
      opportunistic
        .iter()
        .map(|url| async move { (url, self.cache_opportunistic(cache, url).await) }),
    )
    .await;

    let mut cached = 0;
    for (url, result) in results {
      match result {
        Ok(()) => cached += 1,
        Err(e) => warn!(url = %url, error = %e, "Failed to cache opportunistic resource"),
      }
    }

    info!(
      generation = %name,
      seeds = seeds.len(),
      opportunistic = cached,
      skipped = opportunistic.len() - cached,
      "Cache generation created"
    );
    Ok(())
  }

  async fn fetch_seed(&self, url: &Url) -> Result<Response, GenerationError> {
    let request = Request::get(url.clone());
    let response = self
      .fetcher
      .fetch(&request)
      .await
      .map_err(|e| GenerationError::SeedFetch {
        url: url.to_string(),
        reason: e.to_string(),
      })?;

    if !response.is_ok() {
      return Err(GenerationError::SeedStatus {
        url: url.to_string(),
        status: response.status,
      });
    }

    Ok(response)
  }

  /// Any status is stored; only transport and storage errors fail.
  async fn cache_opportunistic(&self, cache: &CacheHandle, url: &Url) -> Result<()> {
    let request = Request::get(url.clone());
    let response = self
      .fetcher
      .fetch(&request)
      .await
      .map_err(|e| eyre!("{}", e))?;
    cache.put(url, &response)
  }

  /// Delete every generation not named `current`.
  ///
  /// Deletion failures are logged and counted; enumeration always continues.
  pub fn purge_other_generations(&self, current: &str) -> PurgeReport {
    let mut report = PurgeReport::default();

    let names = match self.storage.generation_names() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to enumerate cache generations");
        self.purge_failures.fetch_add(1, Ordering::Relaxed);
        return report;
      }
    };

    for name in names.into_iter().filter(|n| n != current) {
      match self.storage.delete_generation(&name) {
        Ok(_) => {
          info!(generation = %name, "Deleted stale cache generation");
          report.deleted.push(name);
        }
        Err(e) => {
          warn!(generation = %name, error = %e, "Failed to delete stale cache generation");
          report.failed.push(name);
        }
      }
    }

    self
      .purge_failures
      .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
    report
  }

  /// Failed deletions across every purge since startup.
  pub fn purge_failures(&self) -> u64 {
    self.purge_failures.load(Ordering::Relaxed)
  }
}
