//! Install → activate → active state machine.

use std::fmt;
use std::sync::Arc;

use color_eyre::Result;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::generation::{GenerationError, GenerationManager, PurgeReport};
use crate::net::Fetcher;
use crate::router::Router;
use crate::surface::UiSurface;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  /// Installed and waiting for activation
  Installed,
  Activating,
  Active,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Uninstalled => "uninstalled",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Active => "active",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("Cannot {event} while {from}")]
  InvalidTransition {
    from: LifecycleState,
    event: &'static str,
  },

  #[error("Install failed: {0}")]
  Install(#[from] GenerationError),

  #[error("Storage error: {0}")]
  Storage(String),
}

/// Versioned application resources.
#[derive(Debug, Clone)]
pub struct Release {
  /// Name of the generation this release installs
  pub cache_name: String,
  pub scope: Url,
  pub seeds: Vec<Url>,
  pub opportunistic: Vec<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
  pub generation: String,
  /// Activate immediately instead of waiting for other instances to finish
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub generation: String,
  pub purge: PurgeReport,
  pub claimed: usize,
}

/// Drives generation creation, activation and router availability.
pub struct LifecycleController {
  release: Release,
  storage: Arc<dyn CacheStorage>,
  fetcher: Arc<dyn Fetcher>,
  generations: GenerationManager,
  surface: Arc<dyn UiSurface>,
  state: RwLock<LifecycleState>,
  router: RwLock<Option<Arc<Router>>>,
}

impl LifecycleController {
  /// Build a controller, resuming as `Active` when the stored current
  /// generation already matches this release, or as `Installed` when this
  /// release finished installing in an earlier run but was never activated.
  pub fn new(
    release: Release,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    surface: Arc<dyn UiSurface>,
  ) -> Result<Self> {
    let generations = GenerationManager::new(Arc::clone(&storage), Arc::clone(&fetcher));

    let name = release.cache_name.as_str();
    let exists = storage.has_generation(name)?;
    let active = exists && storage.current_generation()?.as_deref() == Some(name);
    let installed = exists && storage.installed_generation()?.as_deref() == Some(name);

    let (state, router) = if active {
      info!(generation = %name, "Resuming active cache generation");
      let cache = generations.open(name)?;
      let router = Router::new(
        &release.scope,
        &release.opportunistic,
        cache,
        Arc::clone(&fetcher),
      );
      (LifecycleState::Active, Some(Arc::new(router)))
    } else if installed {
      info!(generation = %name, "Resuming installed cache generation");
      (LifecycleState::Installed, None)
    } else {
      (LifecycleState::Uninstalled, None)
    };

    Ok(Self {
      release,
      storage,
      fetcher,
      generations,
      surface,
      state: RwLock::new(state),
      router: RwLock::new(router),
    })
  }

  pub fn release(&self) -> &Release {
    &self.release
  }

  pub fn generations(&self) -> &GenerationManager {
    &self.generations
  }

  pub async fn state(&self) -> LifecycleState {
    *self.state.read().await
  }

  /// The live router, present only while `Active`.
  pub async fn router(&self) -> Option<Arc<Router>> {
    self.router.read().await.clone()
  }

  /// Move `from` → `to` if the current state is one of `from`.
  async fn transition(
    &self,
    from: &[LifecycleState],
    to: LifecycleState,
    event: &'static str,
  ) -> Result<(), LifecycleError> {
    let mut state = self.state.write().await;
    if !from.contains(&*state) {
      return Err(LifecycleError::InvalidTransition {
        from: *state,
        event,
      });
    }
    *state = to;
    Ok(())
  }

  async fn set_state(&self, state: LifecycleState) {
    *self.state.write().await = state;
  }

  /// Populate this release's generation.
  ///
  /// On failure the controller returns to `Uninstalled` and the current
  /// generation pointer is left untouched, so the previous generation stays
  /// authoritative.
  pub async fn install(&self) -> Result<InstallOutcome, LifecycleError> {
    self
      .transition(
        &[LifecycleState::Uninstalled, LifecycleState::Installed],
        LifecycleState::Installing,
        "install",
      )
      .await?;

    let name = &self.release.cache_name;
    info!(generation = %name, "Installing");

    match self
      .generations
      .create_generation(name, &self.release.seeds, &self.release.opportunistic)
      .await
    {
      Ok(()) => {
        if let Err(e) = self.storage.set_installed_generation(Some(name.as_str())) {
          self.set_state(LifecycleState::Uninstalled).await;
          return Err(LifecycleError::Storage(e.to_string()));
        }
        self.set_state(LifecycleState::Installed).await;
        Ok(InstallOutcome {
          generation: name.clone(),
          skip_waiting: true,
        })
      }
      Err(e) => {
        warn!(generation = %name, error = %e, "Install failed");
        // A partial generation must not be resumed as installed
        if let Err(clear) = self.storage.set_installed_generation(None) {
          warn!(error = %clear, "Failed to clear installed generation");
        }
        self.set_state(LifecycleState::Uninstalled).await;
        Err(e.into())
      }
    }
  }

  /// Promote the installed generation, purge the rest and claim open contexts.
  pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
    self
      .transition(
        &[LifecycleState::Installed],
        LifecycleState::Activating,
        "activate",
      )
      .await?;

    let name = &self.release.cache_name;

    let cache = match self
      .generations
      .open(name)
      .and_then(|cache| self.storage.set_current_generation(name).map(|()| cache))
    {
      Ok(cache) => cache,
      Err(e) => {
        self.set_state(LifecycleState::Installed).await;
        return Err(LifecycleError::Storage(e.to_string()));
      }
    };

    if let Err(e) = self.storage.set_installed_generation(None) {
      warn!(error = %e, "Failed to clear installed generation");
    }

    let purge = self.generations.purge_other_generations(name);

    let router = Router::new(
      &self.release.scope,
      &self.release.opportunistic,
      cache,
      Arc::clone(&self.fetcher),
    );
    *self.router.write().await = Some(Arc::new(router));

    let claimed = match self.surface.claim().await {
      Ok(count) => count,
      Err(e) => {
        warn!(error = %e, "Failed to claim open contexts");
        0
      }
    };

    self.set_state(LifecycleState::Active).await;
    info!(
      generation = %name,
      deleted = purge.deleted.len(),
      failed = purge.failed.len(),
      claimed,
      "Activated"
    );

    Ok(ActivationReport {
      generation: name.clone(),
      purge,
      claimed,
    })
  }
}
