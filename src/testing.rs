//! Test doubles shared by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};

use crate::cache::{CacheStorage, CachedEntry};
use crate::net::{FetchError, Fetcher, Request, Response};
use crate::surface::{
  ClientContext, ClientMessage, ContextKind, LocalSurface, Notification, UiSurface,
};

#[derive(Default)]
struct MemoryState {
  generations: BTreeMap<String, BTreeMap<String, CachedEntry>>,
  current: Option<String>,
  installed: Option<String>,
  undeletable: HashSet<String>,
}

/// In-process storage with failure injection for deletions.
#[derive(Default)]
pub struct MemoryStorage {
  state: Mutex<MemoryState>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every deletion of `name` fail.
  pub fn fail_deletes_of(&self, name: &str) {
    self
      .state
      .lock()
      .unwrap()
      .undeletable
      .insert(name.to_string());
  }
}

impl CacheStorage for MemoryStorage {
  fn open_generation(&self, name: &str) -> Result<()> {
    self
      .state
      .lock()
      .unwrap()
      .generations
      .entry(name.to_string())
      .or_default();
    Ok(())
  }

  fn has_generation(&self, name: &str) -> Result<bool> {
    Ok(self.state.lock().unwrap().generations.contains_key(name))
  }

  fn generation_names(&self) -> Result<Vec<String>> {
    Ok(self.state.lock().unwrap().generations.keys().cloned().collect())
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut state = self.state.lock().unwrap();
    if state.undeletable.contains(name) {
      return Err(eyre!("Failed to delete cache {}: injected failure", name));
    }
    Ok(state.generations.remove(name).is_some())
  }

  fn get_entry(&self, generation: &str, key: &str) -> Result<Option<CachedEntry>> {
    Ok(
      self
        .state
        .lock()
        .unwrap()
        .generations
        .get(generation)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  fn put_entry(&self, generation: &str, key: &str, response: &Response) -> Result<()> {
    let mut state = self.state.lock().unwrap();
    let entries = state
      .generations
      .get_mut(generation)
      .ok_or_else(|| eyre!("Cache {} is not open", generation))?;
    entries.insert(
      key.to_string(),
      CachedEntry {
        response: response.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn entry_keys(&self, generation: &str) -> Result<Vec<String>> {
    Ok(
      self
        .state
        .lock()
        .unwrap()
        .generations
        .get(generation)
        .map(|entries| entries.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn current_generation(&self) -> Result<Option<String>> {
    Ok(self.state.lock().unwrap().current.clone())
  }

  fn set_current_generation(&self, name: &str) -> Result<()> {
    self.state.lock().unwrap().current = Some(name.to_string());
    Ok(())
  }

  fn installed_generation(&self) -> Result<Option<String>> {
    Ok(self.state.lock().unwrap().installed.clone())
  }

  fn set_installed_generation(&self, name: Option<&str>) -> Result<()> {
    self.state.lock().unwrap().installed = name.map(str::to_string);
    Ok(())
  }
}

/// Fetcher with scripted responses and a call counter.
///
/// Unknown URLs answer 404; URLs marked with `fail` raise a network error.
#[derive(Default)]
pub struct StubFetcher {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  calls: AtomicUsize,
}

impl StubFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(&self, url: &str, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Response::new(200, body));
  }

  pub fn serve_status(&self, url: &str, status: u16) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Response::new(status, ""));
  }

  pub fn fail(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for StubFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let url = request.url.as_str();

      if self.failing.lock().unwrap().contains(url) {
        return Err(FetchError::Network(format!("{}: connection refused", url)));
      }

      Ok(
        self
          .routes
          .lock()
          .unwrap()
          .get(url)
          .cloned()
          .unwrap_or_else(|| Response::new(404, "")),
      )
    }
    .boxed()
  }
}

/// Surface that delegates to a `LocalSurface` but refuses messages posted to
/// selected contexts.
pub struct FailingPostSurface {
  inner: Arc<LocalSurface>,
  refused: Mutex<HashSet<String>>,
}

impl FailingPostSurface {
  pub fn new(inner: Arc<LocalSurface>) -> Self {
    Self {
      inner,
      refused: Mutex::new(HashSet::new()),
    }
  }

  pub fn fail_posts_to(&self, context_id: &str) {
    self.refused.lock().unwrap().insert(context_id.to_string());
  }
}

impl UiSurface for FailingPostSurface {
  fn show_notification<'a>(&'a self, notification: &'a Notification)
    -> BoxFuture<'a, Result<String>> {
    self.inner.show_notification(notification)
  }

  fn close_notification<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
    self.inner.close_notification(id)
  }

  fn list_contexts(&self, kind: ContextKind) -> BoxFuture<'_, Result<Vec<ClientContext>>> {
    self.inner.list_contexts(kind)
  }

  fn post_message<'a>(
    &'a self,
    context_id: &'a str,
    message: &'a ClientMessage,
  ) -> BoxFuture<'a, Result<()>> {
    if self.refused.lock().unwrap().contains(context_id) {
      return async move { Err(eyre!("Context {} is gone", context_id)) }.boxed();
    }
    self.inner.post_message(context_id, message)
  }

  fn focus<'a>(&'a self, context_id: &'a str) -> BoxFuture<'a, Result<()>> {
    self.inner.focus(context_id)
  }

  fn open_window<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ClientContext>> {
    self.inner.open_window(url)
  }

  fn claim(&self) -> BoxFuture<'_, Result<usize>> {
    self.inner.claim()
  }
}
