//! Platform UI capability: notifications, open application contexts and the
//! message channel to them.

use std::collections::BTreeMap;

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// Kind of application context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
  #[default]
  Window,
  Worker,
  /// Matches every kind when listing
  All,
}

impl ContextKind {
  fn matches(self, other: ContextKind) -> bool {
    self == ContextKind::All || self == other
  }
}

/// An open application context (tab, window or worker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
  pub id: String,
  pub url: String,
  pub kind: ContextKind,
  pub focused: bool,
  /// Whether the worker has claimed this context
  pub controlled: bool,
}

/// Messages posted to application contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  #[serde(rename = "CHECK_EXPIRATIONS")]
  CheckExpirations,
}

/// A message addressed to one context, as seen by broadcast subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMessage {
  pub context_id: String,
  pub message: ClientMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
  pub url: String,
}

/// Notification display request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
}

/// A notification the platform has displayed, as delivered back on click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShownNotification {
  pub id: String,
  pub notification: Notification,
}

/// UI surface the worker drives. Every call is an I/O boundary.
pub trait UiSurface: Send + Sync {
  /// Display a notification, returning its id.
  fn show_notification<'a>(&'a self, notification: &'a Notification)
    -> BoxFuture<'a, Result<String>>;

  fn close_notification<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;

  fn list_contexts(&self, kind: ContextKind) -> BoxFuture<'_, Result<Vec<ClientContext>>>;

  fn post_message<'a>(
    &'a self,
    context_id: &'a str,
    message: &'a ClientMessage,
  ) -> BoxFuture<'a, Result<()>>;

  fn focus<'a>(&'a self, context_id: &'a str) -> BoxFuture<'a, Result<()>>;

  fn open_window<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ClientContext>>;

  /// Take control of every open context. Returns how many were claimed.
  fn claim(&self) -> BoxFuture<'_, Result<usize>>;
}

#[derive(Debug, Default)]
struct SurfaceState {
  contexts: Vec<ClientContext>,
  notifications: BTreeMap<String, Notification>,
  next_id: u64,
}

impl SurfaceState {
  fn next_id(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{}-{}", prefix, self.next_id)
  }
}

/// In-process UI surface.
///
/// Keeps a registry of contexts and displayed notifications, and fans posted
/// messages out over a broadcast channel that application contexts subscribe to.
pub struct LocalSurface {
  state: RwLock<SurfaceState>,
  messages: broadcast::Sender<ContextMessage>,
}

impl LocalSurface {
  pub fn new() -> Self {
    let (messages, _) = broadcast::channel(64);
    Self {
      state: RwLock::new(SurfaceState::default()),
      messages,
    }
  }

  /// Register an already-open context.
  pub async fn register(&self, url: &str, kind: ContextKind) -> ClientContext {
    let mut state = self.state.write().await;
    let context = ClientContext {
      id: state.next_id("context"),
      url: url.to_string(),
      kind,
      focused: false,
      controlled: false,
    };
    state.contexts.push(context.clone());
    context
  }

  /// Subscribe to messages posted to contexts.
  pub fn subscribe(&self) -> broadcast::Receiver<ContextMessage> {
    self.messages.subscribe()
  }

  #[cfg(test)]
  pub async fn contexts(&self) -> Vec<ClientContext> {
    self.state.read().await.contexts.clone()
  }

  /// Currently displayed notifications.
  pub async fn notifications(&self) -> Vec<ShownNotification> {
    self
      .state
      .read()
      .await
      .notifications
      .iter()
      .map(|(id, notification)| ShownNotification {
        id: id.clone(),
        notification: notification.clone(),
      })
      .collect()
  }
}

impl Default for LocalSurface {
  fn default() -> Self {
    Self::new()
  }
}

impl UiSurface for LocalSurface {
  fn show_notification<'a>(
    &'a self,
    notification: &'a Notification,
  ) -> BoxFuture<'a, Result<String>> {
    async move {
      let mut state = self.state.write().await;
      let id = state.next_id("notification");
      state.notifications.insert(id.clone(), notification.clone());
      info!(id = %id, title = %notification.title, "Notification shown");
      Ok(id)
    }
    .boxed()
  }

  fn close_notification<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
    async move {
      self.state.write().await.notifications.remove(id);
      debug!(id = %id, "Notification closed");
      Ok(())
    }
    .boxed()
  }

  fn list_contexts(&self, kind: ContextKind) -> BoxFuture<'_, Result<Vec<ClientContext>>> {
    async move {
      let state = self.state.read().await;
      Ok(
        state
          .contexts
          .iter()
          .filter(|c| kind.matches(c.kind))
          .cloned()
          .collect(),
      )
    }
    .boxed()
  }

  fn post_message<'a>(
    &'a self,
    context_id: &'a str,
    message: &'a ClientMessage,
  ) -> BoxFuture<'a, Result<()>> {
    async move {
      let state = self.state.read().await;
      if !state.contexts.iter().any(|c| c.id == context_id) {
        return Err(eyre!("Unknown context: {}", context_id));
      }

      // No subscribers is not an error: nobody is listening yet
      let _ = self.messages.send(ContextMessage {
        context_id: context_id.to_string(),
        message: message.clone(),
      });
      Ok(())
    }
    .boxed()
  }

  fn focus<'a>(&'a self, context_id: &'a str) -> BoxFuture<'a, Result<()>> {
    async move {
      let mut state = self.state.write().await;
      let target = state
        .contexts
        .iter()
        .position(|c| c.id == context_id)
        .ok_or_else(|| eyre!("Unknown context: {}", context_id))?;

      if state.contexts[target].kind != ContextKind::Window {
        return Err(eyre!("Can only focus window contexts"));
      }

      for (i, context) in state.contexts.iter_mut().enumerate() {
        context.focused = i == target;
      }
      info!(context = %context_id, "Context focused");
      Ok(())
    }
    .boxed()
  }

  fn open_window<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ClientContext>> {
    async move {
      let mut state = self.state.write().await;
      for context in state.contexts.iter_mut() {
        context.focused = false;
      }

      let context = ClientContext {
        id: state.next_id("context"),
        url: url.to_string(),
        kind: ContextKind::Window,
        focused: true,
        controlled: true,
      };
      state.contexts.push(context.clone());
      info!(context = %context.id, url = %url, "Window opened");
      Ok(context)
    }
    .boxed()
  }

  fn claim(&self) -> BoxFuture<'_, Result<usize>> {
    async move {
      let mut state = self.state.write().await;
      for context in state.contexts.iter_mut() {
        context.controlled = true;
      }
      Ok(state.contexts.len())
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_check_expirations_wire_format() {
    let json = serde_json::to_string(&ClientMessage::CheckExpirations).unwrap();
    assert_eq!(json, r#"{"type":"CHECK_EXPIRATIONS"}"#);
  }

  #[tokio::test]
  async fn test_list_contexts_filters_by_kind() {
    let surface = LocalSurface::new();
    surface.register("https://app.test/", ContextKind::Window).await;
    surface.register("https://app.test/worker.js", ContextKind::Worker).await;

    let windows = surface.list_contexts(ContextKind::Window).await.unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].url, "https://app.test/");

    let all = surface.list_contexts(ContextKind::All).await.unwrap();
    assert_eq!(all.len(), 2);
  }

  #[tokio::test]
  async fn test_post_message_reaches_subscribers() {
    let surface = LocalSurface::new();
    let context = surface.register("https://app.test/", ContextKind::Window).await;
    let mut rx = surface.subscribe();

    surface
      .post_message(&context.id, &ClientMessage::CheckExpirations)
      .await
      .unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.context_id, context.id);
    assert_eq!(received.message, ClientMessage::CheckExpirations);
  }

  #[tokio::test]
  async fn test_post_message_to_unknown_context_fails() {
    let surface = LocalSurface::new();
    assert!(surface
      .post_message("context-99", &ClientMessage::CheckExpirations)
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_focus_moves_focus() {
    let surface = LocalSurface::new();
    let a = surface.register("https://app.test/a", ContextKind::Window).await;
    let b = surface.register("https://app.test/b", ContextKind::Window).await;

    surface.focus(&a.id).await.unwrap();
    surface.focus(&b.id).await.unwrap();

    let contexts = surface.contexts().await;
    assert!(!contexts[0].focused);
    assert!(contexts[1].focused);
  }

  #[tokio::test]
  async fn test_claim_controls_all_contexts() {
    let surface = LocalSurface::new();
    surface.register("https://app.test/", ContextKind::Window).await;
    surface.register("https://app.test/w", ContextKind::Worker).await;

    assert_eq!(surface.claim().await.unwrap(), 2);
    assert!(surface.contexts().await.iter().all(|c| c.controlled));
  }
}
