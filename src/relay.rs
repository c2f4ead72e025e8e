//! Bridges sync, push and notification-click signals to the UI surface.

use std::sync::Arc;

use color_eyre::Result;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::NotificationConfig;
use crate::surface::{
  ClientMessage, ContextKind, Notification, NotificationData, ShownNotification, UiSurface,
};

/// Sync tag asking application contexts to re-check code expirations.
pub const CHECK_EXPIRATIONS_TAG: &str = "check-expirations";

/// What a notification click resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
  /// An existing context with the target URL was focused
  Focused(String),
  /// A new window was opened at the target URL
  Opened(String),
}

pub struct EventRelay {
  surface: Arc<dyn UiSurface>,
  defaults: NotificationConfig,
  scope: Url,
}

impl EventRelay {
  pub fn new(surface: Arc<dyn UiSurface>, defaults: NotificationConfig, scope: Url) -> Self {
    Self {
      surface,
      defaults,
      scope,
    }
  }

  /// Handle a background sync trigger. Returns the number of contexts
  /// messaged; unknown tags are ignored.
  ///
  /// A context that cannot be messaged is logged and skipped so the rest
  /// still receive the broadcast.
  pub async fn handle_sync(&self, tag: &str) -> Result<usize> {
    if tag != CHECK_EXPIRATIONS_TAG {
      debug!(tag = %tag, "Ignoring unknown sync tag");
      return Ok(0);
    }

    let contexts = self.surface.list_contexts(ContextKind::All).await?;
    let mut delivered = 0;
    for context in &contexts {
      match self
        .surface
        .post_message(&context.id, &ClientMessage::CheckExpirations)
        .await
      {
        Ok(()) => delivered += 1,
        Err(e) => warn!(context = %context.id, error = %e, "Failed to post expiration check"),
      }
    }

    info!(
      contexts = contexts.len(),
      delivered, "Broadcast expiration check"
    );
    Ok(delivered)
  }

  /// Build the notification for a push payload.
  ///
  /// A missing or unparseable payload is treated as `{}`. Empty strings fall
  /// back to the defaults like absent fields do.
  pub fn notification_intent(&self, payload: Option<&[u8]>) -> Notification {
    let data = payload
      .and_then(|bytes| serde_json::from_slice::<Value>(bytes).ok())
      .unwrap_or(Value::Null);

    let field = |name: &str| {
      data
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
    };

    let target = field("url").unwrap_or_else(|| self.defaults.default_url.clone());
    // Relative targets are relative to the application root
    let url = self
      .scope
      .join(&target)
      .map(String::from)
      .unwrap_or(target);

    Notification {
      title: field("title").unwrap_or_else(|| self.defaults.title.clone()),
      body: field("body").unwrap_or_else(|| self.defaults.body.clone()),
      icon: self.defaults.icon.clone(),
      badge: self.defaults.badge.clone(),
      vibrate: self.defaults.vibrate.clone(),
      data: NotificationData { url },
    }
  }

  /// Handle a push message by displaying a notification. Returns its id.
  pub async fn handle_push(&self, payload: Option<&[u8]>) -> Result<String> {
    let notification = self.notification_intent(payload);
    self.surface.show_notification(&notification).await
  }

  /// Close the notification, then focus the window whose URL equals the
  /// target exactly, or open a new one.
  pub async fn handle_notification_click(&self, shown: &ShownNotification) -> Result<ClickAction> {
    self.surface.close_notification(&shown.id).await?;

    let target = &shown.notification.data.url;
    let windows = self.surface.list_contexts(ContextKind::Window).await?;

    if let Some(context) = windows.iter().find(|c| &c.url == target) {
      self.surface.focus(&context.id).await?;
      return Ok(ClickAction::Focused(context.id.clone()));
    }

    let opened = self.surface.open_window(target).await?;
    Ok(ClickAction::Opened(opened.id))
  }
}
