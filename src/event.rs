use std::fmt;

use crate::lifecycle::{ActivationReport, InstallOutcome};
use crate::net::Request;
use crate::relay::ClickAction;
use crate::router::FetchOutcome;
use crate::surface::ShownNotification;

/// Platform-delivered worker events
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  /// An outbound resource request from an application context
  Fetch(Request),
  /// Background sync trigger
  Sync { tag: String },
  /// Push message with its optional raw payload
  Push { payload: Option<Vec<u8>> },
  NotificationClick(ShownNotification),
}

impl WorkerEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::Install => EventKind::Install,
      Self::Activate => EventKind::Activate,
      Self::Fetch(_) => EventKind::Fetch,
      Self::Sync { .. } => EventKind::Sync,
      Self::Push { .. } => EventKind::Push,
      Self::NotificationClick(_) => EventKind::NotificationClick,
    }
  }
}

/// Key of the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Sync,
  Push,
  NotificationClick,
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Install => "install",
      Self::Activate => "activate",
      Self::Fetch => "fetch",
      Self::Sync => "sync",
      Self::Push => "push",
      Self::NotificationClick => "notificationclick",
    };
    f.write_str(name)
  }
}

/// What handling an event produced. The host treats the event as handled
/// once the outcome is available.
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed(InstallOutcome),
  Activated(ActivationReport),
  Fetched(FetchOutcome),
  /// Number of contexts a sync message was posted to
  Broadcast { contexts: usize },
  NotificationShown { id: String },
  NotificationClicked(ClickAction),
  /// No handler is registered for the event kind
  Unhandled,
}
