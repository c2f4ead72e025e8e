//! Event dispatch table and the task-per-event loop.

use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::CacheStorage;
use crate::config::Config;
use crate::event::{EventKind, EventOutcome, WorkerEvent};
use crate::lifecycle::{ActivationReport, LifecycleController, LifecycleState, Release};
use crate::net::Fetcher;
use crate::relay::EventRelay;
use crate::router::FetchOutcome;
use crate::surface::UiSurface;

/// State shared by every handler task.
pub struct Shared {
  pub lifecycle: LifecycleController,
  pub relay: EventRelay,
}

/// A handler returns a future the host must await before the event counts
/// as handled.
pub type Handler = fn(Arc<Shared>, WorkerEvent) -> BoxFuture<'static, Result<EventOutcome>>;

pub struct Worker {
  shared: Arc<Shared>,
  handlers: HashMap<EventKind, Handler>,
}

impl Worker {
  pub fn new(
    config: &Config,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    surface: Arc<dyn UiSurface>,
  ) -> Result<Self> {
    let scope = config.app.scope_url()?;
    let release = Release {
      cache_name: config.app.cache_name.clone(),
      scope: scope.clone(),
      seeds: config.app.seed_urls()?,
      opportunistic: config.app.opportunistic_urls()?,
    };

    let lifecycle = LifecycleController::new(release, storage, fetcher, Arc::clone(&surface))?;
    let relay = EventRelay::new(surface, config.notifications.clone(), scope);

    let mut handlers: HashMap<EventKind, Handler> = HashMap::new();
    handlers.insert(EventKind::Install, on_install);
    handlers.insert(EventKind::Activate, on_activate);
    handlers.insert(EventKind::Fetch, on_fetch);
    handlers.insert(EventKind::Sync, on_sync);
    handlers.insert(EventKind::Push, on_push);
    handlers.insert(EventKind::NotificationClick, on_notification_click);

    Ok(Self {
      shared: Arc::new(Shared { lifecycle, relay }),
      handlers,
    })
  }

  pub fn lifecycle(&self) -> &LifecycleController {
    &self.shared.lifecycle
  }

  /// Route an event to its handler.
  pub fn dispatch(&self, event: WorkerEvent) -> BoxFuture<'static, Result<EventOutcome>> {
    let kind = event.kind();
    match self.handlers.get(&kind) {
      Some(handler) => {
        debug!(event = %kind, "Dispatching");
        handler(Arc::clone(&self.shared), event)
      }
      None => {
        warn!(event = %kind, "No handler registered");
        async { Ok(EventOutcome::Unhandled) }.boxed()
      }
    }
  }

  /// Install, then activate without waiting.
  ///
  /// Returns `None` when this release is already active.
  pub async fn deploy(&self) -> Result<Option<ActivationReport>> {
    if self.lifecycle().state().await == LifecycleState::Active {
      return Ok(None);
    }

    match self.dispatch(WorkerEvent::Install).await? {
      EventOutcome::Installed(_) => {}
      other => return Err(eyre!("Unexpected install outcome: {:?}", other)),
    }

    match self.dispatch(WorkerEvent::Activate).await? {
      EventOutcome::Activated(report) => Ok(Some(report)),
      other => Err(eyre!("Unexpected activate outcome: {:?}", other)),
    }
  }

  /// Run each received event as its own task.
  pub fn spawn(self) -> (EventSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();

    let handle = tokio::spawn(async move {
      while let Some(Dispatch { event, done }) = rx.recv().await {
        let task = self.dispatch(event);
        tokio::spawn(async move {
          // The sender may have stopped waiting
          let _ = done.send(task.await);
        });
      }
    });

    (EventSender { tx }, handle)
  }
}

struct Dispatch {
  event: WorkerEvent,
  done: oneshot::Sender<Result<EventOutcome>>,
}

/// Host-side handle for delivering events to a spawned worker.
#[derive(Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<Dispatch>,
}

impl EventSender {
  /// Deliver an event and wait until its handler completes.
  pub async fn send(&self, event: WorkerEvent) -> Result<EventOutcome> {
    let (done, rx) = oneshot::channel();
    self
      .tx
      .send(Dispatch { event, done })
      .map_err(|_| eyre!("Worker event loop has stopped"))?;

    rx.await
      .map_err(|_| eyre!("Event handler dropped before completing"))?
  }
}

fn on_install(shared: Arc<Shared>, _event: WorkerEvent) -> BoxFuture<'static, Result<EventOutcome>> {
  async move {
    let outcome = shared.lifecycle.install().await?;
    Ok(EventOutcome::Installed(outcome))
  }
  .boxed()
}

fn on_activate(shared: Arc<Shared>, _event: WorkerEvent) -> BoxFuture<'static, Result<EventOutcome>> {
  async move {
    let report = shared.lifecycle.activate().await?;
    Ok(EventOutcome::Activated(report))
  }
  .boxed()
}

fn on_fetch(shared: Arc<Shared>, event: WorkerEvent) -> BoxFuture<'static, Result<EventOutcome>> {
  async move {
    let WorkerEvent::Fetch(request) = event else {
      return Ok(EventOutcome::Unhandled);
    };

    // Nothing is intercepted until a generation is active
    let outcome = match shared.lifecycle.router().await {
      Some(router) => {
        let outcome = router.handle(&request).await?;
        debug!(url = %request.url, stats = ?router.stats(), "Fetch handled");
        outcome
      }
      None => FetchOutcome::Declined,
    };
    Ok(EventOutcome::Fetched(outcome))
  }
  .boxed()
}

fn on_sync(shared: Arc<Shared>, event: WorkerEvent) -> BoxFuture<'static, Result<EventOutcome>> {
  async move {
    let WorkerEvent::Sync { tag } = event else {
      return Ok(EventOutcome::Unhandled);
    };

    let contexts = shared.relay.handle_sync(&tag).await?;
    Ok(EventOutcome::Broadcast { contexts })
  }
  .boxed()
}

fn on_push(shared: Arc<Shared>, event: WorkerEvent) -> BoxFuture<'static, Result<EventOutcome>> {
  async move {
    let WorkerEvent::Push { payload } = event else {
      return Ok(EventOutcome::Unhandled);
    };

    let id = shared.relay.handle_push(payload.as_deref()).await?;
    Ok(EventOutcome::NotificationShown { id })
  }
  .boxed()
}

fn on_notification_click(
  shared: Arc<Shared>,
  event: WorkerEvent,
) -> BoxFuture<'static, Result<EventOutcome>> {
  async move {
    let WorkerEvent::NotificationClick(shown) = event else {
      return Ok(EventOutcome::Unhandled);
    };

    let action = shared.relay.handle_notification_click(&shown).await?;
    Ok(EventOutcome::NotificationClicked(action))
  }
  .boxed()
}
