mod cache;
mod config;
mod event;
mod generation;
mod lifecycle;
mod logging;
mod net;
mod relay;
mod router;
mod surface;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use cache::{CacheStorage, SqliteStorage};
use event::{EventOutcome, WorkerEvent};
use lifecycle::ActivationReport;
use net::{HttpFetcher, Request};
use router::FetchOutcome;
use surface::LocalSurface;
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline cache manager and request router for installable web apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache generation name to use instead of the configured one
  #[arg(long)]
  cache_name: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured release and activate it
  Deploy,
  /// Populate the configured cache generation
  Install,
  /// Activate an installed generation and purge the others
  Activate,
  /// Route a request through the active generation
  Fetch {
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Deliver a background sync trigger
  Sync {
    #[arg(default_value = relay::CHECK_EXPIRATIONS_TAG)]
    tag: String,
  },
  /// Deliver a push message
  Push {
    /// JSON payload, e.g. '{"title":"...","body":"...","url":"..."}'
    #[arg(short, long)]
    payload: Option<String>,
  },
  /// Show a notification targeting `url` and click it
  Click { url: String },
  /// Show generations and lifecycle state
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override cache name if specified on command line
  let config = if let Some(cache_name) = args.cache_name {
    config::Config {
      app: config::AppConfig {
        cache_name,
        ..config.app
      },
      ..config
    }
  } else {
    config
  };

  let _log_guard = logging::init(&config.logging)?;

  let storage: Arc<dyn CacheStorage> =
    Arc::new(SqliteStorage::open(&config.storage.resolve_path()?)?);
  let fetcher = Arc::new(HttpFetcher::new(&config.network)?);
  let surface = Arc::new(LocalSurface::new());
  for context in &config.contexts {
    surface.register(&context.url, context.kind).await;
  }

  let worker = Worker::new(&config, Arc::clone(&storage), fetcher, surface.clone())?;

  let mut output = None;
  let event = match args.command {
    Command::Status => return print_status(storage.as_ref(), &worker).await,
    Command::Deploy => {
      match worker.deploy().await? {
        Some(report) => print_activation(&report),
        None => println!("{} is already active", config.app.cache_name),
      }
      return Ok(());
    }
    Command::Install => WorkerEvent::Install,
    Command::Activate => WorkerEvent::Activate,
    Command::Fetch {
      url,
      method,
      headers,
      output: path,
    } => {
      output = path;
      let url = Url::parse(&url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
      let mut request = Request {
        method: method.to_ascii_uppercase(),
        ..Request::get(url)
      };
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header (expected \"Name: value\"): {}", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      WorkerEvent::Fetch(request)
    }
    Command::Sync { tag } => WorkerEvent::Sync { tag },
    Command::Push { payload } => WorkerEvent::Push {
      payload: payload.map(String::into_bytes),
    },
    Command::Click { url } => {
      let payload = serde_json::json!({ "url": url });
      worker
        .dispatch(WorkerEvent::Push {
          payload: Some(serde_json::to_vec(&payload)?),
        })
        .await?;
      let shown = surface
        .notifications()
        .await
        .pop()
        .ok_or_else(|| eyre!("Notification was not shown"))?;
      WorkerEvent::NotificationClick(shown)
    }
  };

  // Echo what application contexts receive
  let mut messages = surface.subscribe();

  let (events, _handle) = worker.spawn();
  let outcome = events.send(event).await?;
  print_outcome(outcome, output)?;

  while let Ok(delivered) = messages.try_recv() {
    println!(
      "  -> {} {}",
      delivered.context_id,
      serde_json::to_string(&delivered.message)?
    );
  }

  Ok(())
}

async fn print_status(storage: &dyn CacheStorage, worker: &Worker) -> Result<()> {
  let current = storage.current_generation()?;
  println!(
    "Release:    {}",
    worker.lifecycle().release().cache_name
  );
  println!("State:      {}", worker.lifecycle().state().await);
  println!("Current:    {}", current.as_deref().unwrap_or("-"));
  println!(
    "Purge failures: {}",
    worker.lifecycle().generations().purge_failures()
  );
  println!("Generations:");
  for name in storage.generation_names()? {
    let marker = if Some(&name) == current.as_ref() { "*" } else { " " };
    println!("  {} {} ({} entries)", marker, name, storage.entry_keys(&name)?.len());
  }
  Ok(())
}

fn print_activation(report: &ActivationReport) {
  println!("Activated {}", report.generation);
  for name in &report.purge.deleted {
    println!("  deleted {}", name);
  }
  for name in &report.purge.failed {
    println!("  failed to delete {}", name);
  }
  println!("  claimed {} context(s)", report.claimed);
}

fn print_outcome(outcome: EventOutcome, output: Option<PathBuf>) -> Result<()> {
  match outcome {
    EventOutcome::Installed(installed) => {
      println!("Installed {}", installed.generation);
      if installed.skip_waiting {
        println!("  skip-waiting requested: run `activate` to take over");
      }
    }
    EventOutcome::Activated(report) => print_activation(&report),
    EventOutcome::Fetched(FetchOutcome::Declined) => {
      println!("Declined: left to default network handling");
    }
    EventOutcome::Fetched(FetchOutcome::Responded(routed)) => {
      println!("{} ({:?})", routed.response.status, routed.source);
      if let Some(cached_at) = routed.cached_at {
        println!("cached-at: {}", cached_at.to_rfc3339());
      }
      for (name, value) in &routed.response.headers {
        println!("{}: {}", name, value);
      }
      println!("{} byte(s)", routed.response.body.len());
      if let Some(path) = output {
        std::fs::write(&path, &routed.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      }
    }
    EventOutcome::Broadcast { contexts } => {
      println!("Posted CHECK_EXPIRATIONS to {} context(s)", contexts);
    }
    EventOutcome::NotificationShown { id } => println!("Shown notification {}", id),
    EventOutcome::NotificationClicked(action) => println!("{:?}", action),
    EventOutcome::Unhandled => println!("Event not handled"),
  }
  Ok(())
}
