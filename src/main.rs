mod config;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use shipsync::reachability::{ManualReachability, ProbeReachability, Reachability};
use shipsync::transport::{EnvToken, HttpTransport, Method};
use shipsync::{EngineOptions, SqliteStore, SyncEngine, SyncEvent, SyncResponse};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "shipsync")]
#[command(about = "Offline-first sync client for the dangerous-goods mobile API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shipsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable: serve from cache and queue writes
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read a resource, from cache when possible
  Get {
    path: String,
    /// Query parameter as key=value (repeatable)
    #[arg(short, long = "param")]
    params: Vec<String>,
    /// Skip the cache entirely
    #[arg(long)]
    no_cache: bool,
  },
  /// Send a write, queueing it when offline
  Send {
    /// POST, PUT, PATCH or DELETE
    method: Method,
    path: String,
    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Show connectivity, cache size and pending writes
  Status,
  /// Send every pending write now
  Drain,
  /// Drain on every reconnect and print sync events until interrupted
  Watch,
  /// Remove cached responses
  ClearCache {
    /// Only remove entries older than this many seconds
    #[arg(long)]
    older_than: Option<i64>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&logging::log_dir()?)?;

  let engine = build_engine(&config, args.offline).await?;

  match args.command {
    Command::Get {
      path,
      params,
      no_cache,
    } => {
      let params = parse_params(&params)?;
      let response = engine.request(Method::Get, &path, params, !no_cache).await?;
      print_response(&response)?;
    }
    Command::Send { method, path, body } => {
      if !method.is_mutating() {
        return Err(eyre!("Use `get` for {} requests", method));
      }
      let body = body
        .map(|b| serde_json::from_str::<Value>(&b))
        .transpose()
        .map_err(|e| eyre!("Invalid JSON body: {}", e))?;
      let response = engine.request(method, &path, body, false).await?;
      print_response(&response)?;
    }
    Command::Status => {
      println!("online:   {}", engine.is_online());
      println!("cached:   {}", engine.cache().len());
      println!("pending:  {}", engine.queue_depth());
      for request in engine.pending_requests() {
        println!(
          "  {} {} {} (attempts: {}, queued {})",
          request.id,
          request.method,
          request.path,
          request.retry_count,
          request.enqueued_at.format("%Y-%m-%d %H:%M:%S")
        );
      }
    }
    Command::Drain => {
      let mut events = engine.subscribe();
      let result = engine.drain().await;
      while let Ok(event) = events.try_recv() {
        print_event(&event);
      }
      let report = result?;
      println!(
        "delivered {}, retrying {}, dropped {}, remaining {}",
        report.delivered.len(),
        report.retried.len(),
        report.exhausted.len() + report.rejected.len(),
        report.remaining
      );
    }
    Command::Watch => watch(&engine).await?,
    Command::ClearCache { older_than } => {
      let removed = match older_than {
        Some(secs) => {
          let max_age = chrono::Duration::try_seconds(secs)
            .ok_or_else(|| eyre!("--older-than is out of range: {}", secs))?;
          engine.cache().sweep(max_age)?
        }
        None => engine.clear_cache()?,
      };
      println!("removed {} cached responses", removed);
    }
  }

  Ok(())
}

async fn build_engine(config: &config::Config, offline: bool) -> Result<SyncEngine> {
  let store = match &config.storage.path {
    Some(path) => SqliteStore::open(path)?,
    None => SqliteStore::open_default()?,
  };

  let tokens = Arc::new(EnvToken::new(config::TOKEN_ENV));
  let transport = HttpTransport::new(&config.api.base_url, config.request_timeout(), tokens)?;

  let reachability: Arc<dyn Reachability> = if offline {
    Arc::new(ManualReachability::new(false))
  } else {
    let url = Url::parse(config.probe_url()).map_err(|e| eyre!("Invalid probe URL: {}", e))?;
    Arc::new(ProbeReachability::spawn(url, config.probe_interval(), config.request_timeout()).await?)
  };

  let options = EngineOptions {
    request_timeout: config.request_timeout(),
    cache_ttl: config.cache_ttl()?,
    max_retry: config.sync.max_retry,
    ..EngineOptions::default()
  };

  Ok(SyncEngine::new(
    Arc::new(store),
    Arc::new(transport),
    reachability,
    options,
  )?)
}

async fn watch(engine: &SyncEngine) -> Result<()> {
  let mut events = engine.subscribe();
  let _watcher = engine.start();

  println!(
    "watching ({}, {} pending), ctrl-c to stop",
    if engine.is_online() { "online" } else { "offline" },
    engine.queue_depth()
  );

  // Writes left over from a previous session
  if engine.is_online() && engine.queue_depth() > 0 {
    engine.drain().await?;
  }

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      event = events.recv() => match event {
        Ok(event) => print_event(&event),
        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
          tracing::warn!(missed = n, "event subscriber lagged");
        }
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      },
    }
  }

  Ok(())
}

/// Parse `key=value` pairs into a JSON object.
fn parse_params(raw: &[String]) -> Result<Option<Value>> {
  if raw.is_empty() {
    return Ok(None);
  }
  let mut params = Map::new();
  for pair in raw {
    let (key, value) = pair
      .split_once('=')
      .ok_or_else(|| eyre!("Invalid parameter '{}', expected key=value", pair))?;
    params.insert(key.to_string(), Value::String(value.to_string()));
  }
  Ok(Some(Value::Object(params)))
}

fn print_response(response: &SyncResponse) -> Result<()> {
  if response.is_stale() {
    if let Some(at) = response.cached_at {
      eprintln!("(offline: showing data cached at {})", at.format("%Y-%m-%d %H:%M:%S"));
    }
  } else if response.is_pending() {
    eprintln!("(offline: queued for delivery)");
  }
  println!("{}", serde_json::to_string_pretty(&response.payload)?);
  Ok(())
}

fn print_event(event: &SyncEvent) {
  match event {
    SyncEvent::ConnectivityChanged { online } => {
      println!("{}", if *online { "online" } else { "offline" });
    }
    SyncEvent::Queued { request } => println!("queued   {} {}", request.method, request.path),
    SyncEvent::Delivered { request } => println!("sent     {} {}", request.method, request.path),
    SyncEvent::Rejected {
      request,
      status,
      body,
    } => println!("rejected {} {} ({}): {}", request.method, request.path, status, body),
    SyncEvent::RetryExhausted { request, last_error } => println!(
      "dropped  {} {} after {} attempts: {}",
      request.method, request.path, request.retry_count, last_error
    ),
    SyncEvent::DrainCompleted {
      delivered,
      retried,
      dropped,
      remaining,
    } => println!(
      "drained: {} sent, {} retrying, {} dropped, {} left",
      delivered, retried, dropped, remaining
    ),
  }
}
