use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use edgecache::app::{emit_json, App, LogHost};
use edgecache::commands::{self, COMMANDS};
use edgecache::config::{self, AgentConfig};
use edgecache::notify::Notification;
use edgecache::{Agent, Headers, Request, RequestMode};

#[derive(Parser, Debug)]
#[command(name = "edgecache")]
#[command(about = "Offline-first edge cache and request replay agent")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/edgecache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Database path, overriding the config file
  #[arg(long, global = true)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Run the agent: install, sweep on a timer, replay on reconnect, read commands from stdin
  Run,
  /// Send one request through the agent and print the response
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// navigate, same-origin, cors or no-cors
    #[arg(long, default_value = "same-origin")]
    mode: String,
    /// Request header as "name: value"
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Replay queued requests now
  Sync,
  /// Evict expired dynamic cache entries
  Sweep,
  /// Delete all caches, queued requests and snapshots
  Clear,
  /// Send a command by name or alias
  Send {
    name: String,
    #[arg(long)]
    id: Option<String>,
    /// JSON payload for CACHE_SNAPSHOT
    #[arg(long)]
    payload: Option<String>,
  },
  /// Render a push payload
  Push { payload: String },
  /// Route a click on a notification built from a push payload
  Click {
    payload: String,
    /// Clicked action button, e.g. "open" or "dismiss"
    #[arg(long)]
    action: Option<String>,
  },
  /// Show caches, queue depth and snapshot count
  Status,
}

fn init_logging(daemon: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("EDGECACHE_LOG")
    .unwrap_or_else(|_| EnvFilter::new("edgecache=info"));

  if daemon {
    let log_dir = config::data_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)
      .map_err(|e| eyre!("Failed to create log directory: {}", e))?;
    let appender = tracing_appender::rolling::daily(log_dir, "edgecache.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
      .with(filter)
      .with(fmt::layer().with_writer(writer).with_ansi(false))
      .with(fmt::layer().with_writer(std::io::stderr))
      .init();
    Ok(Some(guard))
  } else {
    tracing_subscriber::registry()
      .with(filter)
      .with(fmt::layer().with_writer(std::io::stderr))
      .init();
    Ok(None)
  }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| eyre!("Header must look like 'name: value': {}", raw))?;
  Ok((name.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(matches!(args.command, Cmd::Run))?;

  // Load configuration
  let config = AgentConfig::load(args.config.as_deref())?;

  // Override database if specified on command line
  let config = if let Some(database) = args.database {
    AgentConfig {
      database: Some(database),
      ..config
    }
  } else {
    config
  };

  let agent = Agent::open(config)?;

  match args.command {
    Cmd::Run => App::new(agent).run().await?,
    Cmd::Fetch {
      url,
      method,
      mode,
      headers,
      body,
    } => {
      let headers = headers
        .iter()
        .map(|h| parse_header(h))
        .collect::<Result<Headers>>()?;
      let request = Request {
        method: method.parse()?,
        url: agent.config().resolve(&url)?,
        headers,
        body: body.map(String::into_bytes),
        mode: mode.parse::<RequestMode>()?,
      };

      let response = agent.on_fetch(request).await?;
      eprintln!("{} ({:?})", response.status, response.source);
      for (name, value) in response.headers.iter() {
        eprintln!("{}: {}", name, value);
      }
      println!("{}", response.text());
    }
    Cmd::Sync => emit_json(&agent.on_sync().await),
    Cmd::Sweep => emit_json(&agent.on_sweep()?),
    Cmd::Clear => emit_json(&agent.on_message(commands::Command::ClearCache).await?),
    Cmd::Send { name, id, payload } => {
      let payload = payload
        .map(|p| serde_json::from_str(&p).map_err(|e| eyre!("Invalid --payload JSON: {}", e)))
        .transpose()?;
      let command = match commands::build(&name, id, payload) {
        Ok(command) => command,
        Err(e) => {
          let mut suggestions = commands::get_suggestions(&name);
          if suggestions.is_empty() {
            suggestions = COMMANDS.iter().collect();
          }
          eprintln!("Did you mean:");
          for info in suggestions {
            eprintln!("  {:<16} {}", info.name, info.description);
          }
          return Err(e);
        }
      };
      emit_json(&agent.on_message(command).await?);
    }
    Cmd::Push { payload } => {
      let notification = agent.on_push(&LogHost, payload.as_bytes()).await?;
      emit_json(&notification);
    }
    Cmd::Click { payload, action } => {
      let notification = Notification::from_push(payload.as_bytes());
      let outcome = agent
        .on_notification_click(&LogHost, action, &notification)
        .await?;
      eprintln!("{:?}", outcome);
    }
    Cmd::Status => emit_json(&agent.status()?),
  }

  Ok(())
}
