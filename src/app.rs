//! Long-running host loop: feeds timer, connectivity and stdin signals into the agent.

use async_trait::async_trait;
use color_eyre::Result;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::agent::Agent;
use crate::commands::Command;
use crate::event::{AgentEvent, Signal, SignalSource};
use crate::notify::{ClientHost, ClientInfo, Notification};

/// Notification surface for a headless host: logs instead of displaying.
pub struct LogHost;

#[async_trait]
impl ClientHost for LogHost {
  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, "notification");
    Ok(())
  }

  async fn clients(&self) -> Result<Vec<ClientInfo>> {
    Ok(Vec::new())
  }

  async fn focus(&self, client_id: &str) -> Result<()> {
    info!(%client_id, "focus client");
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    info!(%url, "open client");
    Ok(())
  }
}

/// Print one JSON line on stdout, the host-facing channel.
pub fn emit_json<T: Serialize>(value: &T) {
  match serde_json::to_string(value) {
    Ok(line) => println!("{}", line),
    Err(e) => error!("Failed to serialize output: {}", e),
  }
}

pub struct App {
  agent: Agent,
  should_quit: bool,
}

impl App {
  pub fn new(agent: Agent) -> Self {
    Self {
      agent,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    match self.agent.on_install().await {
      Ok(report) => info!(
        generation = %report.generation,
        precached = report.precached,
        activated = report.activated,
        "install complete"
      ),
      Err(e) => warn!("Install failed, serving existing caches: {}", e),
    }
    match self.agent.on_activate() {
      Ok(Some(deleted)) => info!(deleted = deleted.len(), "activated waiting generation"),
      Ok(None) => {}
      Err(e) => error!("Activation failed: {}", e),
    }

    let config = self.agent.config().clone();
    let mut signals = SignalSource::new();
    signals.spawn_sweep_timer(config.sweep_interval());
    signals.spawn_connectivity_probe(
      self.agent.network(),
      config.resolve("/")?,
      config.connectivity_probe_interval(),
      config.network_timeout(),
    );
    spawn_stdin_reader(signals.sender());
    spawn_ctrl_c(signals.sender());
    spawn_event_printer(self.agent.subscribe());

    // Sweep once at startup; afterwards on the timer
    self.handle_signal(Signal::Sweep).await;

    while !self.should_quit {
      match signals.next().await {
        Some(signal) => self.handle_signal(signal).await,
        None => break,
      }
    }

    info!("agent stopped");
    Ok(())
  }

  async fn handle_signal(&mut self, signal: Signal) {
    match signal {
      Signal::Sweep => {
        if let Err(e) = self.agent.on_sweep() {
          error!("Eviction sweep failed: {}", e);
        }
      }
      Signal::Online => {
        self.agent.on_online().await;
      }
      Signal::Offline => info!("offline; mutations will be queued"),
      Signal::Command(command) => match self.agent.on_message(command).await {
        Ok(reply) => emit_json(&reply),
        Err(e) => error!("Command failed: {}", e),
      },
      Signal::Shutdown => self.should_quit = true,
    }
  }
}

/// Read JSON commands, one per line, from stdin.
fn spawn_stdin_reader(tx: mpsc::UnboundedSender<Signal>) {
  tokio::spawn(async move {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
      match lines.next_line().await {
        Ok(Some(line)) if line.trim().is_empty() => continue,
        Ok(Some(line)) => match Command::parse_json(&line) {
          Ok(command) => {
            if tx.send(Signal::Command(command)).is_err() {
              break;
            }
          }
          Err(e) => warn!("{}", e),
        },
        Ok(None) => {
          debug!("stdin closed");
          break;
        }
        Err(e) => {
          error!("Failed to read stdin: {}", e);
          break;
        }
      }
    }
  });
}

fn spawn_ctrl_c(tx: mpsc::UnboundedSender<Signal>) {
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      let _ = tx.send(Signal::Shutdown);
    }
  });
}

fn spawn_event_printer(mut rx: broadcast::Receiver<AgentEvent>) {
  tokio::spawn(async move {
    loop {
      match rx.recv().await {
        Ok(event) => emit_json(&event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          warn!(skipped, "event printer lagged");
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  });
}
