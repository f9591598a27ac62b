//! Push payload rendering and notification click routing.

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::event::{AgentEvent, EventBus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// A notification as shown on the host's notification surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  #[serde(default = "default_title")]
  pub title: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub icon: Option<String>,
  #[serde(default)]
  pub tag: Option<String>,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
  #[serde(default)]
  pub data: Value,
}

fn default_title() -> String {
  "New notification".to_string()
}

impl Notification {
  /// Parse a delivered push payload. Non-JSON payloads become the body text.
  pub fn from_push(payload: &[u8]) -> Self {
    match serde_json::from_slice::<Notification>(payload) {
      Ok(notification) => notification,
      Err(_) => Self {
        title: default_title(),
        body: String::from_utf8_lossy(payload).trim().to_string(),
        icon: None,
        tag: None,
        actions: Vec::new(),
        data: Value::Null,
      },
    }
  }

  /// URL a click should lead to, from `data.url`.
  pub fn target_url(&self) -> Option<&str> {
    self.data.get("url").and_then(Value::as_str)
  }
}

/// An open window of the hosting application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: String,
  pub url: String,
  pub focused: bool,
}

/// The host surfaces the agent can drive.
#[async_trait]
pub trait ClientHost: Send + Sync {
  async fn show_notification(&self, notification: &Notification) -> Result<()>;

  /// Currently open clients
  async fn clients(&self) -> Result<Vec<ClientInfo>>;

  async fn focus(&self, client_id: &str) -> Result<()>;

  async fn open_window(&self, url: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An open client was focused and received the click payload
  Focused { client_id: String },
  /// No client was open; a new one was opened
  Opened { url: String },
  /// The "dismiss" action closes without navigating
  Dismissed,
}

/// Render a delivered push payload.
pub async fn handle_push(host: &dyn ClientHost, payload: &[u8]) -> Result<Notification> {
  let notification = Notification::from_push(payload);
  info!(title = %notification.title, tag = ?notification.tag, "showing notification");
  host.show_notification(&notification).await?;
  Ok(notification)
}

/// Route a notification click to an open client, or open a new one.
///
/// A client already showing the target URL is preferred, then the focused
/// client, then any client.
pub async fn handle_click(
  host: &dyn ClientHost,
  events: &EventBus,
  action: Option<String>,
  notification: &Notification,
  default_url: &str,
) -> Result<ClickOutcome> {
  if action.as_deref() == Some("dismiss") {
    debug!("notification dismissed");
    return Ok(ClickOutcome::Dismissed);
  }

  let target = notification.target_url().unwrap_or(default_url).to_string();
  let clients = host.clients().await?;

  let chosen = clients
    .iter()
    .find(|c| c.url == target)
    .or_else(|| clients.iter().find(|c| c.focused))
    .or_else(|| clients.first());

  match chosen {
    Some(client) => {
      host.focus(&client.id).await?;
      events.emit(AgentEvent::NotificationClick {
        action,
        data: notification.data.clone(),
      });
      Ok(ClickOutcome::Focused {
        client_id: client.id.clone(),
      })
    }
    None => {
      info!(url = %target, "opening client for notification");
      host.open_window(&target).await?;
      Ok(ClickOutcome::Opened { url: target })
    }
  }
}


#[cfg(test)]
mod tests {
  use super::recording::{client, RecordingHost};
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_push_json_payload_is_rendered() {
    let host = RecordingHost::default();
    let payload = json!({
      "title": "Resume synced",
      "body": "Your changes are saved",
      "tag": "sync",
      "actions": [{"action": "open", "title": "Open"}],
      "data": {"url": "https://app.test/editor"}
    });

    let shown = handle_push(&host, payload.to_string().as_bytes()).await.unwrap();
    assert_eq!(shown.title, "Resume synced");
    assert_eq!(shown.actions.len(), 1);
    assert_eq!(shown.target_url(), Some("https://app.test/editor"));
    assert_eq!(host.shown.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_push_text_payload_becomes_body() {
    let host = RecordingHost::default();
    let shown = handle_push(&host, b"plain text").await.unwrap();
    assert_eq!(shown.title, "New notification");
    assert_eq!(shown.body, "plain text");
  }

  #[tokio::test]
  async fn test_click_focuses_matching_client_and_forwards() {
    let host = RecordingHost {
      clients: vec![
        client("a", "https://app.test/", true),
        client("b", "https://app.test/editor", false),
      ],
      ..Default::default()
    };
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let notification = Notification::from_push(br#"{"data":{"url":"https://app.test/editor"}}"#);

    let outcome = handle_click(&host, &events, Some("open".to_string()), &notification, "/")
      .await
      .unwrap();

    assert_eq!(outcome, ClickOutcome::Focused { client_id: "b".to_string() });
    assert_eq!(
      rx.recv().await.unwrap(),
      AgentEvent::NotificationClick {
        action: Some("open".to_string()),
        data: json!({"url": "https://app.test/editor"})
      }
    );
  }

  #[tokio::test]
  async fn test_click_without_clients_opens_target() {
    let host = RecordingHost::default();
    let notification = Notification::from_push(br#"{"data":{"url":"https://app.test/jobs"}}"#);

    let outcome = handle_click(&host, &EventBus::default(), None, &notification, "/")
      .await
      .unwrap();

    assert_eq!(outcome, ClickOutcome::Opened { url: "https://app.test/jobs".to_string() });
    assert_eq!(*host.opened.lock().unwrap(), vec!["https://app.test/jobs".to_string()]);
  }

  #[tokio::test]
  async fn test_dismiss_does_nothing() {
    let host = RecordingHost {
      clients: vec![client("a", "https://app.test/", true)],
      ..Default::default()
    };
    let notification = Notification::from_push(b"{}");
    let outcome = handle_click(
      &host,
      &EventBus::default(),
      Some("dismiss".to_string()),
      &notification,
      "/",
    )
    .await
    .unwrap();

    assert_eq!(outcome, ClickOutcome::Dismissed);
    assert!(host.focused.lock().unwrap().is_empty());
  }
}
