//! Inbound push payloads rendered as user-facing notifications.

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::NotificationConfig;

pub const ACTION_VIEW: &str = "view";
pub const ACTION_CLOSE: &str = "close";

/// Platform notification service.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, notification: &Notification) -> Result<()>;

  /// Focus or open an in-app destination.
  async fn open(&self, url: &str) -> Result<()>;
}

/// Fields a push message may carry; everything is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tag: Option<String>,
  pub actions: Vec<NotificationAction>,
}

/// What a notification click resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Navigated(String),
  Dismissed,
}

pub struct PushHandler {
  config: NotificationConfig,
}

impl PushHandler {
  pub fn new(config: NotificationConfig) -> Self {
    Self { config }
  }

  /// Build the notification for a raw push payload.
  ///
  /// JSON payloads supply title/body/tag; anything else becomes the body.
  pub fn render(&self, payload: Option<&[u8]>) -> Notification {
    let parsed = match payload {
      Some(bytes) => serde_json::from_slice::<PushPayload>(bytes).unwrap_or_else(|_| PushPayload {
        body: Some(String::from_utf8_lossy(bytes).into_owned()),
        ..Default::default()
      }),
      None => PushPayload::default(),
    };

    Notification {
      title: parsed
        .title
        .unwrap_or_else(|| self.config.default_title.clone()),
      body: parsed.body.unwrap_or_default(),
      icon: self.config.icon.clone(),
      badge: self.config.icon.clone(),
      tag: parsed.tag,
      actions: vec![
        NotificationAction {
          action: ACTION_VIEW.to_string(),
          title: "View".to_string(),
        },
        NotificationAction {
          action: ACTION_CLOSE.to_string(),
          title: "Close".to_string(),
        },
      ],
    }
  }

  /// Render and show; delivery failures are logged and not retried.
  pub async fn handle_push(&self, notifier: &dyn Notifier, payload: Option<&[u8]>) -> Notification {
    let notification = self.render(payload);
    if let Err(e) = notifier.show(&notification).await {
      warn!(error = %e, "Failed to show notification");
    }
    notification
  }

  /// Only "view" has an effect beyond dismissal.
  pub async fn handle_click(&self, notifier: &dyn Notifier, action: Option<&str>) -> ClickOutcome {
    if action != Some(ACTION_VIEW) {
      debug!(?action, "Notification dismissed");
      return ClickOutcome::Dismissed;
    }
    let url = self.config.view_url.clone();
    if let Err(e) = notifier.open(&url).await {
      warn!(url = %url, error = %e, "Failed to open notification destination");
    }
    ClickOutcome::Navigated(url)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::Mutex;

  #[derive(Default)]
  pub(crate) struct RecordingNotifier {
    pub shown: Mutex<Vec<Notification>>,
    pub opened: Mutex<Vec<String>>,
    pub fail_show: bool,
  }

  #[async_trait]
  impl Notifier for RecordingNotifier {
    async fn show(&self, notification: &Notification) -> Result<()> {
      if self.fail_show {
        return Err(eyre!("permission denied"));
      }
      self.shown.lock().unwrap().push(notification.clone());
      Ok(())
    }

    async fn open(&self, url: &str) -> Result<()> {
      self.opened.lock().unwrap().push(url.to_string());
      Ok(())
    }
  }

  fn handler() -> PushHandler {
    PushHandler::new(NotificationConfig::default())
  }

  #[test]
  fn test_render_json_payload() {
    let n = handler().render(Some(
      br#"{"title":"New bid","body":"You got a proposal","tag":"bid"}"#.as_slice(),
    ));
    assert_eq!(n.title, "New bid");
    assert_eq!(n.body, "You got a proposal");
    assert_eq!(n.tag.as_deref(), Some("bid"));
    let actions: Vec<&str> = n.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec![ACTION_VIEW, ACTION_CLOSE]);
  }

  #[test]
  fn test_render_text_payload_uses_default_title() {
    let n = handler().render(Some(b"plain text".as_slice()));
    assert_eq!(n.title, "Freelance Marketplace");
    assert_eq!(n.body, "plain text");
  }

  #[test]
  fn test_render_empty_payload() {
    let n = handler().render(None);
    assert_eq!(n.title, "Freelance Marketplace");
    assert_eq!(n.body, "");
  }

  #[tokio::test]
  async fn test_view_click_navigates_to_fixed_destination() {
    let notifier = RecordingNotifier::default();
    let outcome = handler().handle_click(&notifier, Some(ACTION_VIEW)).await;
    assert_eq!(outcome, ClickOutcome::Navigated("/dashboard".to_string()));
    assert_eq!(*notifier.opened.lock().unwrap(), vec!["/dashboard"]);
  }

  #[tokio::test]
  async fn test_other_clicks_only_dismiss() {
    let notifier = RecordingNotifier::default();
    for action in [Some(ACTION_CLOSE), None, Some("unknown")] {
      assert_eq!(
        handler().handle_click(&notifier, action).await,
        ClickOutcome::Dismissed
      );
    }
    assert!(notifier.opened.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_show_failure_is_swallowed() {
    let notifier = RecordingNotifier {
      fail_show: true,
      ..Default::default()
    };
    let n = handler().handle_push(&notifier, Some(b"hello".as_slice())).await;
    assert_eq!(n.body, "hello");
    assert!(notifier.shown.lock().unwrap().is_empty());
  }
}
