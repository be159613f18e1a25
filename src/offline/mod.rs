//! Offline action queue and push notification handling.

mod push;
mod queue;

pub use push::{
  ClickOutcome, Notification, NotificationAction, Notifier, PushHandler, PushPayload, ACTION_CLOSE,
  ACTION_VIEW,
};
pub use queue::{
  ActionExecutor, ActionQueue, DrainReport, PendingAction, DEAD_LETTER_KEY, QUEUE_KEY,
};

#[cfg(test)]
pub(crate) use push::tests::RecordingNotifier;
#[cfg(test)]
pub(crate) use queue::tests::ScriptedExecutor;
