//! Durable FIFO of mutations attempted while offline.

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::DurableStorage;
use crate::clock::Clock;
use crate::config::RetryPolicy;

/// Durable key of the pending queue; outside the cache's key space.
pub const QUEUE_KEY: &str = "offline_queue_actions";
/// Durable key of actions dropped by the retry policy.
pub const DEAD_LETTER_KEY: &str = "offline_queue_dead";

/// A mutation waiting to be replayed against the origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
  pub id: Uuid,
  pub kind: String,
  pub payload: Value,
  /// Epoch millis
  pub created_at: i64,
  /// Failed replays so far
  #[serde(default)]
  pub attempts: u32,
}

/// Replays a queued action against the origin.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
  async fn replay(&self, action: &PendingAction) -> Result<()>;
}

/// Summary of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub processed: usize,
  pub remaining: usize,
  /// Action that failed and stopped the cycle
  pub halted_on: Option<Uuid>,
  /// Set when the failing action was moved to the dead-letter list
  pub dead_lettered: Option<Uuid>,
}

#[derive(Debug, Default)]
struct QueueState {
  pending: VecDeque<PendingAction>,
  dead: Vec<PendingAction>,
}

/// Ordered action queue mirrored to durable storage after every change.
#[derive(Clone)]
pub struct ActionQueue {
  storage: Arc<dyn DurableStorage>,
  clock: Arc<dyn Clock>,
  policy: RetryPolicy,
  state: Arc<Mutex<QueueState>>,
  /// Serializes drains; a second restoration signal waits for the first
  draining: Arc<tokio::sync::Mutex<()>>,
}

impl ActionQueue {
  /// Load the queue previously persisted in `storage`.
  pub fn open(
    storage: Arc<dyn DurableStorage>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
  ) -> Self {
    let pending: VecDeque<PendingAction> = load_list(storage.as_ref(), QUEUE_KEY).into();
    let dead = load_list(storage.as_ref(), DEAD_LETTER_KEY);
    if !pending.is_empty() {
      info!(count = pending.len(), "Restored pending offline actions");
    }

    Self {
      storage,
      clock,
      policy,
      state: Arc::new(Mutex::new(QueueState { pending, dead })),
      draining: Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  fn lock(&self) -> MutexGuard<'_, QueueState> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn persist(&self, state: &QueueState) {
    save_list(self.storage.as_ref(), QUEUE_KEY, state.pending.iter());
    save_list(self.storage.as_ref(), DEAD_LETTER_KEY, state.dead.iter());
  }

  /// Append an action to the back of the queue.
  pub fn enqueue(&self, kind: impl Into<String>, payload: Value) -> PendingAction {
    let action = PendingAction {
      id: Uuid::new_v4(),
      kind: kind.into(),
      payload,
      created_at: self.clock.now_millis(),
      attempts: 0,
    };
    let mut state = self.lock();
    state.pending.push_back(action.clone());
    self.persist(&state);
    debug!(id = %action.id, kind = %action.kind, "Queued offline action");
    action
  }

  pub fn pending(&self) -> Vec<PendingAction> {
    self.lock().pending.iter().cloned().collect()
  }

  pub fn dead_letters(&self) -> Vec<PendingAction> {
    self.lock().dead.clone()
  }

  pub fn len(&self) -> usize {
    self.lock().pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().pending.is_empty()
  }

  /// Explicitly drop an action, pending or dead-lettered.
  pub fn remove(&self, id: Uuid) -> bool {
    let mut state = self.lock();
    let before = state.pending.len() + state.dead.len();
    state.pending.retain(|a| a.id != id);
    state.dead.retain(|a| a.id != id);
    let removed = state.pending.len() + state.dead.len() != before;
    if removed {
      self.persist(&state);
    }
    removed
  }

  /// Replay actions front to back until one fails or the queue is empty.
  ///
  /// A failing action stays at the head (unless the retry policy dead-letters
  /// it) and everything behind it keeps its position for the next cycle.
  pub async fn drain(&self, executor: &dyn ActionExecutor) -> DrainReport {
    let _guard = self.draining.lock().await;
    let mut report = DrainReport::default();

    loop {
      let Some(action) = self.lock().pending.front().cloned() else {
        break;
      };

      match executor.replay(&action).await {
        Ok(()) => {
          let mut state = self.lock();
          state.pending.retain(|a| a.id != action.id);
          self.persist(&state);
          report.processed += 1;
          debug!(id = %action.id, kind = %action.kind, "Replayed offline action");
        }
        Err(e) => {
          let mut state = self.lock();
          let attempts = match state.pending.iter_mut().find(|a| a.id == action.id) {
            Some(queued) => {
              queued.attempts += 1;
              queued.attempts
            }
            None => action.attempts + 1,
          };
          warn!(
            id = %action.id,
            kind = %action.kind,
            attempts,
            error = %e,
            "Replay failed, halting drain"
          );

          if self.policy.exhausted(attempts) {
            if let Some(pos) = state.pending.iter().position(|a| a.id == action.id) {
              if let Some(failed) = state.pending.remove(pos) {
                warn!(id = %failed.id, "Moving action to dead letters");
                state.dead.push(failed);
                report.dead_lettered = Some(action.id);
              }
            }
          }
          self.persist(&state);
          report.halted_on = Some(action.id);
          break;
        }
      }
    }

    report.remaining = self.len();
    report
  }
}

fn load_list(storage: &dyn DurableStorage, key: &str) -> Vec<PendingAction> {
  match storage.get(key) {
    Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
      warn!(key, error = %e, "Discarding corrupt offline queue");
      Vec::new()
    }),
    Ok(None) => Vec::new(),
    Err(e) => {
      warn!(key, error = %e, "Failed to load offline queue");
      Vec::new()
    }
  }
}

fn save_list<'a>(
  storage: &dyn DurableStorage,
  key: &str,
  actions: impl Iterator<Item = &'a PendingAction>,
) {
  let actions: Vec<&PendingAction> = actions.collect();
  let result = serde_json::to_string(&actions)
    .map_err(crate::cache::StorageError::from)
    .and_then(|raw| storage.set(key, &raw));
  if let Err(e) = result {
    warn!(key, error = %e, "Failed to persist offline queue");
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::clock::ManualClock;
  use color_eyre::eyre::eyre;
  use std::collections::HashSet;

  /// Executor that fails for the listed kinds and records what it replayed.
  #[derive(Default)]
  pub(crate) struct ScriptedExecutor {
    pub failing: Mutex<HashSet<String>>,
    pub replayed: Mutex<Vec<String>>,
  }

  impl ScriptedExecutor {
    pub fn failing(kinds: &[&str]) -> Self {
      Self {
        failing: Mutex::new(kinds.iter().map(|k| k.to_string()).collect()),
        replayed: Mutex::new(Vec::new()),
      }
    }
  }

  #[async_trait]
  impl ActionExecutor for ScriptedExecutor {
    async fn replay(&self, action: &PendingAction) -> Result<()> {
      if self.failing.lock().unwrap().contains(&action.kind) {
        return Err(eyre!("{} rejected", action.kind));
      }
      self.replayed.lock().unwrap().push(action.kind.clone());
      Ok(())
    }
  }

  fn queue(policy: RetryPolicy) -> (ActionQueue, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let queue = ActionQueue::open(storage.clone(), Arc::new(ManualClock::new(5)), policy);
    (queue, storage)
  }

  fn kinds(actions: &[PendingAction]) -> Vec<&str> {
    actions.iter().map(|a| a.kind.as_str()).collect()
  }

  #[tokio::test]
  async fn test_drain_stops_at_first_failure() {
    let (queue, _) = queue(RetryPolicy::forever());
    for kind in ["A", "B", "C"] {
      queue.enqueue(kind, Value::Null);
    }

    let executor = ScriptedExecutor::failing(&["B"]);
    let report = queue.drain(&executor).await;

    assert_eq!(report.processed, 1);
    assert_eq!(report.remaining, 2);
    assert_eq!(kinds(&queue.pending()), vec!["B", "C"]);
    assert_eq!(*executor.replayed.lock().unwrap(), vec!["A"]);
    assert_eq!(queue.pending()[0].attempts, 1);
    assert!(report.dead_lettered.is_none());
  }

  #[tokio::test]
  async fn test_next_drain_retries_from_front() {
    let (queue, _) = queue(RetryPolicy::forever());
    for kind in ["A", "B", "C"] {
      queue.enqueue(kind, Value::Null);
    }
    let executor = ScriptedExecutor::failing(&["B"]);
    queue.drain(&executor).await;

    executor.failing.lock().unwrap().clear();
    let report = queue.drain(&executor).await;

    assert_eq!(report.processed, 2);
    assert!(queue.is_empty());
    assert_eq!(*executor.replayed.lock().unwrap(), vec!["A", "B", "C"]);
  }

  #[tokio::test]
  async fn test_dead_letter_after_max_attempts() {
    let (queue, _) = queue(RetryPolicy::dead_letter_after(2));
    queue.enqueue("A", Value::Null);
    queue.enqueue("B", Value::Null);
    let executor = ScriptedExecutor::failing(&["A"]);

    let first = queue.drain(&executor).await;
    assert_eq!(first.dead_lettered, None);
    assert_eq!(queue.len(), 2);

    let second = queue.drain(&executor).await;
    assert!(second.dead_lettered.is_some());
    assert_eq!(second.processed, 0);
    assert_eq!(kinds(&queue.pending()), vec!["B"]);
    assert_eq!(kinds(&queue.dead_letters()), vec!["A"]);

    let third = queue.drain(&executor).await;
    assert_eq!(third.processed, 1);
    assert!(queue.is_empty());
  }

  #[tokio::test]
  async fn test_queue_survives_reopen() {
    let (queue, storage) = queue(RetryPolicy::forever());
    let first = queue.enqueue("update_profile", serde_json::json!({"user_id": "u1"}));
    queue.enqueue("create_project", Value::Null);

    let reopened = ActionQueue::open(
      storage,
      Arc::new(ManualClock::new(0)),
      RetryPolicy::forever(),
    );
    let pending = reopened.pending();
    assert_eq!(kinds(&pending), vec!["update_profile", "create_project"]);
    assert_eq!(pending[0], first);
    assert_eq!(pending[0].created_at, 5);
  }

  #[tokio::test]
  async fn test_remove_is_explicit() {
    let (queue, _) = queue(RetryPolicy::forever());
    let a = queue.enqueue("A", Value::Null);
    assert!(queue.remove(a.id));
    assert!(!queue.remove(a.id));
    assert!(queue.is_empty());
  }

  #[test]
  fn test_corrupt_queue_loads_empty() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(QUEUE_KEY, "not json").unwrap();
    let queue = ActionQueue::open(storage, Arc::new(ManualClock::new(0)), RetryPolicy::forever());
    assert!(queue.is_empty());
  }
}
