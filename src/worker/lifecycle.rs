//! Install/activate transitions, generation GC and client control.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use indexmap::IndexMap;
use tracing::{debug, info};
use url::Url;

use super::http::Request;
use super::network::Network;
use super::platform_cache::{Generations, PlatformCaches};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  /// Installed, waiting for the active version to step aside
  Waiting,
  Active,
  Superseded,
  /// Precache failed; never activates
  Rejected,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerState::Installing => "installing",
      WorkerState::Waiting => "waiting",
      WorkerState::Active => "active",
      WorkerState::Superseded => "superseded",
      WorkerState::Rejected => "rejected",
    };
    f.write_str(s)
  }
}

/// Fetch every manifest entry and store them only if all succeeded.
pub async fn precache(
  network: &dyn Network,
  caches: &PlatformCaches,
  generations: &Generations,
  origin: &Url,
  manifest: &[String],
) -> Result<usize> {
  let requests = manifest
    .iter()
    .map(|path| {
      origin
        .join(path)
        .map(Request::get)
        .map_err(|e| eyre!("Invalid precache entry '{}': {}", path, e))
    })
    .collect::<Result<Vec<_>>>()?;

  let responses = join_all(requests.iter().map(|r| network.fetch(r))).await;

  let mut entries = Vec::with_capacity(requests.len());
  for (request, response) in requests.into_iter().zip(responses) {
    let response = response.map_err(|e| eyre!("Precache of {} failed: {}", request.url, e))?;
    if !response.is_success() {
      return Err(eyre!(
        "Precache of {} failed with status {}",
        request.url,
        response.status
      ));
    }
    entries.push((request, response));
  }

  let count = entries.len();
  caches.put_all(&generations.static_name, entries);
  caches.open(&generations.dynamic_name);
  info!(generation = %generations.static_name, count, "Precached static assets");
  Ok(count)
}

/// Delete every generation not owned by `current`. Returns the deleted names.
pub fn collect_garbage(caches: &PlatformCaches, current: &Generations) -> Vec<String> {
  let mut deleted = Vec::new();
  for name in caches.names() {
    if !current.is_current(&name) && caches.delete(&name) {
      debug!(generation = %name, "Deleted stale cache generation");
      deleted.push(name);
    }
  }
  deleted
}

/// Open clients and the worker version controlling each.
#[derive(Clone, Default)]
pub struct Clients {
  controllers: Arc<Mutex<IndexMap<String, Option<u32>>>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, IndexMap<String, Option<u32>>> {
    self
      .controllers
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// A newly opened client is uncontrolled until the next claim.
  pub fn open(&self, id: impl Into<String>) {
    self.lock().entry(id.into()).or_insert(None);
  }

  pub fn close(&self, id: &str) -> bool {
    self.lock().shift_remove(id).is_some()
  }

  pub fn controller(&self, id: &str) -> Option<u32> {
    self.lock().get(id).copied().flatten()
  }

  /// Put every open client under `version`. Returns how many changed controller.
  pub fn claim(&self, version: u32) -> usize {
    let mut controllers = self.lock();
    let mut changed = 0;
    for controller in controllers.values_mut() {
      if *controller != Some(version) {
        *controller = Some(version);
        changed += 1;
      }
    }
    changed
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::tests::FakeNetwork;
  use reqwest::StatusCode;

  fn origin() -> Url {
    Url::parse("https://app.test").unwrap()
  }

  fn manifest() -> Vec<String> {
    vec!["/".to_string(), "/index.html".to_string(), "/offline.html".to_string()]
  }

  #[tokio::test]
  async fn test_precache_stores_every_asset() {
    let network = FakeNetwork::serving(&[
      ("/", "root"),
      ("/index.html", "index"),
      ("/offline.html", "offline"),
    ]);
    let caches = PlatformCaches::new();
    let generations = Generations::for_version(1);

    let count = precache(&network, &caches, &generations, &origin(), &manifest())
      .await
      .unwrap();
    assert_eq!(count, 3);
    assert_eq!(caches.len("static-v1"), 3);
    assert_eq!(caches.names(), vec!["static-v1", "dynamic-v1"]);
  }

  #[tokio::test]
  async fn test_precache_is_all_or_nothing() {
    let network = FakeNetwork::serving(&[("/", "root"), ("/index.html", "index")]);
    let caches = PlatformCaches::new();
    let generations = Generations::for_version(1);

    let result = precache(&network, &caches, &generations, &origin(), &manifest()).await;
    assert!(result.is_err());
    assert_eq!(caches.len("static-v1"), 0);
  }

  #[tokio::test]
  async fn test_precache_rejects_error_status() {
    let network =
      FakeNetwork::serving(&[("/", "root")]).with_status("/index.html", StatusCode::NOT_FOUND);
    let caches = PlatformCaches::new();

    let result = precache(
      &network,
      &caches,
      &Generations::for_version(1),
      &origin(),
      &["/".to_string(), "/index.html".to_string()],
    )
    .await;
    assert!(result.is_err());
    assert!(caches.names().is_empty());
  }

  #[test]
  fn test_collect_garbage_keeps_current_generations() {
    let caches = PlatformCaches::new();
    for name in ["static-v1", "dynamic-v1", "static-v2", "dynamic-v2", "legacy"] {
      caches.open(name);
    }

    let mut deleted = collect_garbage(&caches, &Generations::for_version(2));
    deleted.sort();
    assert_eq!(deleted, vec!["dynamic-v1", "legacy", "static-v1"]);
    assert_eq!(caches.names(), vec!["static-v2", "dynamic-v2"]);
  }

  #[test]
  fn test_claim_controls_open_clients() {
    let clients = Clients::new();
    clients.open("tab-1");
    clients.open("tab-2");
    assert_eq!(clients.controller("tab-1"), None);

    assert_eq!(clients.claim(1), 2);
    assert_eq!(clients.claim(1), 0);
    assert_eq!(clients.controller("tab-2"), Some(1));

    clients.open("tab-3");
    assert_eq!(clients.claim(2), 3);
    assert!(clients.close("tab-1"));
    assert_eq!(clients.len(), 2);
  }
}
