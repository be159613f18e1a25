//! Network interception proxy.
//!
//! A [`ServiceWorker`] is one versioned instance of the proxy. A
//! [`Registration`] hosts the active and waiting versions, routes client
//! fetches and messages to whichever one is in control, and owns the
//! platform caches and the client registry they share.

mod http;
mod lifecycle;
mod messages;
mod network;
mod platform_cache;
mod routing;

use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::offline::{
  ActionExecutor, ActionQueue, ClickOutcome, DrainReport, Notification, Notifier, PushHandler,
};

pub use http::{Destination, Request, Response, OFFLINE_API_ERROR};
pub use lifecycle::{collect_garbage, precache, Clients, WorkerState};
pub use messages::ClientMessage;
pub use network::{HttpNetwork, Network, NetworkError};
pub use platform_cache::{generation_name, CacheRole, Generations, PlatformCaches};
pub use routing::{Router, Strategy};

struct SyncHooks {
  queue: ActionQueue,
  executor: Arc<dyn ActionExecutor>,
}

struct PushHooks {
  handler: PushHandler,
  notifier: Arc<dyn Notifier>,
}

pub struct ServiceWorker {
  config: WorkerConfig,
  origin: Url,
  generations: Generations,
  router: Router,
  network: Arc<dyn Network>,
  caches: PlatformCaches,
  state: Mutex<WorkerState>,
  sync: Option<SyncHooks>,
  push: Option<PushHooks>,
}

impl ServiceWorker {
  pub fn new(
    config: &WorkerConfig,
    origin: Url,
    network: Arc<dyn Network>,
    caches: PlatformCaches,
  ) -> Result<Self> {
    Ok(Self {
      router: Router::new(&config.api_patterns)?,
      generations: Generations::for_version(config.version),
      config: config.clone(),
      origin,
      network,
      caches,
      state: Mutex::new(WorkerState::Installing),
      sync: None,
      push: None,
    })
  }

  /// Drain `queue` through `executor` on background sync.
  pub fn with_queue(mut self, queue: ActionQueue, executor: Arc<dyn ActionExecutor>) -> Self {
    self.sync = Some(SyncHooks { queue, executor });
    self
  }

  pub fn with_push(mut self, handler: PushHandler, notifier: Arc<dyn Notifier>) -> Self {
    self.push = Some(PushHooks { handler, notifier });
    self
  }

  pub fn version(&self) -> u32 {
    self.generations.version
  }

  pub fn generations(&self) -> &Generations {
    &self.generations
  }

  fn state_lock(&self) -> MutexGuard<'_, WorkerState> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn state(&self) -> WorkerState {
    *self.state_lock()
  }

  fn set_state(&self, state: WorkerState) {
    *self.state_lock() = state;
  }

  /// Precache the manifest. A failed install leaves the worker rejected.
  pub async fn install(&self) -> Result<()> {
    if self.state() != WorkerState::Installing {
      return Err(eyre!(
        "Cannot install worker v{} in state {}",
        self.version(),
        self.state()
      ));
    }

    let result = precache(
      self.network.as_ref(),
      &self.caches,
      &self.generations,
      &self.origin,
      &self.config.precache,
    )
    .await;

    match result {
      Ok(_) => {
        self.set_state(WorkerState::Waiting);
        Ok(())
      }
      Err(e) => {
        warn!(version = self.version(), error = %e, "Install rejected");
        self.set_state(WorkerState::Rejected);
        Err(e)
      }
    }
  }

  /// Collect stale generations and take control of every open client.
  pub fn activate(&self, clients: &Clients) -> Result<Vec<String>> {
    let state = self.state();
    if state != WorkerState::Waiting {
      return Err(eyre!(
        "Cannot activate worker v{} in state {}",
        self.version(),
        state
      ));
    }

    let deleted = collect_garbage(&self.caches, &self.generations);
    let claimed = clients.claim(self.version());
    self.set_state(WorkerState::Active);
    info!(
      version = self.version(),
      deleted = deleted.len(),
      claimed,
      "Worker activated"
    );
    Ok(deleted)
  }

  pub fn supersede(&self) {
    self.set_state(WorkerState::Superseded);
  }

  pub async fn handle_fetch(&self, request: &Request) -> Response {
    if self.state() != WorkerState::Active {
      return passthrough(self.network.as_ref(), request).await;
    }

    match self.router.classify(request) {
      Strategy::Passthrough => passthrough(self.network.as_ref(), request).await,
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::CacheFirst => self.cache_first(request).await,
    }
  }

  async fn network_first(&self, request: &Request) -> Response {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self
            .caches
            .put(&self.generations.dynamic_name, request, response.clone());
        }
        response
      }
      Err(e) => match self.caches.match_any(request) {
        Some(cached) => {
          debug!(url = %request.url, error = %e, "Serving cached API response");
          cached
        }
        None => {
          warn!(url = %request.url, error = %e, "Offline with no cached API response");
          Response::offline_api()
        }
      },
    }
  }

  async fn cache_first(&self, request: &Request) -> Response {
    if let Some(cached) = self.caches.match_any(request) {
      return cached;
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() && request.url.origin() == self.origin.origin() {
          self
            .caches
            .put(&self.generations.dynamic_name, request, response.clone());
        }
        response
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Asset fetch failed");
        if request.is_navigation() {
          if let Some(page) = self.offline_page() {
            return page;
          }
        }
        Response::network_error()
      }
    }
  }

  fn offline_page(&self) -> Option<Response> {
    let url = self.origin.join(&self.config.offline_page).ok()?;
    self.caches.match_any(&Request::get(url))
  }

  /// Store `value` as a JSON 200 for URL `key` in the dynamic generation.
  pub fn cache_data(&self, key: &str, value: &Value) -> Result<()> {
    let url = self
      .origin
      .join(key)
      .map_err(|e| eyre!("Invalid cache key '{}': {}", key, e))?;
    self.caches.put(
      &self.generations.dynamic_name,
      &Request::get(url),
      Response::json(StatusCode::OK, value),
    );
    Ok(())
  }

  /// Connectivity restored. Returns `None` for tags this worker does not own.
  pub async fn handle_sync(&self, tag: &str) -> Option<DrainReport> {
    if tag != self.config.sync_tag {
      debug!(tag, "Ignoring unknown sync tag");
      return None;
    }
    let hooks = self.sync.as_ref()?;
    let report = hooks.queue.drain(hooks.executor.as_ref()).await;
    info!(
      processed = report.processed,
      remaining = report.remaining,
      "Background sync finished"
    );
    Some(report)
  }

  /// Refresh the read-only API resources. Returns how many were refreshed.
  pub async fn handle_periodic_sync(&self, tag: &str) -> usize {
    if tag != self.config.periodic_tag {
      debug!(tag, "Ignoring unknown periodic sync tag");
      return 0;
    }

    let requests: Vec<Request> = self
      .config
      .periodic_urls
      .iter()
      .filter_map(|path| match self.origin.join(path) {
        Ok(url) => Some(Request::get(url)),
        Err(e) => {
          warn!(path = %path, error = %e, "Skipping invalid periodic sync URL");
          None
        }
      })
      .collect();

    let responses = join_all(requests.iter().map(|r| self.network.fetch(r))).await;
    let mut refreshed = 0;
    for (request, response) in requests.iter().zip(responses) {
      match response {
        Ok(response) if response.is_success() => {
          self
            .caches
            .put(&self.generations.dynamic_name, request, response);
          refreshed += 1;
        }
        Ok(response) => {
          warn!(url = %request.url, status = %response.status, "Periodic refresh rejected");
        }
        Err(e) => warn!(url = %request.url, error = %e, "Periodic refresh failed"),
      }
    }
    refreshed
  }

  pub async fn handle_push(&self, payload: Option<&[u8]>) -> Option<Notification> {
    let hooks = self.push.as_ref()?;
    Some(
      hooks
        .handler
        .handle_push(hooks.notifier.as_ref(), payload)
        .await,
    )
  }

  pub async fn handle_notification_click(&self, action: Option<&str>) -> ClickOutcome {
    match &self.push {
      Some(hooks) => {
        hooks
          .handler
          .handle_click(hooks.notifier.as_ref(), action)
          .await
      }
      None => ClickOutcome::Dismissed,
    }
  }
}

async fn passthrough(network: &dyn Network, request: &Request) -> Response {
  match network.fetch(request).await {
    Ok(response) => response,
    Err(e) => {
      debug!(url = %request.url, error = %e, "Passthrough fetch failed");
      Response::network_error()
    }
  }
}

#[derive(Default)]
struct Slots {
  active: Option<Arc<ServiceWorker>>,
  waiting: Option<Arc<ServiceWorker>>,
}

/// Hosts the versions of the proxy for one origin.
pub struct Registration {
  network: Arc<dyn Network>,
  caches: PlatformCaches,
  clients: Clients,
  slots: Mutex<Slots>,
}

impl Registration {
  pub fn new(network: Arc<dyn Network>) -> Self {
    Self {
      network,
      caches: PlatformCaches::new(),
      clients: Clients::new(),
      slots: Mutex::new(Slots::default()),
    }
  }

  /// A worker sharing this registration's network and caches.
  pub fn worker(&self, config: &WorkerConfig, origin: Url) -> Result<ServiceWorker> {
    ServiceWorker::new(config, origin, self.network.clone(), self.caches.clone())
  }

  pub fn caches(&self) -> &PlatformCaches {
    &self.caches
  }

  pub fn clients(&self) -> &Clients {
    &self.clients
  }

  fn slots(&self) -> MutexGuard<'_, Slots> {
    self
      .slots
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn active(&self) -> Option<Arc<ServiceWorker>> {
    self.slots().active.clone()
  }

  pub fn waiting(&self) -> Option<Arc<ServiceWorker>> {
    self.slots().waiting.clone()
  }

  /// Install `worker`. It activates right away when nothing is active or its
  /// config asks to skip waiting; otherwise it waits for `SKIP_WAITING`.
  pub async fn install(&self, worker: ServiceWorker) -> Result<Arc<ServiceWorker>> {
    let worker = Arc::new(worker);
    worker.install().await?;

    let activate_now = {
      let mut slots = self.slots();
      if let Some(previous) = slots.waiting.replace(worker.clone()) {
        previous.supersede();
      }
      worker.config.skip_waiting || slots.active.is_none()
    };

    if activate_now {
      self.skip_waiting()?;
    }
    Ok(worker)
  }

  /// Promote the waiting worker. Returns false when nothing was waiting.
  pub fn skip_waiting(&self) -> Result<bool> {
    let mut slots = self.slots();
    let Some(next) = slots.waiting.take() else {
      return Ok(false);
    };

    if let Err(e) = next.activate(&self.clients) {
      slots.waiting = Some(next);
      return Err(e);
    }
    if let Some(previous) = slots.active.replace(next) {
      previous.supersede();
      debug!(version = previous.version(), "Worker superseded");
    }
    Ok(true)
  }

  pub async fn fetch(&self, request: &Request) -> Response {
    match self.active() {
      Some(worker) => worker.handle_fetch(request).await,
      None => passthrough(self.network.as_ref(), request).await,
    }
  }

  pub fn post_message(&self, message: ClientMessage) -> Result<()> {
    match message {
      ClientMessage::SkipWaiting => {
        if !self.skip_waiting()? {
          debug!("SKIP_WAITING with no waiting worker");
        }
        Ok(())
      }
      ClientMessage::CacheData { key, value } => self
        .active()
        .ok_or_else(|| eyre!("No active worker to cache data for {}", key))?
        .cache_data(&key, &value),
    }
  }
}
