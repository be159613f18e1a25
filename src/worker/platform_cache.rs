//! Raw response caches grouped into named, versioned generations.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;

use super::http::{Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheRole {
  Static,
  Dynamic,
}

impl CacheRole {
  fn as_str(&self) -> &'static str {
    match self {
      CacheRole::Static => "static",
      CacheRole::Dynamic => "dynamic",
    }
  }
}

/// `{role}-v{version}`
pub fn generation_name(role: CacheRole, version: u32) -> String {
  format!("{}-v{}", role.as_str(), version)
}

/// The two generation names owned by one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations {
  pub version: u32,
  pub static_name: String,
  pub dynamic_name: String,
}

impl Generations {
  pub fn for_version(version: u32) -> Self {
    Self {
      version,
      static_name: generation_name(CacheRole::Static, version),
      dynamic_name: generation_name(CacheRole::Dynamic, version),
    }
  }

  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }
}

impl fmt::Display for Generations {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}, {}", self.static_name, self.dynamic_name)
  }
}

type Generation = IndexMap<String, Response>;

/// Shared by every worker version; generations outlive the worker that made them
/// until a later activation collects them.
#[derive(Clone, Default)]
pub struct PlatformCaches {
  generations: Arc<Mutex<IndexMap<String, Generation>>>,
}

impl PlatformCaches {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, IndexMap<String, Generation>> {
    self
      .generations
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Create the generation if it does not exist yet.
  pub fn open(&self, name: &str) {
    self.lock().entry(name.to_string()).or_default();
  }

  pub fn put(&self, name: &str, request: &Request, response: Response) {
    self
      .lock()
      .entry(name.to_string())
      .or_default()
      .insert(request.cache_key(), response);
  }

  /// Insert a batch under one lock acquisition.
  pub fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) {
    let mut generations = self.lock();
    let generation = generations.entry(name.to_string()).or_default();
    for (request, response) in entries {
      generation.insert(request.cache_key(), response);
    }
  }

  /// Look a request up in one generation.
  pub fn match_in(&self, name: &str, request: &Request) -> Option<Response> {
    self
      .lock()
      .get(name)
      .and_then(|generation| generation.get(&request.cache_key()))
      .cloned()
  }

  /// Look a request up across all generations, oldest first.
  pub fn match_any(&self, request: &Request) -> Option<Response> {
    let key = request.cache_key();
    self
      .lock()
      .values()
      .find_map(|generation| generation.get(&key))
      .cloned()
  }

  pub fn delete(&self, name: &str) -> bool {
    self.lock().shift_remove(name).is_some()
  }

  pub fn names(&self) -> Vec<String> {
    self.lock().keys().cloned().collect()
  }

  pub fn len(&self, name: &str) -> usize {
    self.lock().get(name).map(|g| g.len()).unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::StatusCode;
  use url::Url;

  fn get(path: &str) -> Request {
    Request::get(Url::parse("https://app.test").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_generation_names() {
    let generations = Generations::for_version(3);
    assert_eq!(generations.static_name, "static-v3");
    assert_eq!(generations.dynamic_name, "dynamic-v3");
    assert!(generations.is_current("dynamic-v3"));
    assert!(!generations.is_current("dynamic-v2"));
  }

  #[test]
  fn test_match_is_keyed_by_method_and_url() {
    let caches = PlatformCaches::new();
    caches.put("static-v1", &get("/app.js"), Response::new(StatusCode::OK, "js"));

    assert!(caches.match_any(&get("/app.js")).is_some());
    assert!(caches.match_any(&get("/app.js?v=2")).is_none());
    let post = Request::new(reqwest::Method::POST, get("/app.js").url);
    assert!(caches.match_any(&post).is_none());
  }

  #[test]
  fn test_delete_generation() {
    let caches = PlatformCaches::new();
    caches.open("static-v1");
    caches.put("dynamic-v1", &get("/api/skills"), Response::new(StatusCode::OK, "[]"));

    assert!(caches.delete("static-v1"));
    assert!(!caches.delete("static-v1"));
    assert_eq!(caches.names(), vec!["dynamic-v1"]);
    assert_eq!(caches.len("dynamic-v1"), 1);
  }
}
