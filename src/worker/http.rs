//! Request/response model seen by the interception proxy.

use reqwest::{Method, StatusCode};
use serde::Serialize;
use url::Url;

/// What kind of resource a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  /// Top-level page navigation
  pub navigate: bool,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::Other,
      navigate: false,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A page load: GET, document destination, navigate mode.
  pub fn navigation(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      navigate: true,
      ..Self::get(url)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Identity of the request in a platform cache.
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method, self.url)
  }

  pub fn is_navigation(&self) -> bool {
    self.navigate || self.destination == Destination::Document
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: StatusCode,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

/// Body of the synthesized API response when neither network nor cache can answer.
#[derive(Debug, Serialize)]
struct OfflineBody<'a> {
  error: &'a str,
}

pub const OFFLINE_API_ERROR: &str = "Offline - No cached data available";

impl Response {
  pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_ascii_lowercase(), value.to_string()));
    self
  }

  pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
    Self::new(status, value.to_string()).with_header("content-type", "application/json")
  }

  pub fn text(status: StatusCode, text: &str) -> Self {
    Self::new(status, text).with_header("content-type", "text/plain")
  }

  /// 503 with `{ "error": "Offline - No cached data available" }`.
  pub fn offline_api() -> Self {
    let body = serde_json::to_vec(&OfflineBody {
      error: OFFLINE_API_ERROR,
    })
    .unwrap_or_default();
    Self::new(StatusCode::SERVICE_UNAVAILABLE, body).with_header("content-type", "application/json")
  }

  /// Generic failure for assets that could not be fetched.
  pub fn network_error() -> Self {
    Self::text(StatusCode::REQUEST_TIMEOUT, "Network error")
  }

  pub fn is_success(&self) -> bool {
    self.status.is_success()
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_api_body() {
    let response = Response::offline_api();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, serde_json::json!({"error": "Offline - No cached data available"}));
    assert_eq!(response.header("Content-Type"), Some("application/json"));
  }

  #[test]
  fn test_cache_key_includes_method_and_url() {
    let url = Url::parse("https://app.test/api/skills?x=1").unwrap();
    assert_eq!(Request::get(url).cache_key(), "GET https://app.test/api/skills?x=1");
  }

  #[test]
  fn test_navigation_request() {
    let request = Request::navigation(Url::parse("https://app.test/jobs").unwrap());
    assert!(request.is_navigation());
    assert_eq!(request.method, Method::GET);
  }
}
