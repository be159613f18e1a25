//! Network access used by the proxy; mockable at the trait boundary.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use super::http::{Request, Response};

/// The request never produced a response.
#[derive(Debug, thiserror::Error)]
#[error("network request to {url} failed: {message}")]
pub struct NetworkError {
  pub url: String,
  pub message: String,
}

#[async_trait]
pub trait Network: Send + Sync {
  /// Resolves with any HTTP status; only transport failures are errors.
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// reqwest-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("gigsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let fail = |e: reqwest::Error| NetworkError {
      url: request.url.to_string(),
      message: e.to_string(),
    };

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(fail)?;
    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
      .collect();
    let body = response.bytes().await.map_err(fail)?.to_vec();
    debug!(url = %request.url, %status, "Network fetch completed");

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
