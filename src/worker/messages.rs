//! Commands posted to the worker by open clients.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate the waiting version now
  SkipWaiting,
  /// Store `value` as the cached JSON response for URL `key`
  CacheData { key: String, value: Value },
}

impl ClientMessage {
  pub fn parse(raw: &str) -> Result<Self> {
    serde_json::from_str(raw).map_err(|e| eyre!("Invalid client message: {}", e))
  }
}
