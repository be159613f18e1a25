//! Per-request strategy selection.

use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use reqwest::Method;

use super::http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// API resources: latest data, cached copy on failure
  NetworkFirst,
  /// Static assets: cached copy, network on miss
  CacheFirst,
  /// Anything that is not a GET
  Passthrough,
}

pub struct Router {
  api_patterns: Vec<Regex>,
}

impl Router {
  pub fn new(patterns: &[String]) -> Result<Self> {
    let api_patterns = patterns
      .iter()
      .map(|p| Regex::new(p).map_err(|e| eyre!("Invalid API pattern '{}': {}", p, e)))
      .collect::<Result<Vec<_>>>()?;
    Ok(Self { api_patterns })
  }

  pub fn is_api(&self, request: &Request) -> bool {
    let path = request.url.path();
    self.api_patterns.iter().any(|re| re.is_match(path))
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    if request.method != Method::GET {
      Strategy::Passthrough
    } else if self.is_api(request) {
      Strategy::NetworkFirst
    } else {
      Strategy::CacheFirst
    }
  }
}
