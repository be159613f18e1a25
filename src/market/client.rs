use crate::config::Config;
use crate::market::types::{
  NewProject, Opportunity, OpportunityFilters, Profile, ProfileUpdate, Project, Skill,
};
use async_trait::async_trait;
use color_eyre::{eyre::eyre, Report, Result};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

/// Failures talking to the backend data service.
#[derive(Debug, thiserror::Error)]
pub enum OriginError {
  /// The request never produced a response (no connectivity, DNS, timeout)
  #[error("origin unreachable: {0}")]
  Offline(String),

  #[error("origin returned {status} for {url}")]
  Status { status: StatusCode, url: String },

  #[error("failed to decode origin response from {url}: {message}")]
  Decode { url: String, message: String },
}

/// True when `error` means the origin could not be reached at all.
pub fn is_offline(error: &Report) -> bool {
  matches!(error.downcast_ref::<OriginError>(), Some(OriginError::Offline(_)))
}

/// Resource service for the marketplace backend.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
  async fn list_opportunities(&self, filters: &OpportunityFilters) -> Result<Vec<Opportunity>>;

  async fn get_opportunity(&self, id: &str) -> Result<Opportunity>;

  async fn list_skills(&self) -> Result<Vec<Skill>>;

  async fn get_profile(&self, user_id: &str) -> Result<Profile>;

  async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile>;

  async fn list_projects(&self, owner_id: &str, status: Option<&str>) -> Result<Vec<Project>>;

  async fn create_project(&self, project: &NewProject) -> Result<Project>;

  async fn update_project_status(&self, project_id: &str, status: &str) -> Result<Project>;
}

/// HTTP client for the marketplace REST API
#[derive(Clone)]
pub struct MarketplaceClient {
  http: reqwest::Client,
  base: Url,
}

impl MarketplaceClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base = Url::parse(&config.origin.url)
      .map_err(|e| eyre!("Invalid origin url {}: {}", config.origin.url, e))?;
    Self::with_base(base)
  }

  pub fn with_base(base: Url) -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("gigsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { http, base })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  async fn send<T, B>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    let mut request = self.http.request(method, url.clone());
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| OriginError::Offline(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      return Err(
        OriginError::Status {
          status,
          url: url.to_string(),
        }
        .into(),
      );
    }

    let parsed = response.json::<T>().await.map_err(|e| OriginError::Decode {
      url: url.to_string(),
      message: e.to_string(),
    })?;
    Ok(parsed)
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
    self.send::<T, ()>(Method::GET, url, None).await
  }
}

#[async_trait]
impl MarketplaceApi for MarketplaceClient {
  async fn list_opportunities(&self, filters: &OpportunityFilters) -> Result<Vec<Opportunity>> {
    let mut url = self.endpoint("/api/opportunities")?;
    let pairs = filters.query_pairs();
    if !pairs.is_empty() {
      url.query_pairs_mut().extend_pairs(pairs);
    }
    self.get_json(url).await
  }

  async fn get_opportunity(&self, id: &str) -> Result<Opportunity> {
    let url = self.endpoint(&format!("/api/opportunities/{}", id))?;
    self.get_json(url).await
  }

  async fn list_skills(&self) -> Result<Vec<Skill>> {
    let url = self.endpoint("/api/skills")?;
    self.get_json(url).await
  }

  async fn get_profile(&self, user_id: &str) -> Result<Profile> {
    let url = self.endpoint(&format!("/api/profiles/{}", user_id))?;
    self.get_json(url).await
  }

  async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
    let url = self.endpoint(&format!("/api/profiles/{}", user_id))?;
    self.send(Method::PATCH, url, Some(update)).await
  }

  async fn list_projects(&self, owner_id: &str, status: Option<&str>) -> Result<Vec<Project>> {
    let mut url = self.endpoint("/api/projects")?;
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("owner_id", owner_id);
      if let Some(status) = status {
        query.append_pair("status", status);
      }
    }
    self.get_json(url).await
  }

  async fn create_project(&self, project: &NewProject) -> Result<Project> {
    let url = self.endpoint("/api/projects")?;
    self.send(Method::POST, url, Some(project)).await
  }

  async fn update_project_status(&self, project_id: &str, status: &str) -> Result<Project> {
    let url = self.endpoint(&format!("/api/projects/{}", project_id))?;
    let body = serde_json::json!({ "status": status });
    self.send(Method::PATCH, url, Some(&body)).await
  }
}
