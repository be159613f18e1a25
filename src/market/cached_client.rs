//! Marketplace client that wraps the origin API with transparent caching.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{CacheResult, CacheStore};
use crate::offline::{ActionExecutor, ActionQueue, PendingAction};

use super::cache::{CacheEnvironment, MarketQueryKey, PROJECTS};
use super::client::{is_offline, MarketplaceApi};
use super::types::{
  NewProject, Opportunity, OpportunityFilters, Profile, ProfileUpdate, Project, Skill,
};

/// Mutations that can be queued while offline and replayed later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum MarketAction {
  UpdateProfile {
    user_id: String,
    update: ProfileUpdate,
  },
  CreateProject(NewProject),
  UpdateProjectStatus {
    project_id: String,
    status: String,
  },
}

impl MarketAction {
  fn into_parts(self) -> Result<(String, serde_json::Value)> {
    let mut value = serde_json::to_value(self)?;
    let kind = value
      .get("kind")
      .and_then(|k| k.as_str())
      .map(String::from)
      .ok_or_else(|| eyre!("Action serialized without a kind"))?;
    let payload = value
      .get_mut("payload")
      .map(serde_json::Value::take)
      .unwrap_or_default();
    Ok((kind, payload))
  }

  fn from_pending(action: &PendingAction) -> Result<Self> {
    let value = serde_json::json!({ "kind": action.kind, "payload": action.payload });
    serde_json::from_value(value)
      .map_err(|e| eyre!("Unknown queued action {} ({}): {}", action.id, action.kind, e))
  }
}

/// Result of a write issued through the cached client.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
  /// The origin accepted the write
  Applied(T),
  /// The origin was unreachable; the write waits in the offline queue
  Queued(Uuid),
}

/// Marketplace client with transparent caching support.
///
/// This wraps a `MarketplaceApi` and provides the same reads, served through
/// the shared `CacheStore`; writes invalidate only the entries they affect.
pub struct CachedMarketplaceClient<A: MarketplaceApi> {
  inner: Arc<A>,
  cache: CacheStore,
  env: CacheEnvironment,
  queue: Option<ActionQueue>,
}

impl<A: MarketplaceApi> Clone for CachedMarketplaceClient<A> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      cache: self.cache.clone(),
      env: self.env.clone(),
      queue: self.queue.clone(),
    }
  }
}

impl<A: MarketplaceApi + 'static> CachedMarketplaceClient<A> {
  pub fn new(inner: A, cache: CacheStore, env: CacheEnvironment) -> Self {
    Self {
      inner: Arc::new(inner),
      cache,
      env,
      queue: None,
    }
  }

  /// Queue writes that fail for lack of connectivity instead of failing them.
  pub fn with_offline_queue(mut self, queue: ActionQueue) -> Self {
    self.queue = Some(queue);
    self
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  async fn read<T, F, Fut>(&self, query: MarketQueryKey, fetch: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce(Arc<A>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
  {
    let key = query.cache_key(&self.env);
    debug!(query = %query.description(), "Reading through cache");
    let inner = Arc::clone(&self.inner);
    self
      .cache
      .preload_data(query.namespace(), &key, || fetch(inner))
      .await
  }

  pub async fn list_opportunities(
    &self,
    filters: &OpportunityFilters,
  ) -> Result<CacheResult<Vec<Opportunity>>> {
    // The key and the origin request must describe the same query
    let filters = filters.normalized();
    let query = MarketQueryKey::Opportunities {
      filters: filters.clone(),
    };
    self
      .read(query, |inner| async move {
        inner.list_opportunities(&filters).await
      })
      .await
  }

  pub async fn get_opportunity(&self, id: &str) -> Result<CacheResult<Opportunity>> {
    let query = MarketQueryKey::Opportunity { id: id.to_string() };
    let id = id.to_string();
    self
      .read(query, |inner| async move { inner.get_opportunity(&id).await })
      .await
  }

  pub async fn list_skills(&self) -> Result<CacheResult<Vec<Skill>>> {
    self
      .read(MarketQueryKey::Skills, |inner| async move {
        inner.list_skills().await
      })
      .await
  }

  pub async fn get_profile(&self, user_id: &str) -> Result<CacheResult<Profile>> {
    let query = MarketQueryKey::Profile {
      user_id: user_id.to_string(),
    };
    let user_id = user_id.to_string();
    self
      .read(query, |inner| async move { inner.get_profile(&user_id).await })
      .await
  }

  pub async fn list_projects(
    &self,
    owner_id: &str,
    status: Option<&str>,
  ) -> Result<CacheResult<Vec<Project>>> {
    let query = MarketQueryKey::Projects {
      owner_id: owner_id.to_string(),
      status: status.map(String::from),
    };
    let owner_id = owner_id.to_string();
    let status = status.map(String::from);
    self
      .read(query, |inner| async move {
        inner.list_projects(&owner_id, status.as_deref()).await
      })
      .await
  }

  /// Update a profile; only that profile's entry is invalidated.
  pub async fn update_profile(
    &self,
    user_id: &str,
    update: &ProfileUpdate,
  ) -> Result<MutationOutcome<Profile>> {
    let action = MarketAction::UpdateProfile {
      user_id: user_id.to_string(),
      update: update.clone(),
    };
    match self.inner.update_profile(user_id, update).await {
      Ok(profile) => {
        self.invalidate_profile(user_id)?;
        Ok(MutationOutcome::Applied(profile))
      }
      Err(e) => self.queue_or_fail(action, e),
    }
  }

  /// Create a project; the projects namespace is cleared.
  pub async fn create_project(&self, project: &NewProject) -> Result<MutationOutcome<Project>> {
    match self.inner.create_project(project).await {
      Ok(created) => {
        self.cache.clear(PROJECTS)?;
        Ok(MutationOutcome::Applied(created))
      }
      Err(e) => self.queue_or_fail(MarketAction::CreateProject(project.clone()), e),
    }
  }

  pub async fn update_project_status(
    &self,
    project_id: &str,
    status: &str,
  ) -> Result<MutationOutcome<Project>> {
    let action = MarketAction::UpdateProjectStatus {
      project_id: project_id.to_string(),
      status: status.to_string(),
    };
    match self.inner.update_project_status(project_id, status).await {
      Ok(updated) => {
        self.cache.clear(PROJECTS)?;
        Ok(MutationOutcome::Applied(updated))
      }
      Err(e) => self.queue_or_fail(action, e),
    }
  }

  fn invalidate_profile(&self, user_id: &str) -> Result<()> {
    let query = MarketQueryKey::Profile {
      user_id: user_id.to_string(),
    };
    self
      .cache
      .delete(query.namespace(), &query.cache_key(&self.env))?;
    Ok(())
  }

  fn queue_or_fail<T>(
    &self,
    action: MarketAction,
    error: color_eyre::Report,
  ) -> Result<MutationOutcome<T>> {
    match &self.queue {
      Some(queue) if is_offline(&error) => {
        let (kind, payload) = action.into_parts()?;
        let pending = queue.enqueue(kind, payload);
        info!(id = %pending.id, kind = %pending.kind, "Origin unreachable, queued write for later");
        Ok(MutationOutcome::Queued(pending.id))
      }
      _ => Err(error),
    }
  }

  /// Refresh the read-only catalogues (default opportunity listing and skills)
  /// straight from the origin, regardless of freshness.
  pub async fn refresh_read_only(&self) -> Result<usize> {
    let filters = OpportunityFilters::default();
    let opportunities = self.inner.list_opportunities(&filters).await?;
    let query = MarketQueryKey::Opportunities { filters };
    self
      .cache
      .set(query.namespace(), &query.cache_key(&self.env), &opportunities)?;

    let skills = self.inner.list_skills().await?;
    let query = MarketQueryKey::Skills;
    self
      .cache
      .set(query.namespace(), &query.cache_key(&self.env), &skills)?;

    Ok(opportunities.len() + skills.len())
  }
}

#[async_trait]
impl<A: MarketplaceApi + 'static> ActionExecutor for CachedMarketplaceClient<A> {
  async fn replay(&self, action: &PendingAction) -> Result<()> {
    match MarketAction::from_pending(action)? {
      MarketAction::UpdateProfile { user_id, update } => {
        self.inner.update_profile(&user_id, &update).await?;
        self.invalidate_profile(&user_id)?;
      }
      MarketAction::CreateProject(project) => {
        self.inner.create_project(&project).await?;
        self.cache.clear(PROJECTS)?;
      }
      MarketAction::UpdateProjectStatus { project_id, status } => {
        self.inner.update_project_status(&project_id, &status).await?;
        self.cache.clear(PROJECTS)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::clock::ManualClock;
  use crate::config::{default_namespaces, RetryPolicy};
  use crate::market::cache::{OPPORTUNITIES, PROFILES, SKILLS};
  use crate::market::client::OriginError;
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
  use std::sync::Mutex;

  /// In-memory origin with call counters and an offline switch.
  #[derive(Default)]
  struct FakeApi {
    offline: AtomicBool,
    opportunity_calls: AtomicU32,
    profile_calls: AtomicU32,
    searches: Mutex<Vec<Option<String>>>,
  }

  impl FakeApi {
    fn check(&self) -> Result<()> {
      if self.offline.load(Ordering::SeqCst) {
        return Err(OriginError::Offline("no route".to_string()).into());
      }
      Ok(())
    }
  }

  fn opportunity(id: &str, skill: &str) -> Opportunity {
    Opportunity {
      id: id.to_string(),
      title: format!("{} gig", skill),
      description: None,
      status: "open".to_string(),
      budget_min: None,
      budget_max: None,
      skills: vec![skill.to_string()],
      client_id: "c1".to_string(),
      created_at: "2026-01-01".to_string(),
    }
  }

  fn profile(user_id: &str, bio: &str) -> Profile {
    Profile {
      user_id: user_id.to_string(),
      display_name: "Ada".to_string(),
      headline: None,
      bio: Some(bio.to_string()),
      skills: Vec::new(),
      hourly_rate: None,
      updated_at: "2026-01-01".to_string(),
    }
  }

  fn project(id: &str, status: &str) -> Project {
    Project {
      id: id.to_string(),
      owner_id: "u1".to_string(),
      title: "Site".to_string(),
      status: status.to_string(),
      opportunity_id: None,
      created_at: "2026-01-01".to_string(),
    }
  }

  #[async_trait]
  impl MarketplaceApi for FakeApi {
    async fn list_opportunities(&self, filters: &OpportunityFilters) -> Result<Vec<Opportunity>> {
      self.check()?;
      self.opportunity_calls.fetch_add(1, Ordering::SeqCst);
      self.searches.lock().unwrap().push(filters.search.clone());
      let skill = filters.skill.clone().unwrap_or_else(|| "any".to_string());
      Ok(vec![opportunity("o1", &skill)])
    }

    async fn get_opportunity(&self, id: &str) -> Result<Opportunity> {
      self.check()?;
      Ok(opportunity(id, "any"))
    }

    async fn list_skills(&self) -> Result<Vec<Skill>> {
      self.check()?;
      Ok(vec![Skill {
        id: "s1".to_string(),
        name: "Rust".to_string(),
        category: None,
      }])
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile> {
      self.check()?;
      self.profile_calls.fetch_add(1, Ordering::SeqCst);
      Ok(profile(user_id, "from origin"))
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
      self.check()?;
      Ok(profile(user_id, update.bio.as_deref().unwrap_or("")))
    }

    async fn list_projects(&self, _owner_id: &str, status: Option<&str>) -> Result<Vec<Project>> {
      self.check()?;
      Ok(vec![project("p1", status.unwrap_or("active"))])
    }

    async fn create_project(&self, _project: &NewProject) -> Result<Project> {
      self.check()?;
      Ok(project("p2", "draft"))
    }

    async fn update_project_status(&self, project_id: &str, status: &str) -> Result<Project> {
      self.check()?;
      Ok(project(project_id, status))
    }
  }

  fn client_with_clock() -> (CachedMarketplaceClient<FakeApi>, ActionQueue, Arc<ManualClock>) {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(1_000));
    let cache = CacheStore::new(default_namespaces(), storage.clone(), clock.clone());
    let queue = ActionQueue::open(storage, clock.clone(), RetryPolicy::forever());
    let env = CacheEnvironment::new("en", "eu");
    let client = CachedMarketplaceClient::new(FakeApi::default(), cache, env)
      .with_offline_queue(queue.clone());
    (client, queue, clock)
  }

  fn client() -> (CachedMarketplaceClient<FakeApi>, ActionQueue) {
    let (client, queue, _) = client_with_clock();
    (client, queue)
  }

  #[tokio::test]
  async fn test_second_read_is_served_from_cache() {
    let (client, _) = client();
    let filters = OpportunityFilters::default();

    let first = client.list_opportunities(&filters).await.unwrap();
    let second = client.list_opportunities(&filters).await.unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(first.data, second.data);
    assert_eq!(client.inner.opportunity_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_filters_do_not_share_entries() {
    let (client, _) = client();
    let rust = OpportunityFilters {
      skill: Some("rust".to_string()),
      ..Default::default()
    };
    let design = OpportunityFilters {
      skill: Some("design".to_string()),
      ..Default::default()
    };

    client.list_opportunities(&rust).await.unwrap();
    let result = client.list_opportunities(&design).await.unwrap();

    assert_eq!(result.data[0].skills, vec!["design"]);
    assert_eq!(client.cache().size(OPPORTUNITIES).unwrap(), 2);
  }

  #[tokio::test]
  async fn test_cached_listing_matches_the_request_sent() {
    let (client, _) = client();
    let blank = OpportunityFilters {
      search: Some("   ".to_string()),
      ..Default::default()
    };
    let spaced = OpportunityFilters {
      search: Some(" web  design".to_string()),
      ..Default::default()
    };

    client.list_opportunities(&blank).await.unwrap();
    client.list_opportunities(&OpportunityFilters::default()).await.unwrap();
    client.list_opportunities(&spaced).await.unwrap();

    assert_eq!(
      *client.inner.searches.lock().unwrap(),
      vec![None, Some("web design".to_string())]
    );
    assert_eq!(client.cache().size(OPPORTUNITIES).unwrap(), 2);
  }

  #[tokio::test]
  async fn test_reads_fall_back_to_cache_when_offline() {
    let (client, _, clock) = client_with_clock();
    client.list_skills().await.unwrap();

    // Past the skills TTL, with the origin gone
    clock.advance(31 * 60 * 1000);
    client.inner.offline.store(true, Ordering::SeqCst);
    let skills = client.list_skills().await.unwrap();
    assert_eq!(skills.source, CacheSource::Offline);
    assert_eq!(skills.data[0].name, "Rust");
  }

  #[tokio::test]
  async fn test_update_profile_invalidates_only_that_profile() {
    let (client, _) = client();
    client.get_profile("u1").await.unwrap();
    client.get_profile("u2").await.unwrap();
    client.list_skills().await.unwrap();

    let update = ProfileUpdate {
      bio: Some("new".to_string()),
      ..Default::default()
    };
    let outcome = client.update_profile("u1", &update).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Applied(ref p) if p.bio.as_deref() == Some("new")));

    assert_eq!(client.cache().size(PROFILES).unwrap(), 1);
    assert_eq!(client.cache().size(SKILLS).unwrap(), 1);

    client.get_profile("u1").await.unwrap();
    client.get_profile("u2").await.unwrap();
    assert_eq!(client.inner.profile_calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_project_mutation_clears_projects_namespace() {
    let (client, _) = client();
    client.list_projects("u1", None).await.unwrap();
    client.list_projects("u1", Some("draft")).await.unwrap();
    assert_eq!(client.cache().size(PROJECTS).unwrap(), 2);

    client
      .create_project(&NewProject {
        owner_id: "u1".to_string(),
        title: "New".to_string(),
        opportunity_id: None,
      })
      .await
      .unwrap();
    assert_eq!(client.cache().size(PROJECTS).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_offline_write_is_queued_and_replayed() {
    let (client, queue) = client();
    client.inner.offline.store(true, Ordering::SeqCst);

    let outcome = client.update_project_status("p1", "completed").await.unwrap();
    let MutationOutcome::Queued(id) = outcome else {
      panic!("expected the write to be queued");
    };
    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].kind, "update_project_status");
    assert_eq!(
      pending[0].payload,
      serde_json::json!({"project_id": "p1", "status": "completed"})
    );

    // Still offline: drain halts and keeps the action
    let report = queue.drain(&client).await;
    assert_eq!(report.halted_on, Some(id));
    assert_eq!(queue.len(), 1);

    client.inner.offline.store(false, Ordering::SeqCst);
    let report = queue.drain(&client).await;
    assert_eq!(report.processed, 1);
    assert!(queue.is_empty());
  }

  #[tokio::test]
  async fn test_unknown_action_kind_fails_replay() {
    let (client, _) = client();
    let action = PendingAction {
      id: Uuid::new_v4(),
      kind: "delete_everything".to_string(),
      payload: serde_json::Value::Null,
      created_at: 0,
      attempts: 0,
    };
    assert!(client.replay(&action).await.is_err());
  }

  #[tokio::test]
  async fn test_refresh_read_only_overwrites_catalogues() {
    let (client, _) = client();
    let count = client.refresh_read_only().await.unwrap();
    assert_eq!(count, 2);

    let listing = client.list_opportunities(&OpportunityFilters::default()).await.unwrap();
    assert_eq!(listing.source, CacheSource::CacheFresh);
  }
}
