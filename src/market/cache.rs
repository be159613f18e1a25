//! Cache keys for marketplace resources.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::types::OpportunityFilters;

pub const OPPORTUNITIES: &str = "opportunities";
pub const SKILLS: &str = "skills";
pub const PROFILES: &str = "profiles";
pub const PROJECTS: &str = "projects";

/// Inputs that change what the origin returns without being part of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEnvironment {
  pub locale: String,
  pub region: String,
}

impl CacheEnvironment {
  pub fn new(locale: impl Into<String>, region: impl Into<String>) -> Self {
    Self {
      locale: locale.into(),
      region: region.into(),
    }
  }
}

/// Every cached marketplace read.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketQueryKey {
  /// Filtered opportunity listing
  Opportunities { filters: OpportunityFilters },
  /// Single opportunity
  Opportunity { id: String },
  /// Full skill catalogue
  Skills,
  /// Profile of one user
  Profile { user_id: String },
  /// Projects owned by a user, optionally by status
  Projects {
    owner_id: String,
    status: Option<String>,
  },
}

impl MarketQueryKey {
  /// Namespace the entry lives in.
  pub fn namespace(&self) -> &'static str {
    match self {
      Self::Opportunities { .. } | Self::Opportunity { .. } => OPPORTUNITIES,
      Self::Skills => SKILLS,
      Self::Profile { .. } => PROFILES,
      Self::Projects { .. } => PROJECTS,
    }
  }

  /// Stable, fixed-length key covering every filter and the environment.
  ///
  /// The canonical form is JSON, so a filter value containing a separator
  /// cannot make two different queries produce the same input.
  pub fn cache_key(&self, env: &CacheEnvironment) -> String {
    let input = serde_json::json!({ "query": self, "env": env }).to_string();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    match self {
      Self::Opportunities { filters } => {
        if let Some(search) = &filters.search {
          format!("opportunities matching '{}' (page {})", search, filters.page)
        } else {
          format!("opportunities (page {})", filters.page)
        }
      }
      Self::Opportunity { id } => format!("opportunity {}", id),
      Self::Skills => "all skills".to_string(),
      Self::Profile { user_id } => format!("profile {}", user_id),
      Self::Projects { owner_id, status } => match status {
        Some(s) => format!("{} projects of {}", s, owner_id),
        None => format!("projects of {}", owner_id),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn env() -> CacheEnvironment {
    CacheEnvironment::new("en", "eu")
  }

  fn listing(filters: OpportunityFilters) -> MarketQueryKey {
    MarketQueryKey::Opportunities { filters }
  }

  #[test]
  fn test_key_is_hex_sha256() {
    let key = MarketQueryKey::Skills.cache_key(&env());
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_different_filters_never_collide() {
    let a = listing(OpportunityFilters {
      skill: Some("rust".to_string()),
      ..Default::default()
    });
    let b = listing(OpportunityFilters {
      search: Some("rust".to_string()),
      ..Default::default()
    });
    let c = listing(OpportunityFilters {
      skill: Some("rust".to_string()),
      page: 1,
      ..Default::default()
    });
    let keys = [a.cache_key(&env()), b.cache_key(&env()), c.cache_key(&env())];
    assert_ne!(keys[0], keys[1]);
    assert_ne!(keys[0], keys[2]);
    assert_ne!(keys[1], keys[2]);
  }

  #[test]
  fn test_separator_in_value_does_not_collide() {
    let a = MarketQueryKey::Projects {
      owner_id: "u1".to_string(),
      status: Some("a:b".to_string()),
    };
    let b = MarketQueryKey::Projects {
      owner_id: "u1:a".to_string(),
      status: Some("b".to_string()),
    };
    assert_ne!(a.cache_key(&env()), b.cache_key(&env()));
  }

  #[test]
  fn test_environment_changes_key() {
    let query = MarketQueryKey::Profile {
      user_id: "u1".to_string(),
    };
    assert_ne!(
      query.cache_key(&CacheEnvironment::new("en", "eu")),
      query.cache_key(&CacheEnvironment::new("fr", "eu"))
    );
    assert_ne!(
      query.cache_key(&CacheEnvironment::new("en", "eu")),
      query.cache_key(&CacheEnvironment::new("en", "us"))
    );
  }

  #[test]
  fn test_search_whitespace_is_part_of_key() {
    let blank = listing(OpportunityFilters {
      search: Some("   ".to_string()),
      ..Default::default()
    });
    let none = listing(OpportunityFilters::default());
    assert_ne!(blank.cache_key(&env()), none.cache_key(&env()));
  }

  #[test]
  fn test_normalized_filters_share_a_key() {
    let a = listing(
      OpportunityFilters {
        search: Some("  web   design ".to_string()),
        ..Default::default()
      }
      .normalized(),
    );
    let b = listing(OpportunityFilters {
      search: Some("web design".to_string()),
      ..Default::default()
    });
    assert_eq!(a.cache_key(&env()), b.cache_key(&env()));
  }

  #[test]
  fn test_namespaces() {
    assert_eq!(MarketQueryKey::Skills.namespace(), SKILLS);
    assert_eq!(
      MarketQueryKey::Opportunity { id: "1".into() }.namespace(),
      OPPORTUNITIES
    );
  }
}
