use serde::{Deserialize, Serialize};

/// Posted job a freelancer can apply to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  pub status: String,
  #[serde(default)]
  pub budget_min: Option<u64>,
  #[serde(default)]
  pub budget_max: Option<u64>,
  #[serde(default)]
  pub skills: Vec<String>,
  pub client_id: String,
  pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub category: Option<String>,
}

/// Public profile of a marketplace user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  pub user_id: String,
  pub display_name: String,
  #[serde(default)]
  pub headline: Option<String>,
  #[serde(default)]
  pub bio: Option<String>,
  #[serde(default)]
  pub skills: Vec<String>,
  #[serde(default)]
  pub hourly_rate: Option<u64>,
  pub updated_at: String,
}

/// Partial profile edit; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub headline: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bio: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub skills: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hourly_rate: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
  pub id: String,
  pub owner_id: String,
  pub title: String,
  pub status: String, // "draft", "active", "completed", ...
  #[serde(default)]
  pub opportunity_id: Option<String>,
  pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
  pub owner_id: String,
  pub title: String,
  #[serde(default)]
  pub opportunity_id: Option<String>,
}

/// Filters for the opportunity listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityFilters {
  pub status: Option<String>,
  pub skill: Option<String>,
  pub search: Option<String>,
  pub budget_min: Option<u64>,
  pub budget_max: Option<u64>,
  #[serde(default)]
  pub page: u32,
}

impl OpportunityFilters {
  /// Trim and collapse whitespace in `search`; a blank search is dropped.
  pub fn normalized(&self) -> Self {
    Self {
      search: self
        .search
        .as_deref()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty()),
      ..self.clone()
    }
  }

  /// Query string pairs for the origin request, skipping unset filters.
  pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(status) = &self.status {
      pairs.push(("status", status.clone()));
    }
    if let Some(skill) = &self.skill {
      pairs.push(("skill", skill.clone()));
    }
    if let Some(search) = &self.search {
      pairs.push(("search", search.clone()));
    }
    if let Some(min) = self.budget_min {
      pairs.push(("budget_min", min.to_string()));
    }
    if let Some(max) = self.budget_max {
      pairs.push(("budget_max", max.to_string()));
    }
    if self.page > 0 {
      pairs.push(("page", self.page.to_string()));
    }
    pairs
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normalized_search() {
    let blank = OpportunityFilters {
      search: Some("   ".to_string()),
      ..Default::default()
    };
    assert_eq!(blank.normalized(), OpportunityFilters::default());
    assert!(blank.normalized().query_pairs().is_empty());

    let spaced = OpportunityFilters {
      search: Some(" web   design ".to_string()),
      page: 2,
      ..Default::default()
    };
    assert_eq!(spaced.normalized().search.as_deref(), Some("web design"));
    assert_eq!(spaced.normalized().page, 2);
  }

  #[test]
  fn test_query_pairs_skip_unset() {
    let filters = OpportunityFilters {
      skill: Some("rust".to_string()),
      budget_min: Some(500),
      ..Default::default()
    };
    assert_eq!(
      filters.query_pairs(),
      vec![("skill", "rust".to_string()), ("budget_min", "500".to_string())]
    );
  }

  #[test]
  fn test_profile_update_serializes_only_set_fields() {
    let update = ProfileUpdate {
      bio: Some("Rustacean".to_string()),
      ..Default::default()
    };
    assert_eq!(
      serde_json::to_value(&update).unwrap(),
      serde_json::json!({"bio": "Rustacean"})
    );
  }
}
