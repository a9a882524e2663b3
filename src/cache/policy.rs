//! Cache categories and their TTL / size policies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Policy bucket shared by related cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
  Instances,
  SystemStats,
  DeployStatus,
  Versions,
  Default,
}

impl Category {
  pub const ALL: [Category; 5] = [
    Category::Instances,
    Category::SystemStats,
    Category::DeployStatus,
    Category::Versions,
    Category::Default,
  ];

  /// Pick the category for a request path.
  pub fn classify(path: &str) -> Self {
    if path.contains("/instances") {
      Category::Instances
    } else if path.contains("/system") || path.contains("/metrics") {
      Category::SystemStats
    } else if path.contains("/deploy")
      || path.contains("/downloads")
      || path.contains("/install-status")
    {
      Category::DeployStatus
    } else if path.contains("/versions") {
      Category::Versions
    } else {
      Category::Default
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Category::Instances => "instances",
      Category::SystemStats => "system-stats",
      Category::DeployStatus => "deploy-status",
      Category::Versions => "versions",
      Category::Default => "default",
    }
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// TTL and capacity for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CachePolicy {
  pub ttl_ms: u64,
  /// Maximum entries in the category; `None` means unbounded
  #[serde(default)]
  pub max_size: Option<usize>,
}

impl CachePolicy {
  pub const fn new(ttl: Duration, max_size: Option<usize>) -> Self {
    Self {
      ttl_ms: ttl.as_millis() as u64,
      max_size,
    }
  }

  pub fn ttl(&self) -> Duration {
    Duration::from_millis(self.ttl_ms)
  }
}

/// Static policy table, tunable from the config file.
#[derive(Debug, Clone)]
pub struct PolicyTable {
  policies: HashMap<Category, CachePolicy>,
}

impl Default for PolicyTable {
  fn default() -> Self {
    let policies = HashMap::from([
      (
        Category::Instances,
        CachePolicy::new(Duration::from_secs(30), Some(10)),
      ),
      (
        Category::SystemStats,
        CachePolicy::new(Duration::from_secs(10), Some(5)),
      ),
      (
        Category::DeployStatus,
        CachePolicy::new(Duration::from_secs(5), Some(20)),
      ),
      (
        Category::Versions,
        CachePolicy::new(Duration::from_secs(10 * 60), Some(5)),
      ),
      (
        Category::Default,
        CachePolicy::new(Duration::from_secs(5 * 60), None),
      ),
    ]);
    Self { policies }
  }
}

impl PolicyTable {
  /// Default table with the given overrides applied on top.
  pub fn with_overrides(overrides: &HashMap<Category, CachePolicy>) -> Self {
    let mut table = Self::default();
    for (category, policy) in overrides {
      table.set(*category, *policy);
    }
    table
  }

  pub fn get(&self, category: Category) -> CachePolicy {
    self
      .policies
      .get(&category)
      .or_else(|| self.policies.get(&Category::Default))
      .copied()
      .unwrap_or(CachePolicy::new(Duration::from_secs(5 * 60), None))
  }

  pub fn set(&mut self, category: Category, policy: CachePolicy) {
    self.policies.insert(category, policy);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify_paths() {
    assert_eq!(Category::classify("/api/v1/instances"), Category::Instances);
    assert_eq!(
      Category::classify("/api/v1/instances/abc/start"),
      Category::Instances
    );
    assert_eq!(
      Category::classify("/api/v1/system/metrics"),
      Category::SystemStats
    );
    assert_eq!(
      Category::classify("/api/v1/downloads/task_1"),
      Category::DeployStatus
    );
    assert_eq!(
      Category::classify("/api/v1/deploy/install-status/x"),
      Category::DeployStatus
    );
    assert_eq!(Category::classify("/api/v1/versions"), Category::Versions);
    assert_eq!(Category::classify("/api/v1/config"), Category::Default);
  }

  #[test]
  fn test_default_table() {
    let table = PolicyTable::default();
    assert_eq!(table.get(Category::Instances).ttl(), Duration::from_secs(30));
    assert_eq!(table.get(Category::Instances).max_size, Some(10));
    assert_eq!(table.get(Category::SystemStats).max_size, Some(5));
    assert_eq!(table.get(Category::DeployStatus).ttl(), Duration::from_secs(5));
    assert_eq!(table.get(Category::Versions).ttl(), Duration::from_secs(600));
    assert_eq!(table.get(Category::Default).max_size, None);
  }

  #[test]
  fn test_overrides() {
    let overrides = HashMap::from([(
      Category::SystemStats,
      CachePolicy {
        ttl_ms: 2_000,
        max_size: Some(1),
      },
    )]);
    let table = PolicyTable::with_overrides(&overrides);
    assert_eq!(table.get(Category::SystemStats).ttl(), Duration::from_secs(2));
    assert_eq!(table.get(Category::SystemStats).max_size, Some(1));
    assert_eq!(table.get(Category::Instances).max_size, Some(10));
  }

  #[test]
  fn test_category_serde_names() {
    let category: Category = serde_yaml::from_str("system-stats").unwrap();
    assert_eq!(category, Category::SystemStats);
    assert_eq!(Category::DeployStatus.to_string(), "deploy-status");
  }
}
