//! Named bundles of per-task settings applied on view transitions.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Setting for one task within a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileEntry {
  /// New interval; `None` keeps the current one
  #[serde(default)]
  pub interval_ms: Option<u64>,
  /// `Some(true)` starts, `Some(false)` stops, `None` only retunes
  #[serde(default)]
  pub enabled: Option<bool>,
}

impl ProfileEntry {
  pub fn on(interval: Duration) -> Self {
    Self {
      interval_ms: Some(interval.as_millis() as u64),
      enabled: Some(true),
    }
  }

  pub fn off() -> Self {
    Self {
      interval_ms: None,
      enabled: Some(false),
    }
  }

  pub fn retune(interval: Duration) -> Self {
    Self {
      interval_ms: Some(interval.as_millis() as u64),
      enabled: None,
    }
  }

  pub fn interval(&self) -> Option<Duration> {
    self.interval_ms.map(Duration::from_millis)
  }
}

/// Tasks not listed in a profile are stopped when it is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Profile {
  pub tasks: BTreeMap<String, ProfileEntry>,
}

impl Profile {
  pub fn with(mut self, task: &str, entry: ProfileEntry) -> Self {
    self.tasks.insert(task.to_string(), entry);
    self
  }
}

pub const HOME: &str = "home";
pub const INSTANCES: &str = "instances";
pub const DOWNLOADS: &str = "downloads";
pub const BACKGROUND: &str = "background";

/// Profiles every console knows about.
pub fn builtin_profiles(
  instances_task: &str,
  system_stats_task: &str,
) -> HashMap<String, Profile> {
  HashMap::from([
    (
      HOME.to_string(),
      Profile::default()
        .with(instances_task, ProfileEntry::on(Duration::from_secs(30)))
        .with(system_stats_task, ProfileEntry::on(Duration::from_secs(10))),
    ),
    (
      INSTANCES.to_string(),
      Profile::default()
        .with(instances_task, ProfileEntry::on(Duration::from_secs(15)))
        .with(system_stats_task, ProfileEntry::off()),
    ),
    (
      DOWNLOADS.to_string(),
      Profile::default()
        .with(instances_task, ProfileEntry::off())
        .with(system_stats_task, ProfileEntry::off()),
    ),
    (
      BACKGROUND.to_string(),
      Profile::default()
        .with(instances_task, ProfileEntry::retune(Duration::from_secs(60)))
        .with(system_stats_task, ProfileEntry::retune(Duration::from_secs(30))),
    ),
  ])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builtin_profiles() {
    let profiles = builtin_profiles("instances", "systemStats");
    let home = &profiles[HOME];
    assert_eq!(
      home.tasks["instances"].interval(),
      Some(Duration::from_secs(30))
    );
    assert_eq!(home.tasks["systemStats"].enabled, Some(true));
    assert_eq!(profiles[DOWNLOADS].tasks["instances"].enabled, Some(false));
    assert_eq!(profiles[BACKGROUND].tasks["instances"].enabled, None);
  }

  #[test]
  fn test_profile_from_yaml() {
    let profile: Profile = serde_yaml::from_str(
      r#"
instances: { interval_ms: 5000, enabled: true }
systemStats: { enabled: false }
"#,
    )
    .unwrap();
    assert_eq!(profile.tasks["instances"], ProfileEntry::on(Duration::from_secs(5)));
    assert_eq!(profile.tasks["systemStats"], ProfileEntry::off());
  }
}
