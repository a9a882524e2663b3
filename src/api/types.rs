//! Types returned by the bot runtime's HTTP API.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Response envelope
// ============================================================================

/// Every endpoint wraps its payload as `{success, message, data}`.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
  #[serde(default = "default_success")]
  pub success: bool,
  #[serde(default)]
  pub message: Option<String>,
  pub data: Option<T>,
}

fn default_success() -> bool {
  true
}

impl<T> ApiEnvelope<T> {
  /// Unwrap the payload, turning `success: false` into an error.
  pub fn into_data(self, what: &str) -> Result<T> {
    if !self.success {
      return Err(eyre!(
        "{} failed: {}",
        what,
        self.message.as_deref().unwrap_or("no message")
      ));
    }
    self
      .data
      .ok_or_else(|| eyre!("{} returned no data", what))
  }

  /// Check for success on endpoints that return no payload.
  pub fn into_unit(self, what: &str) -> Result<Option<String>> {
    if self.success {
      Ok(self.message)
    } else {
      Err(eyre!(
        "{} failed: {}",
        what,
        self.message.as_deref().unwrap_or("no message")
      ))
    }
  }
}

// ============================================================================
// Instances
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
  Stopped,
  Running,
  Starting,
  Stopping,
  Error,
  #[serde(other)]
  Unknown,
}

impl InstanceStatus {
  /// Whether a start/stop is currently in progress
  pub fn is_transitioning(&self) -> bool {
    matches!(self, InstanceStatus::Starting | InstanceStatus::Stopping)
  }
}

impl fmt::Display for InstanceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      InstanceStatus::Stopped => "stopped",
      InstanceStatus::Running => "running",
      InstanceStatus::Starting => "starting",
      InstanceStatus::Stopping => "stopping",
      InstanceStatus::Error => "error",
      InstanceStatus::Unknown => "unknown",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub bot_type: String,
  #[serde(default)]
  pub version: Option<String>,
  pub status: InstanceStatus,
  #[serde(default)]
  pub port: Option<u16>,
  #[serde(default)]
  pub created_at: Option<String>,
}

// ============================================================================
// System metrics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
  #[serde(default)]
  pub total_mb: f64,
  #[serde(default)]
  pub used_mb: f64,
  #[serde(default)]
  pub available_mb: f64,
  #[serde(default)]
  pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
  #[serde(default)]
  pub cpu_usage_percent: f64,
  #[serde(default)]
  pub memory_usage: MemoryUsage,
  #[serde(default)]
  pub disk_usage_percent: Option<f64>,
  #[serde(default)]
  pub uptime_seconds: Option<u64>,
}

// ============================================================================
// Downloads
// ============================================================================

/// Progress of a download / deployment job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
  pub id: String,
  pub status: String,
  #[serde(default)]
  pub progress: i64,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub current: Option<i64>,
  #[serde(default)]
  pub total: Option<i64>,
}

impl DownloadTask {
  pub fn is_finished(&self) -> bool {
    matches!(self.status.as_str(), "completed" | "complete" | "failed" | "error")
  }
}

/// Versions available for deployment, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
  #[serde(default)]
  pub versions: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_envelope_success() {
    let envelope: ApiEnvelope<Vec<Instance>> = serde_json::from_str(
      r#"{"success":true,"data":[{"id":"1","name":"bot","bot_type":"maibot","status":"running"}]}"#,
    )
    .unwrap();
    let instances = envelope.into_data("list instances").unwrap();
    assert_eq!(instances[0].status, InstanceStatus::Running);
    assert_eq!(instances[0].version, None);
  }

  #[test]
  fn test_envelope_failure_carries_message() {
    let envelope: ApiEnvelope<Vec<Instance>> =
      serde_json::from_str(r#"{"success":false,"message":"backend offline"}"#).unwrap();
    let err = envelope.into_data("list instances").unwrap_err();
    assert!(err.to_string().contains("backend offline"));

    let envelope: ApiEnvelope<serde_json::Value> =
      serde_json::from_str(r#"{"success":true,"message":"started"}"#).unwrap();
    assert_eq!(
      envelope.into_unit("start").unwrap().as_deref(),
      Some("started")
    );
  }

  #[test]
  fn test_unknown_instance_status() {
    let instance: Instance =
      serde_json::from_str(r#"{"id":"1","name":"bot","status":"paused"}"#).unwrap();
    assert_eq!(instance.status, InstanceStatus::Unknown);
    assert_eq!(instance.bot_type, "");
  }

  #[test]
  fn test_system_stats_partial() {
    let stats: SystemStats =
      serde_json::from_str(r#"{"cpu_usage_percent":12.5,"memory_usage":{"percent":40.0}}"#)
        .unwrap();
    assert_eq!(stats.cpu_usage_percent, 12.5);
    assert_eq!(stats.memory_usage.percent, 40.0);
    assert_eq!(stats.uptime_seconds, None);
  }
}
