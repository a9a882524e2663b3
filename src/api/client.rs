use crate::api::types::{ApiEnvelope, DownloadTask, Instance, SystemStats, Versions};
use crate::config::ApiConfig;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Plain HTTP client for the bot runtime API
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base_url =
      Url::parse(&config.url).map_err(|e| eyre!("Invalid API URL {}: {}", config.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!("botdeck/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Absolute URL for an API path such as `/api/v1/instances`
  pub fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiEnvelope<T>> {
    let url = self.endpoint(path)?;
    debug!(%url, "GET");

    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?
      .error_for_status()
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", path, e))
  }

  async fn post(&self, path: &str) -> Result<ApiEnvelope<serde_json::Value>> {
    let url = self.endpoint(path)?;
    debug!(%url, "POST");

    let response = self
      .http
      .post(url)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?
      .error_for_status()
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", path, e))
  }

  /// List all bot instances
  pub async fn list_instances(&self) -> Result<Vec<Instance>> {
    self
      .get(paths::INSTANCES)
      .await?
      .into_data("List instances")
  }

  /// Get host CPU / memory metrics
  pub async fn system_stats(&self) -> Result<SystemStats> {
    self
      .get(paths::SYSTEM_METRICS)
      .await?
      .into_data("Get system metrics")
  }

  /// Get progress of a download job
  pub async fn download_task(&self, task_id: &str) -> Result<DownloadTask> {
    self
      .get(&paths::download(task_id))
      .await?
      .into_data("Get download status")
  }

  pub async fn versions(&self) -> Result<Versions> {
    let versions: Vec<String> = self
      .get(paths::VERSIONS)
      .await?
      .into_data("List versions")?;
    Ok(Versions { versions })
  }

  pub async fn start_instance(&self, id: &str) -> Result<Option<String>> {
    self
      .post(&paths::instance_action(id, "start"))
      .await?
      .into_unit("Start instance")
  }

  pub async fn stop_instance(&self, id: &str) -> Result<Option<String>> {
    self
      .post(&paths::instance_action(id, "stop"))
      .await?
      .into_unit("Stop instance")
  }
}

/// API paths. Cache keys are derived from these, so invalidation patterns
/// match against them.
pub mod paths {
  pub const INSTANCES: &str = "/api/v1/instances";
  pub const SYSTEM_METRICS: &str = "/api/v1/system/metrics";
  pub const VERSIONS: &str = "/api/v1/versions/maibot";

  pub fn download(task_id: &str) -> String {
    format!("/api/v1/downloads/{}", task_id)
  }

  pub fn instance_action(id: &str, action: &str) -> String {
    format!("/api/v1/instances/{}/{}", id, action)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoint_join() {
    let client = ApiClient::new(&ApiConfig {
      url: "http://localhost:8095/".to_string(),
      timeout_secs: 5,
    })
    .unwrap();
    assert_eq!(
      client.endpoint(paths::INSTANCES).unwrap().as_str(),
      "http://localhost:8095/api/v1/instances"
    );
    assert_eq!(
      client
        .endpoint(&paths::instance_action("7", "stop"))
        .unwrap()
        .as_str(),
      "http://localhost:8095/api/v1/instances/7/stop"
    );
  }

  #[test]
  fn test_invalid_url() {
    let result = ApiClient::new(&ApiConfig {
      url: "not a url".to_string(),
      timeout_secs: 5,
    });
    assert!(result.is_err());
  }
}
