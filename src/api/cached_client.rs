//! API client that routes reads through the shared response cache.

use color_eyre::Result;
use futures::future::FutureExt;
use tracing::info;

use crate::cache::{CacheStore, RequestKey};

use super::client::{paths, ApiClient};
use super::types::{DownloadTask, Instance, SystemStats, Versions};

/// API client with transparent caching.
///
/// Reads are de-duplicated and cached per request key; `force_refresh`
/// bypasses a fresh entry but still joins a request that is already in
/// flight. Start and stop invalidate every cached instance listing.
#[derive(Clone)]
pub struct CachedApiClient {
  inner: ApiClient,
  cache: CacheStore,
}

impl CachedApiClient {
  pub fn new(inner: ApiClient, cache: CacheStore) -> Self {
    Self { inner, cache }
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  pub fn inner(&self) -> &ApiClient {
    &self.inner
  }

  pub async fn list_instances(&self, force_refresh: bool) -> Result<Vec<Instance>> {
    let key = RequestKey::get(paths::INSTANCES);
    let inner = self.inner.clone();
    self
      .cache
      .cached_request(
        &key.cache_key(),
        key.category(),
        move || async move { inner.list_instances().await },
        force_refresh,
      )
      .await
  }

  pub async fn system_stats(&self, force_refresh: bool) -> Result<SystemStats> {
    let key = RequestKey::get(paths::SYSTEM_METRICS);
    let inner = self.inner.clone();
    self
      .cache
      .cached_request(
        &key.cache_key(),
        key.category(),
        move || async move { inner.system_stats().await },
        force_refresh,
      )
      .await
  }

  pub async fn download_task(&self, task_id: &str, force_refresh: bool) -> Result<DownloadTask> {
    let key = RequestKey::get(paths::download(task_id));
    let inner = self.inner.clone();
    let task_id = task_id.to_string();
    self
      .cache
      .cached_request(
        &key.cache_key(),
        key.category(),
        move || async move { inner.download_task(&task_id).await },
        force_refresh,
      )
      .await
  }

  pub async fn versions(&self, force_refresh: bool) -> Result<Versions> {
    let key = RequestKey::get(paths::VERSIONS);
    let inner = self.inner.clone();
    self
      .cache
      .cached_request(
        &key.cache_key(),
        key.category(),
        move || async move { inner.versions().await },
        force_refresh,
      )
      .await
  }

  pub async fn start_instance(&self, id: &str) -> Result<Option<String>> {
    let result = self.inner.start_instance(id).await;
    self.invalidate_instances();
    result
  }

  pub async fn stop_instance(&self, id: &str) -> Result<Option<String>> {
    let result = self.inner.stop_instance(id).await;
    self.invalidate_instances();
    result
  }

  /// Drop every cached instance listing, including in-flight ones.
  pub fn invalidate_instances(&self) -> usize {
    let removed = self.cache.invalidate_by_pattern("/instances");
    info!(removed, "invalidated cached instance data");
    removed
  }

  /// Prefetch the data the home view shows first.
  pub async fn warmup(&self) {
    let this = self.clone();
    let instances = async move { this.list_instances(false).await.map(|_| ()) }.boxed();
    let this = self.clone();
    let stats = async move { this.system_stats(false).await.map(|_| ()) }.boxed();
    let this = self.clone();
    let versions = async move { this.versions(false).await.map(|_| ()) }.boxed();

    self
      .cache
      .warmup([
        ("instances".to_string(), instances),
        ("system metrics".to_string(), stats),
        ("versions".to_string(), versions),
      ])
      .await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::InstanceStatus;
  use crate::cache::{Category, PolicyTable};
  use crate::config::ApiConfig;

  fn client() -> CachedApiClient {
    // Nothing listens on the discard port, so any real request fails fast
    let inner = ApiClient::new(&ApiConfig {
      url: "http://127.0.0.1:9".to_string(),
      timeout_secs: 2,
    })
    .unwrap();
    CachedApiClient::new(inner, CacheStore::new(PolicyTable::default()))
  }

  fn instance(id: &str) -> Instance {
    Instance {
      id: id.to_string(),
      name: format!("bot-{}", id),
      bot_type: "maibot".to_string(),
      version: None,
      status: InstanceStatus::Running,
      port: None,
      created_at: None,
    }
  }

  #[tokio::test]
  async fn test_fresh_entry_served_from_cache() {
    let client = client();
    let key = RequestKey::get(paths::INSTANCES).cache_key();
    client
      .cache()
      .set(&key, &vec![instance("1")], Category::Instances);

    let instances = client.list_instances(false).await.unwrap();
    assert_eq!(instances, vec![instance("1")]);
  }

  #[tokio::test]
  async fn test_write_invalidates_instances_even_on_failure() {
    let client = client();
    let key = RequestKey::get(paths::INSTANCES).cache_key();
    client
      .cache()
      .set(&key, &vec![instance("1")], Category::Instances);

    assert!(client.start_instance("1").await.is_err());
    assert_eq!(client.cache().get::<Vec<Instance>>(&key), None);
  }

  #[tokio::test]
  async fn test_failures_are_not_cached() {
    let client = client();
    assert!(client.system_stats(false).await.is_err());
    assert_eq!(client.cache().stats().total, 0);
  }
}
