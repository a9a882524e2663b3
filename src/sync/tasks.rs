//! The console's polling tasks.

use std::time::Duration;
use tokio::sync::watch;

use crate::api::{CachedApiClient, DownloadTask};
use crate::polling::{PollingScheduler, Priority, TaskConfig};

pub const INSTANCES: &str = "instances";
pub const SYSTEM_STATS: &str = "systemStats";
pub const DEPLOY_STATUS: &str = "deployStatus";

/// Cadence of `deployStatus` while the push channel is unavailable.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(2);

pub fn instances_config() -> TaskConfig {
  TaskConfig::new(Duration::from_secs(30)).with_priority(Priority::High)
}

pub fn system_stats_config() -> TaskConfig {
  TaskConfig::new(Duration::from_secs(10)).with_priority(Priority::Medium)
}

pub fn deploy_status_config() -> TaskConfig {
  TaskConfig::new(FALLBACK_INTERVAL)
    .with_priority(Priority::High)
    .with_enabled(false)
}

/// Register the standard tasks. Each one force-refreshes its cache entry so
/// views reading through the cache see the polled data.
///
/// `follow` names the download job `deployStatus` tracks; with no job the
/// task succeeds without a request.
pub fn register_default_tasks(
  scheduler: &PollingScheduler,
  client: &CachedApiClient,
  follow: watch::Receiver<Option<String>>,
  smart_instances: bool,
) {
  let c = client.clone();
  scheduler.register(
    INSTANCES,
    move || {
      let c = c.clone();
      async move { c.list_instances(true).await }
    },
    instances_config(),
  );
  if smart_instances {
    scheduler.enable_smart_polling(INSTANCES);
  }

  let c = client.clone();
  scheduler.register(
    SYSTEM_STATS,
    move || {
      let c = c.clone();
      async move { c.system_stats(true).await }
    },
    system_stats_config(),
  );

  let c = client.clone();
  scheduler.register(
    DEPLOY_STATUS,
    move || {
      let c = c.clone();
      let task_id = follow.borrow().clone();
      async move {
        match task_id {
          Some(id) => c.download_task(&id, true).await.map(Some),
          None => Ok(None::<DownloadTask>),
        }
      }
    },
    deploy_status_config(),
  );
}
