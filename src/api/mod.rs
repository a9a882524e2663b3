mod cached_client;
mod client;
mod types;

pub use cached_client::CachedApiClient;
pub use client::{paths, ApiClient};
pub use types::{
  ApiEnvelope, DownloadTask, Instance, InstanceStatus, MemoryUsage, SystemStats, Versions,
};
