//! Core traits and types for the caching system.

use color_eyre::Report;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::policy::Category;

/// Bound for values that can live in the cache.
///
/// Values are stored serialized, so every cached read hands out an owned copy
/// and entries are always replaced wholesale, never merged.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A fetch failure shared between every caller waiting on the same request.
///
/// The first caller's error is kept intact; each waiter receives a clone that
/// points at the same report.
#[derive(Debug, Clone)]
pub struct FetchFailure(Arc<Report>);

impl FetchFailure {
  pub fn new(report: Report) -> Self {
    Self(Arc::new(report))
  }

  /// The original report produced by the fetcher.
  pub fn report(&self) -> &Report {
    &self.0
  }
}

impl From<Report> for FetchFailure {
  fn from(report: Report) -> Self {
    Self::new(report)
  }
}

impl fmt::Display for FetchFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:#}", self.0)
  }
}

impl std::error::Error for FetchFailure {}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
  /// Number of stored entries, including expired ones not yet evicted
  pub total: usize,
  /// Entry count per category
  pub by_category: BTreeMap<Category, usize>,
  /// Requests currently in flight
  pub pending: usize,
}
