//! Deterministic cache keys for API requests.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use super::policy::Category;

/// Identifies one API request: method, resource path and query or body.
///
/// The rendered key keeps the path readable so that pattern invalidation
/// (e.g. everything containing `/instances`) keeps working, while request
/// bodies are reduced to a SHA256 digest for stable, bounded keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  method: &'static str,
  path: String,
  query: Vec<(String, String)>,
  body_digest: Option<String>,
}

impl RequestKey {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      method: "GET",
      path: path.into(),
      query: Vec::new(),
      body_digest: None,
    }
  }

  pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Self {
    // A value that cannot be serialized hashes as an empty body.
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);

    Self {
      method: "POST",
      path: path.into(),
      query: Vec::new(),
      body_digest: Some(hex::encode(hasher.finalize())),
    }
  }

  /// Add a query parameter. Parameters are sorted when the key is rendered.
  pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
    self.query.push((name.into(), value.to_string()));
    self
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  /// Category derived from the resource path.
  pub fn category(&self) -> Category {
    Category::classify(&self.path)
  }

  pub fn cache_key(&self) -> String {
    self.to_string()
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.method, self.path)?;

    if !self.query.is_empty() {
      let mut query = self.query.clone();
      query.sort();
      let rendered: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
      write!(f, "?{}", rendered.join("&"))?;
    }

    if let Some(digest) = &self.body_digest {
      write!(f, ":{}", digest)?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_key() {
    let key = RequestKey::get("/api/v1/instances");
    assert_eq!(key.cache_key(), "GET:/api/v1/instances");
    assert_eq!(key.category(), Category::Instances);
  }

  #[test]
  fn test_query_order_is_stable() {
    let a = RequestKey::get("/api/v1/stats")
      .with_query("range", "24h")
      .with_query("instance", "bot-1");
    let b = RequestKey::get("/api/v1/stats")
      .with_query("instance", "bot-1")
      .with_query("range", "24h");
    assert_eq!(a.cache_key(), b.cache_key());
    assert_eq!(a.cache_key(), "GET:/api/v1/stats?instance=bot-1&range=24h");
  }

  #[test]
  fn test_post_body_digest() {
    let a = RequestKey::post("/api/v1/deploy", &serde_json::json!({"version": "v1"}));
    let b = RequestKey::post("/api/v1/deploy", &serde_json::json!({"version": "v1"}));
    let c = RequestKey::post("/api/v1/deploy", &serde_json::json!({"version": "v2"}));

    assert_eq!(a.cache_key(), b.cache_key());
    assert_ne!(a.cache_key(), c.cache_key());
    assert!(a.cache_key().starts_with("POST:/api/v1/deploy:"));
    // method + path + ':' + 64 hex chars
    assert_eq!(a.cache_key().len(), "POST:/api/v1/deploy:".len() + 64);
  }
}
