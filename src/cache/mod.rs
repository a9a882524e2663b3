//! Response cache shared by every view, poller and push handler.
//!
//! This module provides:
//! - TTL-based entries grouped into categories with per-category size limits
//! - At most one in-flight request per key; concurrent callers share its result
//! - Invalidation by key or substring that also detaches in-flight requests,
//!   so a slow response can never resurrect data invalidated after it started
//! - Best-effort writes: a failing backend never breaks a caller

mod key;
mod policy;
mod storage;
mod store;
mod traits;

pub use key::RequestKey;
pub use policy::{CachePolicy, Category, PolicyTable};
pub use storage::{MemoryStorage, NoopStorage};
pub use store::CacheStore;
pub use traits::{CacheStats, Cacheable, FetchFailure};
