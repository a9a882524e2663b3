//! Periodic refresh of named data sources.
//!
//! Tasks are registered once with a fetcher and then started, stopped and
//! retuned by name. A task never runs concurrently with itself, disables
//! itself after repeated failures, pauses while the console is hidden and
//! can adapt its interval to how often its results change.

mod profile;
mod scheduler;
mod task;

pub use profile::{builtin_profiles, Profile, ProfileEntry, BACKGROUND, DOWNLOADS, HOME, INSTANCES};
pub use scheduler::PollingScheduler;
pub use task::{
  ExecutionOutcome, Priority, SchedulerEvent, TaskConfig, TaskOverride, TaskState, TaskStatus,
};
