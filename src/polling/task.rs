//! Polling task configuration and status types.

use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Consecutive failures after which a task disables itself.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Informational priority, used when building page profiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  #[default]
  Medium,
  Low,
}

/// Per-task configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
  pub interval: Duration,
  /// Whether `start_all` starts this task
  pub enabled: bool,
  pub priority: Priority,
  /// Run once immediately on start, before the first interval elapses
  pub leading: bool,
  /// Optional deadline for one execution; `None` leaves timeouts to the fetcher
  pub timeout: Option<Duration>,
}

impl TaskConfig {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      enabled: true,
      priority: Priority::default(),
      leading: true,
      timeout: None,
    }
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn with_leading(mut self, leading: bool) -> Self {
    self.leading = leading;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// Partial configuration applied by `start`.
#[derive(Debug, Clone, Default)]
pub struct TaskOverride {
  pub interval: Option<Duration>,
  pub enabled: Option<bool>,
  pub leading: Option<bool>,
}

impl TaskOverride {
  pub fn interval(interval: Duration) -> Self {
    Self {
      interval: Some(interval),
      ..Default::default()
    }
  }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  /// Registered, no timer armed
  Idle,
  /// Timer armed
  Running,
  /// Should be running but the host is hidden; re-armed on becoming visible
  Suspended,
  /// Stopped after too many consecutive failures; needs an explicit `start`
  Disabled,
}

impl TaskState {
  pub fn is_active(&self) -> bool {
    matches!(self, TaskState::Running | TaskState::Suspended)
  }
}

/// Result of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
  Succeeded,
  Failed,
  /// The previous execution had not finished; this one was dropped
  Skipped,
  /// The task is disabled and was not run
  Disabled,
  /// No task with that name
  Unknown,
}

/// Snapshot of a task for status displays and tests.
#[derive(Debug, Clone)]
pub struct TaskStatus {
  pub name: String,
  pub state: TaskState,
  pub interval: Duration,
  pub base_interval: Duration,
  pub enabled: bool,
  pub priority: Priority,
  pub smart: bool,
  pub is_executing: bool,
  pub executions: u64,
  pub error_count: u32,
  pub last_error: Option<String>,
  pub last_executed: Option<Instant>,
  /// Entries in the change history (adaptive mode only)
  pub change_count: usize,
}

/// Notifications broadcast by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
  Executed { name: String },
  Failed { name: String, error: String, error_count: u32 },
  /// Auto-disabled after too many failures
  Disabled { name: String },
  IntervalAdjusted { name: String, interval: Duration },
}
