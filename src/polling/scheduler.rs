//! Named periodic refresh tasks with adaptive intervals.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::profile::Profile;
use super::task::{
  ExecutionOutcome, SchedulerEvent, TaskConfig, TaskOverride, TaskState, TaskStatus,
  MAX_CONSECUTIVE_ERRORS,
};

/// Trailing window used to count result changes in adaptive mode.
pub const CHANGE_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Fastest interval adaptive mode will pick.
pub const MIN_ADAPTIVE_INTERVAL: Duration = Duration::from_secs(5);
/// Slowest interval adaptive mode will pick.
pub const MAX_ADAPTIVE_INTERVAL: Duration = Duration::from_secs(120);
const CHANGE_HISTORY_LEN: usize = 10;
const FREQUENT_CHANGES: usize = 3;

/// Runs the fetcher; with `true` it also returns a fingerprint of the result.
type TaskFetcher = Arc<dyn Fn(bool) -> BoxFuture<'static, Result<Option<String>>> + Send + Sync>;

struct Task {
  fetcher: TaskFetcher,
  config: TaskConfig,
  /// Interval chosen by registration, `set_interval` or a profile.
  /// Adaptive mode moves `config.interval` relative to this.
  base_interval: Duration,
  state: TaskState,
  timer: Option<JoinHandle<()>>,
  /// Distinguishes registrations so a late finish of a replaced task is ignored
  registration: u64,
  is_executing: bool,
  executions: u64,
  error_count: u32,
  last_error: Option<String>,
  last_executed: Option<Instant>,
  smart: bool,
  change_history: VecDeque<Instant>,
  last_fingerprint: Option<String>,
}

impl Task {
  fn disarm(&mut self) {
    if let Some(timer) = self.timer.take() {
      timer.abort();
    }
  }

  fn status(&self, name: &str) -> TaskStatus {
    TaskStatus {
      name: name.to_string(),
      state: self.state,
      interval: self.config.interval,
      base_interval: self.base_interval,
      enabled: self.config.enabled,
      priority: self.config.priority,
      smart: self.smart,
      is_executing: self.is_executing,
      executions: self.executions,
      error_count: self.error_count,
      last_error: self.last_error.clone(),
      last_executed: self.last_executed,
      change_count: self.change_history.len(),
    }
  }
}

struct State {
  tasks: HashMap<String, Task>,
  profiles: HashMap<String, Profile>,
  active_profile: Option<String>,
  visible: bool,
  next_registration: u64,
}

struct Inner {
  state: Mutex<State>,
  events: broadcast::Sender<SchedulerEvent>,
}

/// Owns every polling task in the process.
///
/// Cheap to clone. Starting a task arms a timer on the tokio runtime, so
/// methods that start tasks must be called from within a runtime.
#[derive(Clone)]
pub struct PollingScheduler {
  inner: Arc<Inner>,
}

impl PollingScheduler {
  pub fn new(profiles: HashMap<String, Profile>) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State {
          tasks: HashMap::new(),
          profiles,
          active_profile: None,
          visible: true,
          next_registration: 0,
        }),
        events,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, event: SchedulerEvent) {
    // No subscribers is fine
    let _ = self.inner.events.send(event);
  }

  /// Receive execution, failure and retune notifications.
  pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
    self.inner.events.subscribe()
  }

  /// Register (or replace) a task. A running task with the same name is
  /// stopped first; the new registration starts idle.
  pub fn register<T, F, Fut>(&self, name: &str, fetcher: F, config: TaskConfig)
  where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let fetcher: TaskFetcher = Arc::new(move |fingerprint| {
      let request = fetcher();
      async move {
        let value = request.await?;
        Ok(fingerprint.then(|| fingerprint_of(&value)))
      }
      .boxed()
    });

    let mut state = self.lock();
    state.next_registration += 1;
    let registration = state.next_registration;

    if let Some(mut old) = state.tasks.remove(name) {
      old.disarm();
      debug!(task = name, "replacing registered task");
    }

    info!(task = name, interval = ?config.interval, priority = ?config.priority, "registered polling task");
    state.tasks.insert(
      name.to_string(),
      Task {
        fetcher,
        base_interval: config.interval,
        config,
        state: TaskState::Idle,
        timer: None,
        registration,
        is_executing: false,
        executions: 0,
        error_count: 0,
        last_error: None,
        last_executed: None,
        smart: false,
        change_history: VecDeque::new(),
        last_fingerprint: None,
      },
    );
  }

  /// Start a task: run it once right away (when `leading`) and then on every
  /// interval. Restarting an auto-disabled task clears its error count.
  pub fn start(&self, name: &str, config_override: Option<TaskOverride>) -> bool {
    let mut state = self.lock();
    if !state.tasks.contains_key(name) {
      warn!(task = name, "cannot start unknown polling task");
      return false;
    }
    if let Some(config_override) = config_override {
      if let Some(task) = state.tasks.get_mut(name) {
        if let Some(interval) = config_override.interval {
          task.config.interval = interval;
          task.base_interval = interval;
        }
        if let Some(enabled) = config_override.enabled {
          task.config.enabled = enabled;
        }
        if let Some(leading) = config_override.leading {
          task.config.leading = leading;
        }
      }
    }
    self.start_locked(&mut state, name);
    true
  }

  pub fn stop(&self, name: &str) -> bool {
    let mut state = self.lock();
    if !state.tasks.contains_key(name) {
      warn!(task = name, "cannot stop unknown polling task");
      return false;
    }
    Self::stop_locked(&mut state, name);
    true
  }

  /// Start every enabled task. Auto-disabled tasks stay disabled.
  pub fn start_all(&self) {
    let mut state = self.lock();
    let names: Vec<String> = state
      .tasks
      .iter()
      .filter(|(_, t)| t.config.enabled && t.state != TaskState::Disabled)
      .map(|(name, _)| name.clone())
      .collect();

    info!(count = names.len(), "starting all polling tasks");
    for name in names {
      self.start_locked(&mut state, &name);
    }
  }

  pub fn stop_all(&self) {
    let mut state = self.lock();
    let names: Vec<String> = state.tasks.keys().cloned().collect();
    info!("stopping all polling tasks");
    for name in names {
      Self::stop_locked(&mut state, &name);
    }
  }

  /// Change a task's interval. A running task is restarted so the new
  /// cadence applies immediately.
  pub fn set_interval(&self, name: &str, interval: Duration) -> bool {
    let mut state = self.lock();
    let Some(task) = state.tasks.get_mut(name) else {
      warn!(task = name, "cannot retune unknown polling task");
      return false;
    };

    task.config.interval = interval;
    task.base_interval = interval;
    let running = task.state == TaskState::Running;
    let leading = task.config.leading;

    if running {
      self.arm(&mut state, name, leading);
    }
    drop(state);

    info!(task = name, ?interval, "updated polling interval");
    self.emit(SchedulerEvent::IntervalAdjusted {
      name: name.to_string(),
      interval,
    });
    true
  }

  /// Add or replace a named profile.
  pub fn define_profile(&self, name: &str, profile: Profile) {
    self.lock().profiles.insert(name.to_string(), profile);
  }

  /// Switch to a page profile. Tasks missing from the profile are stopped;
  /// listed tasks are retuned and started or stopped as the profile says.
  ///
  /// Auto-disabled tasks are only retuned; they wait for an explicit
  /// `start`. While hidden, the tasks a profile keeps on poll at its cadence
  /// instead of staying suspended, which is how a background profile works.
  pub fn apply_profile(&self, profile_name: &str) -> bool {
    let mut state = self.lock();
    let Some(profile) = state.profiles.get(profile_name).cloned() else {
      warn!(profile = profile_name, "unknown polling profile");
      return false;
    };

    let names: Vec<String> = state.tasks.keys().cloned().collect();
    for name in names {
      let Some(entry) = profile.tasks.get(&name) else {
        Self::stop_locked(&mut state, &name);
        continue;
      };

      let Some(task) = state.tasks.get_mut(&name) else {
        continue;
      };
      let mut retuned = false;
      if let Some(interval) = entry.interval() {
        retuned = task.config.interval != interval;
        task.config.interval = interval;
        task.base_interval = interval;
      }
      if task.state == TaskState::Disabled {
        continue;
      }
      let active = task.state.is_active();
      let running = task.state == TaskState::Running;

      if !state.visible {
        let keep = entry.enabled.unwrap_or(active);
        if !keep {
          Self::stop_locked(&mut state, &name);
        } else if !running || retuned {
          self.resume_locked(&mut state, &name);
        }
        continue;
      }

      match entry.enabled {
        Some(true) if !active || retuned => self.start_locked(&mut state, &name),
        Some(true) => {}
        Some(false) => Self::stop_locked(&mut state, &name),
        None if running && retuned => self.arm(&mut state, &name, false),
        None => {}
      }
    }

    for name in profile.tasks.keys() {
      if !state.tasks.contains_key(name) {
        debug!(task = %name, profile = profile_name, "profile names an unregistered task");
      }
    }

    state.active_profile = Some(profile_name.to_string());
    info!(profile = profile_name, "applied polling profile");
    true
  }

  pub fn active_profile(&self) -> Option<String> {
    self.lock().active_profile.clone()
  }

  /// Turn on adaptive intervals for a task.
  ///
  /// Each execution fingerprints the result and records when it changed.
  /// With three or more changes in the last five minutes the interval is
  /// halved (not below 5s); with none it is doubled (not above 120s);
  /// otherwise it returns to the base interval.
  pub fn enable_smart_polling(&self, name: &str) -> bool {
    let mut state = self.lock();
    let Some(task) = state.tasks.get_mut(name) else {
      warn!(task = name, "cannot enable smart polling for unknown task");
      return false;
    };
    task.smart = true;
    debug!(task = name, "enabled smart polling");
    true
  }

  /// Pause timers while the host is hidden. Becoming visible re-arms each
  /// suspended task with one immediate catch-up run.
  pub fn set_visible(&self, visible: bool) {
    let mut state = self.lock();
    if state.visible == visible {
      return;
    }
    state.visible = visible;

    let names: Vec<String> = state.tasks.keys().cloned().collect();
    for name in names {
      let Some(task) = state.tasks.get_mut(&name) else {
        continue;
      };
      match (visible, task.state) {
        (false, TaskState::Running) => {
          task.disarm();
          task.state = TaskState::Suspended;
        }
        (true, TaskState::Suspended) => {
          task.state = TaskState::Running;
          self.arm(&mut state, &name, true);
        }
        _ => {}
      }
    }
    debug!(visible, "polling visibility changed");
  }

  pub fn status(&self, name: &str) -> Option<TaskStatus> {
    self.lock().tasks.get(name).map(|t| t.status(name))
  }

  /// Status of every task, sorted by name.
  pub fn statuses(&self) -> Vec<TaskStatus> {
    let state = self.lock();
    let mut statuses: Vec<TaskStatus> = state
      .tasks
      .iter()
      .map(|(name, task)| task.status(name))
      .collect();
    statuses.sort_by(|a, b| a.name.cmp(&b.name));
    statuses
  }

  /// Stop and forget every task.
  pub fn reset_all(&self) {
    let mut state = self.lock();
    for task in state.tasks.values_mut() {
      task.disarm();
    }
    state.tasks.clear();
    state.active_profile = None;
    info!("polling scheduler reset");
  }

  /// Execute a task now, outside its timer.
  ///
  /// Used for ticks, manual refreshes and push-driven refreshes alike; the
  /// re-entrancy guard applies to all of them.
  pub async fn run_now(&self, name: &str) -> ExecutionOutcome {
    let (fetcher, registration, fingerprint, timeout) = {
      let mut state = self.lock();
      let Some(task) = state.tasks.get_mut(name) else {
        return ExecutionOutcome::Unknown;
      };
      if task.state == TaskState::Disabled {
        return ExecutionOutcome::Disabled;
      }
      if task.is_executing {
        debug!(task = name, "previous execution still running, skipping");
        return ExecutionOutcome::Skipped;
      }
      task.is_executing = true;
      (
        task.fetcher.clone(),
        task.registration,
        task.smart,
        task.config.timeout,
      )
    };

    let guard = ExecutionGuard {
      scheduler: self,
      name,
      registration,
      finished: false,
    };

    debug!(task = name, "executing polling task");
    let result = match timeout {
      Some(limit) => match tokio::time::timeout(limit, fetcher(fingerprint)).await {
        Ok(result) => result,
        Err(_) => Err(eyre!("Polling task {} timed out after {:?}", name, limit)),
      },
      None => fetcher(fingerprint).await,
    };

    guard.finish();
    self.finish(name, registration, result)
  }

  /// Drop back to the base interval and forget recent changes, re-arming a
  /// running task so its next tick is one base interval away.
  ///
  /// Used when fresher data arrives from elsewhere and any adaptive backoff
  /// no longer applies.
  pub fn reset_backoff(&self, name: &str) -> bool {
    let mut state = self.lock();
    let Some(task) = state.tasks.get_mut(name) else {
      return false;
    };
    task.change_history.clear();
    let interval = task.base_interval;
    let changed = task.config.interval != interval;
    task.config.interval = interval;
    if task.state == TaskState::Running {
      self.arm(&mut state, name, false);
    }
    drop(state);

    if changed {
      debug!(task = name, ?interval, "polling backoff reset");
      self.emit(SchedulerEvent::IntervalAdjusted {
        name: name.to_string(),
        interval,
      });
    }
    true
  }

  fn finish(
    &self,
    name: &str,
    registration: u64,
    result: Result<Option<String>>,
  ) -> ExecutionOutcome {
    let mut state = self.lock();
    let Some(task) = state
      .tasks
      .get_mut(name)
      .filter(|t| t.registration == registration)
    else {
      debug!(task = name, "task was replaced while executing, dropping result");
      return match result {
        Ok(_) => ExecutionOutcome::Succeeded,
        Err(_) => ExecutionOutcome::Failed,
      };
    };

    task.is_executing = false;
    task.executions += 1;

    match result {
      Ok(fingerprint) => {
        let now = Instant::now();
        task.last_executed = Some(now);
        task.error_count = 0;
        task.last_error = None;

        let mut retune = None;
        if task.smart {
          if let Some(fingerprint) = fingerprint {
            if task.last_fingerprint.as_deref() != Some(fingerprint.as_str()) {
              task.change_history.push_back(now);
              if task.change_history.len() > CHANGE_HISTORY_LEN {
                task.change_history.pop_front();
              }
              task.last_fingerprint = Some(fingerprint);
            }
          }

          let recent = task
            .change_history
            .iter()
            .filter(|at| now.duration_since(**at) < CHANGE_WINDOW)
            .count();
          let interval = adaptive_interval(task.base_interval, recent);
          if interval != task.config.interval {
            debug!(task = name, recent, ?interval, "adapting polling interval");
            task.config.interval = interval;
            retune = Some((interval, task.state == TaskState::Running));
          }
        }

        if let Some((interval, running)) = retune {
          if running {
            self.arm(&mut state, name, false);
          }
          drop(state);
          self.emit(SchedulerEvent::IntervalAdjusted {
            name: name.to_string(),
            interval,
          });
        } else {
          drop(state);
        }

        self.emit(SchedulerEvent::Executed {
          name: name.to_string(),
        });
        ExecutionOutcome::Succeeded
      }
      Err(e) => {
        task.error_count += 1;
        task.last_error = Some(format!("{:#}", e));
        let error_count = task.error_count;
        warn!(task = name, error_count, error = %e, "polling task failed");

        let disabled = error_count >= MAX_CONSECUTIVE_ERRORS;
        if disabled {
          task.disarm();
          task.state = TaskState::Disabled;
          warn!(task = name, "polling task disabled after repeated failures");
        }
        drop(state);

        self.emit(SchedulerEvent::Failed {
          name: name.to_string(),
          error: format!("{:#}", e),
          error_count,
        });
        if disabled {
          self.emit(SchedulerEvent::Disabled {
            name: name.to_string(),
          });
        }
        ExecutionOutcome::Failed
      }
    }
  }

  fn start_locked(&self, state: &mut State, name: &str) {
    let visible = state.visible;
    let Some(task) = state.tasks.get_mut(name) else {
      return;
    };

    if task.state == TaskState::Disabled {
      task.error_count = 0;
      task.last_error = None;
    }
    let leading = task.config.leading;
    let interval = task.config.interval;

    if visible {
      task.state = TaskState::Running;
      self.arm(state, name, leading);
    } else {
      task.disarm();
      task.state = TaskState::Suspended;
    }
    info!(task = name, ?interval, visible, "started polling task");
  }

  fn stop_locked(state: &mut State, name: &str) {
    let Some(task) = state.tasks.get_mut(name) else {
      return;
    };
    task.disarm();
    if task.state != TaskState::Disabled {
      task.state = TaskState::Idle;
    }
    debug!(task = name, "stopped polling task");
  }

  /// Keep a task polling while hidden, without a leading run.
  fn resume_locked(&self, state: &mut State, name: &str) {
    let Some(task) = state.tasks.get_mut(name) else {
      return;
    };
    task.state = TaskState::Running;
    let interval = task.config.interval;
    self.arm(state, name, false);
    debug!(task = name, ?interval, "polling while hidden");
  }

  /// (Re)arm the timer of a task at its current interval.
  fn arm(&self, state: &mut State, name: &str, leading: bool) {
    let Some(task) = state.tasks.get_mut(name) else {
      return;
    };
    task.disarm();

    let period = task.config.interval.max(Duration::from_millis(1));
    let registration = task.registration;
    let scheduler = self.clone();
    let owned_name = name.to_string();

    task.timer = Some(tokio::spawn(async move {
      let first = if leading {
        Instant::now()
      } else {
        Instant::now() + period
      };
      let mut ticker = tokio::time::interval_at(first, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
        ticker.tick().await;
        scheduler.tick(&owned_name, registration);
      }
    }));
  }

  /// Timer callback. Executions run on their own task so a slow fetcher
  /// never delays the timer; the guard in `run_now` drops overlapping ticks.
  fn tick(&self, name: &str, registration: u64) {
    {
      let state = self.lock();
      let Some(task) = state.tasks.get(name) else {
        return;
      };
      if task.registration != registration || task.state != TaskState::Running {
        return;
      }
    }

    let scheduler = self.clone();
    let name = name.to_string();
    tokio::spawn(async move {
      scheduler.run_now(&name).await;
    });
  }
}

/// Clears the re-entrancy flag when an execution is cancelled or its fetcher
/// panics, so the task is not stuck as executing.
struct ExecutionGuard<'a> {
  scheduler: &'a PollingScheduler,
  name: &'a str,
  registration: u64,
  finished: bool,
}

impl ExecutionGuard<'_> {
  fn finish(mut self) {
    self.finished = true;
  }
}

impl Drop for ExecutionGuard<'_> {
  fn drop(&mut self) {
    if self.finished {
      return;
    }
    let mut state = self.scheduler.lock();
    if let Some(task) = state
      .tasks
      .get_mut(self.name)
      .filter(|t| t.registration == self.registration)
    {
      task.is_executing = false;
      debug!(task = self.name, "polling execution abandoned");
    }
  }
}

/// Interval for a task given how many result changes it saw recently.
pub fn adaptive_interval(base: Duration, recent_changes: usize) -> Duration {
  if recent_changes >= FREQUENT_CHANGES {
    (base / 2).max(MIN_ADAPTIVE_INTERVAL)
  } else if recent_changes == 0 {
    (base * 2).min(MAX_ADAPTIVE_INTERVAL)
  } else {
    base
  }
}

fn fingerprint_of<T: Serialize>(value: &T) -> String {
  let bytes = serde_json::to_vec(value).unwrap_or_default();
  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  hex::encode(hasher.finalize())
}
