use crate::api::{ApiClient, CachedApiClient, DownloadTask, Instance, SystemStats};
use crate::cache::{CacheStore, MemoryStorage, NoopStorage};
use crate::commands::{self, Command};
use crate::config::Config;
use crate::event::{self, DataEvent, Event, EventHandler};
use crate::polling::{
  builtin_profiles, PollingScheduler, SchedulerEvent, TaskState, BACKGROUND, DOWNLOADS, HOME,
  INSTANCES as INSTANCES_PROFILE,
};
use crate::realtime::{
  ChannelConfig, ChannelEvent, DisconnectReason, LogLevel, Payload, RealtimeChannel,
  RealtimeMessage, WebSocketTransport,
};
use crate::sync::tasks::{self, register_default_tasks, DEPLOY_STATUS, INSTANCES, SYSTEM_STATS};
use crate::sync::SyncCoordinator;
use crate::ui;
use color_eyre::Result;
use crossterm::event::{
  DisableFocusChange, EnableFocusChange, KeyCode, KeyEvent, KeyModifiers,
};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::collections::VecDeque;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Lines of push log kept for the downloads view.
const LOG_LINES: usize = 200;
/// Ticks between sweeps of expired cache entries (about a minute).
const SWEEP_TICKS: u32 = 240;

/// Input mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Normal,
  Command,
}

/// Top-level screens, each with a polling profile of the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
  Home,
  Instances,
  Downloads,
}

impl Screen {
  pub fn profile(&self) -> &'static str {
    match self {
      Screen::Home => HOME,
      Screen::Instances => INSTANCES_PROFILE,
      Screen::Downloads => DOWNLOADS,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Screen::Home => "Home",
      Screen::Instances => "Instances",
      Screen::Downloads => "Downloads",
    }
  }

  /// Tasks whose data this screen shows
  fn tasks(&self) -> &'static [&'static str] {
    match self {
      Screen::Home => &[INSTANCES, SYSTEM_STATS],
      Screen::Instances => &[INSTANCES],
      Screen::Downloads => &[DEPLOY_STATUS],
    }
  }
}

/// Health of the push channel as shown in the header
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelStatus {
  #[default]
  Idle,
  Live,
  Reconnecting(u32),
  /// Channel gave up; data comes from polling
  Polling,
}

/// Latest data shown by the views
#[derive(Debug, Default)]
pub struct Snapshot {
  pub instances: Vec<Instance>,
  pub stats: Option<SystemStats>,
  pub download: Option<DownloadTask>,
  /// Push messages for the followed job, oldest first
  pub log: VecDeque<(LogLevel, String)>,
  pub channel: ChannelStatus,
}

impl Snapshot {
  pub fn push_log(&mut self, level: LogLevel, line: String) {
    if self.log.len() == LOG_LINES {
      self.log.pop_front();
    }
    self.log.push_back((level, line));
  }

  /// Fold a push message into the view state.
  fn apply_message(&mut self, message: &RealtimeMessage) {
    match &message.payload {
      Payload::Log { level, message } => self.push_log(*level, message.clone()),
      Payload::Progress(progress) => {
        if let Some(download) = self.download.as_mut() {
          download.progress = progress.percentage;
          download.status = progress.status.clone();
          download.message = progress.message.clone();
          download.current = Some(progress.current);
          download.total = Some(progress.total);
        }
      }
      Payload::Status { status, message } => {
        self.push_log(LogLevel::Info, format!("[{}] {}", status, message))
      }
      Payload::Error { message } => self.push_log(LogLevel::Error, message.clone()),
      Payload::Complete { message } => self.push_log(LogLevel::Success, message.clone()),
    }
  }
}

/// Main application state
pub struct App {
  config: Config,
  client: CachedApiClient,
  scheduler: PollingScheduler,
  coordinator: SyncCoordinator,

  /// Receivers wired into the event loop by `run`
  channel_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
  push_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,

  screen: Screen,
  mode: Mode,

  /// Command input buffer (after pressing :)
  command_input: String,

  /// Selected autocomplete suggestion index
  selected_suggestion: usize,

  /// Selected instance row
  selected: usize,

  data: Snapshot,

  /// One-line message in the status bar
  status: Option<String>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  ticks: u32,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(config: Config, follow: Option<String>) -> Result<Self> {
    let policies = config.cache.policy_table();
    let cache = if !config.cache.enabled {
      CacheStore::with_storage(NoopStorage, policies)
    } else if let Some(quota) = config.cache.max_bytes {
      CacheStore::with_storage(MemoryStorage::new().with_quota(quota), policies)
    } else {
      CacheStore::new(policies)
    };

    let api = ApiClient::new(&config.api)?;
    let client = CachedApiClient::new(api, cache.clone());

    let mut profiles = builtin_profiles(INSTANCES, SYSTEM_STATS);
    profiles.extend(config.profiles.clone());
    let scheduler = PollingScheduler::new(profiles);

    let (follow_tx, follow_rx) = watch::channel(None);
    register_default_tasks(
      &scheduler,
      &client,
      follow_rx,
      config.polling.smart_instances,
    );

    let mut channel_config = ChannelConfig::new(client.inner().base_url().clone(), "downloads");
    channel_config.reconnect_attempts = config.realtime.reconnect_attempts;
    channel_config.reconnect_delay = config.realtime.reconnect_delay();
    let (channel_tx, channel_rx) = mpsc::unbounded_channel();
    let channel = RealtimeChannel::new(channel_config, Arc::new(WebSocketTransport), channel_tx);

    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let mut coordinator =
      SyncCoordinator::new(scheduler.clone(), cache, channel, follow_tx, push_tx);

    let screen = if follow.is_some() {
      Screen::Downloads
    } else {
      Screen::Home
    };
    if let Some(job) = follow.as_deref() {
      coordinator.set_subscription(Some(job))?;
    }

    let (event_tx, _) = mpsc::unbounded_channel();

    Ok(Self {
      config,
      client,
      scheduler,
      coordinator,
      channel_rx: Some(channel_rx),
      push_rx: Some(push_rx),
      screen,
      mode: Mode::Normal,
      command_input: String::new(),
      selected_suggestion: 0,
      selected: 0,
      data: Snapshot::default(),
      status: None,
      event_tx,
      ticks: 0,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableFocusChange)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create event handler
    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();
    if let Some(rx) = self.channel_rx.take() {
      event::forward(rx, self.event_tx.clone(), Event::Channel);
    }
    if let Some(rx) = self.push_rx.take() {
      event::forward(rx, self.event_tx.clone(), Event::Push);
    }
    event::forward_scheduler(self.scheduler.subscribe(), self.event_tx.clone());

    if self.config.cache.warmup {
      let client = self.client.clone();
      tokio::spawn(async move { client.warmup().await });
    }
    self.enter_screen(self.screen);

    // Main loop
    while !self.should_quit {
      // Draw UI
      terminal.draw(|frame| ui::draw(frame, self))?;

      // Handle events
      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    self.shutdown();

    // Cleanup terminal
    stdout().execute(DisableFocusChange)?;
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  fn shutdown(&mut self) {
    info!("shutting down");
    let _ = self.coordinator.set_subscription(None);
    self.scheduler.reset_all();
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {
        // UI refresh happens automatically
        self.ticks += 1;
        if self.ticks % SWEEP_TICKS == 0 {
          self.client.cache().clear_expired();
        }
      }
      Event::Focus(focused) => self.handle_focus(focused),
      Event::Channel(channel_event) => self.coordinator.handle_channel_event(channel_event),
      Event::Push(channel_event) => self.handle_push(channel_event),
      Event::Scheduler(scheduler_event) => self.handle_scheduler_event(scheduler_event),
      Event::Data(data) => self.handle_data(data),
      Event::Error(msg) => {
        warn!(error = %msg, "background request failed");
        self.status = Some(msg);
      }
    }
  }

  /// Losing focus hides the scheduler and switches to the background
  /// profile, whose tasks keep polling at its slower cadence.
  fn handle_focus(&mut self, focused: bool) {
    self.scheduler.set_visible(focused);
    if focused {
      self.coordinator.enter_view(self.screen.profile());
    } else {
      self.coordinator.enter_view(BACKGROUND);
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match self.mode {
      Mode::Normal => self.handle_normal_mode_key(key),
      Mode::Command => self.handle_command_mode_key(key),
    }
  }

  fn handle_normal_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Navigation
      KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
      KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
      KeyCode::Char('1') => self.enter_screen(Screen::Home),
      KeyCode::Char('2') => self.enter_screen(Screen::Instances),
      KeyCode::Char('3') => self.enter_screen(Screen::Downloads),

      // Actions
      KeyCode::Char('r') => self.refresh(),
      KeyCode::Char('s') if self.screen == Screen::Instances => self.instance_action(true),
      KeyCode::Char('x') if self.screen == Screen::Instances => self.instance_action(false),

      // Mode switches
      KeyCode::Char(':') => {
        self.mode = Mode::Command;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }

      _ => {}
    }
  }

  fn handle_command_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Esc => {
        self.mode = Mode::Normal;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Enter => {
        self.execute_command();
        self.mode = Mode::Normal;
        self.selected_suggestion = 0;
      }
      KeyCode::Tab | KeyCode::Down => {
        // Navigate autocomplete suggestions
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = (self.selected_suggestion + 1) % suggestions.len();
        }
      }
      KeyCode::BackTab | KeyCode::Up => {
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = if self.selected_suggestion == 0 {
            suggestions.len() - 1
          } else {
            self.selected_suggestion - 1
          };
        }
      }
      KeyCode::Backspace => {
        self.command_input.pop();
        self.selected_suggestion = 0; // Reset selection on input change
      }
      KeyCode::Char(c) => {
        self.command_input.push(c);
        self.selected_suggestion = 0; // Reset selection on input change
      }
      _ => {}
    }
  }

  fn execute_command(&mut self) {
    let Some(invocation) = commands::parse(&self.command_input, self.selected_suggestion) else {
      self.status = Some(format!("Unknown command: {}", self.command_input.trim()));
      self.command_input.clear();
      return;
    };

    match invocation.name {
      "home" => self.enter_screen(Screen::Home),
      "instances" => self.enter_screen(Screen::Instances),
      "downloads" => self.enter_screen(Screen::Downloads),
      "follow" => match invocation.args.first() {
        Some(job) => {
          let job = job.clone();
          self.follow(Some(&job));
        }
        None => self.status = Some("Usage: follow <job id>".to_string()),
      },
      "unfollow" => self.follow(None),
      "refresh" => self.refresh(),
      "cache" => self.cache_command(invocation.args.first().map(String::as_str)),
      "quit" => self.should_quit = true,
      _ => {}
    }
    self.command_input.clear();
  }

  fn cache_command(&mut self, arg: Option<&str>) {
    let cache = self.client.cache();
    self.status = Some(match arg {
      Some("clear") => format!("Cleared {} cached entries", cache.clear_all()),
      _ => {
        let stats = cache.stats();
        let categories: Vec<String> = stats
          .by_category
          .iter()
          .map(|(category, count)| format!("{} {}", category, count))
          .collect();
        format!(
          "Cache: {} entries ({}), {} in flight",
          stats.total,
          categories.join(", "),
          stats.pending
        )
      }
    });
  }

  fn enter_screen(&mut self, screen: Screen) {
    self.screen = screen;
    self.selected = 0;
    if !self.coordinator.enter_view(screen.profile()) {
      self.status = Some(format!("Unknown polling profile {}", screen.profile()));
    }
    // Show whatever the cache already has
    for task in screen.tasks() {
      self.load_from_cache(task);
    }
  }

  fn follow(&mut self, job: Option<&str>) {
    self.data.download = None;
    self.data.log.clear();
    self.data.channel = ChannelStatus::Idle;

    match self.coordinator.set_subscription(job) {
      Ok(()) => {
        self.status = job.map(|j| format!("Following {}", j));
        if job.is_some() {
          self.enter_screen(Screen::Downloads);
          let scheduler = self.scheduler.clone();
          tokio::spawn(async move {
            scheduler.run_now(DEPLOY_STATUS).await;
          });
        }
      }
      Err(e) => self.status = Some(format!("Cannot follow: {}", e)),
    }
  }

  /// Run the current screen's tasks now, restarting any that disabled
  /// themselves.
  fn refresh(&mut self) {
    for task in self.screen.tasks() {
      let disabled = self
        .scheduler
        .status(task)
        .map(|s| s.state == TaskState::Disabled)
        .unwrap_or(false);
      if disabled {
        info!(task, "restarting disabled task");
        self.scheduler.start(task, None);
      }
      let scheduler = self.scheduler.clone();
      tokio::spawn(async move {
        scheduler.run_now(task).await;
      });
    }
    self.status = Some("Refreshing...".to_string());
  }

  fn instance_action(&mut self, start: bool) {
    let Some(instance) = self.data.instances.get(self.selected) else {
      return;
    };
    let id = instance.id.clone();
    let name = instance.name.clone();
    let client = self.client.clone();
    let scheduler = self.scheduler.clone();
    let tx = self.event_tx.clone();

    self.status = Some(format!(
      "{} {}...",
      if start { "Starting" } else { "Stopping" },
      name
    ));
    tokio::spawn(async move {
      let result = if start {
        client.start_instance(&id).await
      } else {
        client.stop_instance(&id).await
      };
      match result {
        Ok(message) => {
          let verb = if start { "started" } else { "stopped" };
          let text = message.unwrap_or_else(|| format!("{} {}", name, verb));
          let _ = tx.send(Event::Data(DataEvent::ActionDone(text)));
        }
        Err(e) => {
          let _ = tx.send(Event::Error(format!("{:#}", e)));
        }
      }
      scheduler.run_now(INSTANCES).await;
    });
  }

  /// Read a task's data through the cache and post it to the event loop.
  fn load_from_cache(&self, task: &str) {
    let client = self.client.clone();
    let tx = self.event_tx.clone();
    let follow = self.coordinator.subscription().map(String::from);

    let task = task.to_string();
    tokio::spawn(async move {
      let data = match task.as_str() {
        INSTANCES => client.list_instances(false).await.map(DataEvent::Instances),
        SYSTEM_STATS => client.system_stats(false).await.map(DataEvent::Stats),
        DEPLOY_STATUS => match follow {
          Some(job) => client
            .download_task(&job, false)
            .await
            .map(|d| DataEvent::Download(Some(d))),
          None => Ok(DataEvent::Download(None)),
        },
        _ => return,
      };
      let event = match data {
        Ok(data) => Event::Data(data),
        Err(e) => Event::Error(format!("{:#}", e)),
      };
      let _ = tx.send(event);
    });
  }

  fn handle_scheduler_event(&mut self, event: SchedulerEvent) {
    match event {
      SchedulerEvent::Executed { name } => self.load_from_cache(&name),
      SchedulerEvent::Failed {
        name,
        error,
        error_count,
      } => {
        self.status = Some(format!("{} failed ({}x): {}", name, error_count, error));
      }
      SchedulerEvent::Disabled { name } => {
        self.status = Some(format!(
          "{} stopped after repeated failures; press r to retry",
          name
        ));
      }
      SchedulerEvent::IntervalAdjusted { .. } => {}
    }
  }

  fn handle_push(&mut self, event: ChannelEvent) {
    match event {
      ChannelEvent::Connected { .. } => self.data.channel = ChannelStatus::Live,
      ChannelEvent::Reconnecting { attempt } => {
        self.data.channel = ChannelStatus::Reconnecting(attempt)
      }
      ChannelEvent::Disconnected(DisconnectReason::Exhausted) => {
        self.data.channel = ChannelStatus::Polling;
        self.status = Some(format!(
          "Push channel unavailable, polling every {}s",
          tasks::FALLBACK_INTERVAL.as_secs()
        ));
      }
      ChannelEvent::Disconnected(DisconnectReason::Manual) => {
        self.data.channel = ChannelStatus::Idle
      }
      ChannelEvent::Message(message) => self.data.apply_message(&message),
    }
  }

  fn handle_data(&mut self, data: DataEvent) {
    match data {
      DataEvent::Instances(instances) => {
        self.data.instances = instances;
        if self.selected >= self.data.instances.len() {
          self.selected = self.data.instances.len().saturating_sub(1);
        }
      }
      DataEvent::Stats(stats) => self.data.stats = Some(stats),
      DataEvent::Download(download) => self.data.download = download,
      DataEvent::ActionDone(message) => self.status = Some(message),
    }
  }

  fn move_selection(&mut self, delta: i32) {
    if self.screen != Screen::Instances {
      return;
    }
    let len = self.data.instances.len();
    if len > 0 {
      self.selected = (self.selected as i32 + delta).rem_euclid(len as i32) as usize;
    }
  }

  // Accessors for UI rendering
  pub fn screen(&self) -> Screen {
    self.screen
  }

  pub fn mode(&self) -> &Mode {
    &self.mode
  }

  pub fn command_input(&self) -> &str {
    &self.command_input
  }

  pub fn data(&self) -> &Snapshot {
    &self.data
  }

  pub fn selected(&self) -> usize {
    self.selected
  }

  pub fn status(&self) -> Option<&str> {
    self.status.as_deref()
  }

  pub fn followed_job(&self) -> Option<&str> {
    self.coordinator.subscription()
  }

  pub fn api_url(&self) -> &str {
    &self.config.api.url
  }

  pub fn title(&self) -> Option<&str> {
    self.config.title.as_deref()
  }

  pub fn task_states(&self) -> Vec<(String, TaskState, Duration)> {
    self
      .scheduler
      .statuses()
      .into_iter()
      .map(|s| (s.name, s.state, s.interval))
      .collect()
  }

  pub fn view_breadcrumb(&self) -> Vec<String> {
    let mut crumbs = vec![self.screen.label().to_string()];
    if self.screen == Screen::Downloads {
      if let Some(job) = self.followed_job() {
        crumbs.push(job.to_string());
      }
    }
    crumbs
  }

  pub fn autocomplete_suggestions(&self) -> Vec<&'static Command> {
    commands::get_suggestions(&self.command_input)
  }

  pub fn selected_suggestion(&self) -> usize {
    self.selected_suggestion
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::realtime::Progress;

  #[test]
  fn test_screens_map_to_profiles() {
    assert_eq!(Screen::Home.profile(), "home");
    assert_eq!(Screen::Instances.profile(), "instances");
    assert_eq!(Screen::Downloads.profile(), "downloads");
  }

  #[test]
  fn test_log_is_bounded() {
    let mut snapshot = Snapshot::default();
    for i in 0..LOG_LINES + 5 {
      snapshot.push_log(LogLevel::Info, format!("line {}", i));
    }
    assert_eq!(snapshot.log.len(), LOG_LINES);
    assert_eq!(snapshot.log.front().unwrap().1, "line 5");
  }

  #[test]
  fn test_progress_updates_followed_download() {
    let mut snapshot = Snapshot {
      download: Some(DownloadTask {
        id: "job".to_string(),
        status: "pending".to_string(),
        progress: 0,
        message: String::new(),
        current: None,
        total: None,
      }),
      ..Default::default()
    };

    snapshot.apply_message(&RealtimeMessage::now(Payload::Progress(Progress {
      current: 4,
      total: 8,
      percentage: 50,
      message: "fetching".to_string(),
      status: "running".to_string(),
    })));
    let download = snapshot.download.as_ref().unwrap();
    assert_eq!(download.progress, 50);
    assert_eq!(download.total, Some(8));

    snapshot.apply_message(&RealtimeMessage::now(Payload::Complete {
      message: "done".to_string(),
    }));
    assert_eq!(
      snapshot.log.back(),
      Some(&(LogLevel::Success, "done".to_string()))
    );
  }

  #[tokio::test]
  async fn test_focus_loss_keeps_background_polling() {
    let mut app = App::new(Config::default(), None).unwrap();
    app.enter_screen(Screen::Instances);
    let state_of = |app: &App, task: &str| app.scheduler.status(task).unwrap();
    assert_eq!(state_of(&app, INSTANCES).state, TaskState::Running);
    assert_eq!(state_of(&app, SYSTEM_STATS).state, TaskState::Idle);

    app.handle_focus(false);
    let instances = state_of(&app, INSTANCES);
    assert_eq!(instances.state, TaskState::Running);
    assert_eq!(instances.interval, Duration::from_secs(60));
    // Not running before, so the background profile leaves it off
    assert_eq!(state_of(&app, SYSTEM_STATS).state, TaskState::Idle);

    app.handle_focus(true);
    assert_eq!(state_of(&app, INSTANCES).interval, Duration::from_secs(15));
    app.scheduler.stop_all();
  }
}
