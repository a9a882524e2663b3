use color_eyre::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::polling::{PollingScheduler, TaskOverride};
use crate::realtime::{
  dispatch, ChannelEvent, DisconnectReason, MessageHandler, Progress, RealtimeChannel,
};

use super::tasks::{DEPLOY_STATUS, FALLBACK_INTERVAL, INSTANCES};

const INSTANCE_PATTERNS: &[&str] = &["/instances"];
const DEPLOY_PATTERNS: &[&str] = &["/deploy", "/downloads", "/install-status"];

/// What a push message asks for: cache patterns to drop and a task to run.
#[derive(Debug, Default, PartialEq, Eq)]
struct Reaction {
  invalidate: Vec<&'static str>,
  run: Option<&'static str>,
}

impl MessageHandler for Reaction {
  fn on_progress(&mut self, _progress: &Progress) {
    self.invalidate.extend(DEPLOY_PATTERNS);
    self.run = Some(DEPLOY_STATUS);
  }

  fn on_status(&mut self, _status: &str, _message: &str) {
    self.invalidate.extend(INSTANCE_PATTERNS);
    self.run = Some(INSTANCES);
  }

  fn on_error(&mut self, _message: &str) {
    self.finished();
  }

  fn on_complete(&mut self, _message: &str) {
    self.finished();
  }
}

impl Reaction {
  fn finished(&mut self) {
    self.invalidate.extend(INSTANCE_PATTERNS);
    self.invalidate.extend(DEPLOY_PATTERNS);
    self.run = Some(INSTANCES);
  }
}

/// Ties the cache, the scheduler and the push channel together for the
/// current view.
///
/// Push messages invalidate the affected cache entries, reset the related
/// task to its base cadence and run it immediately. While the channel is unavailable `deployStatus`
/// is polled instead.
pub struct SyncCoordinator {
  scheduler: PollingScheduler,
  cache: CacheStore,
  channel: RealtimeChannel,
  follow: watch::Sender<Option<String>>,
  ui: mpsc::UnboundedSender<ChannelEvent>,
  profile: Option<String>,
  fallback: bool,
}

impl SyncCoordinator {
  pub fn new(
    scheduler: PollingScheduler,
    cache: CacheStore,
    channel: RealtimeChannel,
    follow: watch::Sender<Option<String>>,
    ui: mpsc::UnboundedSender<ChannelEvent>,
  ) -> Self {
    Self {
      scheduler,
      cache,
      channel,
      follow,
      ui,
      profile: None,
      fallback: false,
    }
  }

  /// Apply the polling profile for a view.
  pub fn enter_view(&mut self, profile: &str) -> bool {
    if !self.scheduler.apply_profile(profile) {
      return false;
    }
    self.profile = Some(profile.to_string());
    // Profiles stop tasks they do not list
    if self.fallback {
      self.start_fallback();
    }
    true
  }

  pub fn profile(&self) -> Option<&str> {
    self.profile.as_deref()
  }

  /// Follow a job over the push channel, or stop following with `None`.
  pub fn set_subscription(&mut self, key: Option<&str>) -> Result<()> {
    self.follow.send_replace(key.map(String::from));
    match key {
      Some(key) => self.channel.connect(key),
      None => {
        self.channel.disconnect();
        if self.fallback {
          self.fallback = false;
          self.scheduler.stop(DEPLOY_STATUS);
        }
        Ok(())
      }
    }
  }

  pub fn subscription(&self) -> Option<&str> {
    self.channel.subscription_key()
  }

  pub fn is_polling_fallback(&self) -> bool {
    self.fallback
  }

  /// React to a channel event and forward it to the console.
  pub fn handle_channel_event(&mut self, event: ChannelEvent) {
    match &event {
      ChannelEvent::Connected { key } => {
        info!(key = %key, "push channel connected");
        if self.fallback {
          info!("push channel back, stopping fallback polling");
          self.fallback = false;
        }
        self.scheduler.stop(DEPLOY_STATUS);
      }
      ChannelEvent::Disconnected(DisconnectReason::Exhausted) => {
        warn!("push channel unavailable, falling back to polling");
        self.fallback = true;
        self.start_fallback();
      }
      ChannelEvent::Disconnected(DisconnectReason::Manual) => {}
      ChannelEvent::Reconnecting { attempt } => debug!(attempt, "push channel reconnecting"),
      ChannelEvent::Message(message) => {
        let mut reaction = Reaction::default();
        dispatch(&mut reaction, message);

        for pattern in &reaction.invalidate {
          self.cache.invalidate_by_pattern(pattern);
        }
        if let Some(task) = reaction.run {
          debug!(kind = message.kind(), task, "push message triggers refresh");
          // Pushed data means the task is live again, whatever its backoff said
          self.scheduler.reset_backoff(task);
          let scheduler = self.scheduler.clone();
          tokio::spawn(async move {
            scheduler.run_now(task).await;
          });
        }
      }
    }

    let _ = self.ui.send(event);
  }

  fn start_fallback(&self) {
    self
      .scheduler
      .start(DEPLOY_STATUS, Some(TaskOverride::interval(FALLBACK_INTERVAL)));
  }
}
