use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::api::{DownloadTask, Instance, SystemStats};
use crate::polling::SchedulerEvent;
use crate::realtime::ChannelEvent;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Terminal gained (`true`) or lost (`false`) focus
  Focus(bool),
  /// Periodic tick for UI refresh
  Tick,
  /// Raw event from the push channel, handled by the sync coordinator
  Channel(ChannelEvent),
  /// Push event after the coordinator has acted on it
  Push(ChannelEvent),
  Scheduler(SchedulerEvent),
  Data(DataEvent),
  Error(String),
}

/// Data read from the cache for display
#[derive(Debug)]
pub enum DataEvent {
  Instances(Vec<Instance>),
  Stats(SystemStats),
  Download(Option<DownloadTask>),
  /// Result message of a start/stop request
  ActionDone(String),
}

/// Event handler that produces events from terminal input and a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let input_tx = tx.clone();

    // crossterm polling blocks, so keep it off the async workers
    tokio::task::spawn_blocking(move || loop {
      let event = if event::poll(tick_rate).unwrap_or(false) {
        match event::read() {
          Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => Event::Key(key),
          Ok(CrosstermEvent::FocusGained) => Event::Focus(true),
          Ok(CrosstermEvent::FocusLost) => Event::Focus(false),
          _ => continue,
        }
      } else {
        Event::Tick
      };
      if input_tx.send(event).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

/// Pump an mpsc receiver into the event queue.
pub fn forward<T, F>(mut rx: mpsc::UnboundedReceiver<T>, tx: mpsc::UnboundedSender<Event>, wrap: F)
where
  T: Send + 'static,
  F: Fn(T) -> Event + Send + 'static,
{
  tokio::spawn(async move {
    while let Some(item) = rx.recv().await {
      if tx.send(wrap(item)).is_err() {
        break;
      }
    }
  });
}

/// Pump scheduler notifications into the event queue.
pub fn forward_scheduler(
  mut rx: broadcast::Receiver<SchedulerEvent>,
  tx: mpsc::UnboundedSender<Event>,
) {
  tokio::spawn(async move {
    loop {
      match rx.recv().await {
        Ok(event) => {
          if tx.send(Event::Scheduler(event)).is_err() {
            break;
          }
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          tracing::debug!(skipped, "console lagged behind scheduler events");
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::polling::SchedulerEvent;

  #[tokio::test]
  async fn test_forward_wraps_items() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (item_tx, item_rx) = mpsc::unbounded_channel();
    forward(item_rx, tx, Event::Error);

    item_tx.send("boom".to_string()).unwrap();
    match rx.recv().await {
      Some(Event::Error(msg)) => assert_eq!(msg, "boom"),
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_forward_scheduler() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (events, events_rx) = broadcast::channel(4);
    forward_scheduler(events_rx, tx);

    events
      .send(SchedulerEvent::Executed {
        name: "instances".to_string(),
      })
      .unwrap();
    assert!(matches!(rx.recv().await, Some(Event::Scheduler(_))));
  }
}
