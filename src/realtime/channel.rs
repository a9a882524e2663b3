//! Push channel with bounded reconnect.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::message::{decode, RealtimeMessage};
use super::transport::{Connection, Frame, Transport, CLOSE_NORMAL};

#[derive(Debug, Clone)]
pub struct ChannelConfig {
  /// Base URL of the HTTP API; its scheme selects `ws` or `wss`
  pub base_url: Url,
  /// Path segment after `/api/v1/ws/`
  pub resource: String,
  /// Retries after the initial attempt
  pub reconnect_attempts: u32,
  pub reconnect_delay: Duration,
}

impl ChannelConfig {
  pub fn new(base_url: Url, resource: &str) -> Self {
    Self {
      base_url,
      resource: resource.to_string(),
      reconnect_attempts: 3,
      reconnect_delay: Duration::from_secs(2),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Connecting,
  Open,
  Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
  /// Every reconnect attempt failed
  Exhausted,
  /// `disconnect` was called
  Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
  Connected { key: String },
  Reconnecting { attempt: u32 },
  Message(RealtimeMessage),
  Disconnected(DisconnectReason),
}

/// Push endpoint URL for a subscription key.
pub fn endpoint_url(base: &Url, resource: &str, key: &str) -> Result<Url> {
  let mut url = base.clone();
  let scheme = match base.scheme() {
    "https" | "wss" => "wss",
    "http" | "ws" => "ws",
    other => return Err(eyre!("Unsupported API URL scheme: {}", other)),
  };
  url
    .set_scheme(scheme)
    .map_err(|_| eyre!("Cannot use {} with {}", scheme, base))?;
  url
    .path_segments_mut()
    .map_err(|_| eyre!("API URL cannot have a path: {}", base))?
    .clear()
    .extend(["api", "v1", "ws", resource, key]);
  url.set_query(None);
  url.set_fragment(None);
  Ok(url)
}

struct Shared {
  state: ConnectionState,
  outgoing: Option<mpsc::UnboundedSender<Frame>>,
  reconnect_attempts: u32,
}

struct Session {
  key: String,
  shared: Arc<Mutex<Shared>>,
  close: watch::Sender<bool>,
  _worker: JoinHandle<()>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
  shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A realtime subscription.
///
/// At most one connection is live at a time. Connection lifecycle and
/// decoded messages are reported as [`ChannelEvent`]s on the sender given to
/// [`RealtimeChannel::new`]; exactly one `Disconnected` event ends each
/// session.
pub struct RealtimeChannel {
  config: ChannelConfig,
  transport: Arc<dyn Transport>,
  events: mpsc::UnboundedSender<ChannelEvent>,
  session: Option<Session>,
}

impl RealtimeChannel {
  pub fn new(
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<ChannelEvent>,
  ) -> Self {
    Self {
      config,
      transport,
      events,
      session: None,
    }
  }

  /// Subscribe to `key`. No-op while already connecting to or connected to
  /// the same key; any other session is closed first.
  pub fn connect(&mut self, key: &str) -> Result<()> {
    if let Some(session) = &self.session {
      let state = lock(&session.shared).state;
      if session.key == key && state != ConnectionState::Closed {
        debug!(key, "already subscribed");
        return Ok(());
      }
    }
    self.disconnect();

    let url = endpoint_url(&self.config.base_url, &self.config.resource, key)?;
    let shared = Arc::new(Mutex::new(Shared {
      state: ConnectionState::Connecting,
      outgoing: None,
      reconnect_attempts: 0,
    }));
    let (close, close_rx) = watch::channel(false);

    info!(%url, "opening realtime channel");
    let worker = tokio::spawn(run_session(
      key.to_string(),
      url,
      self.transport.clone(),
      shared.clone(),
      self.events.clone(),
      close_rx,
      self.config.reconnect_attempts,
      self.config.reconnect_delay,
    ));

    self.session = Some(Session {
      key: key.to_string(),
      shared,
      close,
      _worker: worker,
    });
    Ok(())
  }

  /// Close the session for good. Cancels any pending reconnect and emits
  /// `Disconnected(Manual)` unless the session had already ended.
  pub fn disconnect(&mut self) {
    let Some(session) = self.session.take() else {
      return;
    };

    let was_live = {
      let mut shared = lock(&session.shared);
      let was_live = shared.state != ConnectionState::Closed;
      shared.state = ConnectionState::Closed;
      if let Some(outgoing) = shared.outgoing.take() {
        let _ = outgoing.send(Frame::Close(Some(CLOSE_NORMAL)));
      }
      was_live
    };
    let _ = session.close.send(true);

    if was_live {
      info!(key = %session.key, "realtime channel closed");
      let _ = self
        .events
        .send(ChannelEvent::Disconnected(DisconnectReason::Manual));
    }
  }

  /// Send a JSON payload. Returns false when there is no open connection.
  pub fn send_message<T: Serialize>(&self, payload: &T) -> bool {
    let Some(session) = &self.session else {
      warn!("cannot send on realtime channel: not connected");
      return false;
    };
    let shared = lock(&session.shared);
    let Some(outgoing) = shared
      .outgoing
      .as_ref()
      .filter(|_| shared.state == ConnectionState::Open)
    else {
      warn!(key = %session.key, "cannot send on realtime channel: not open");
      return false;
    };

    match serde_json::to_string(payload) {
      Ok(text) => outgoing.send(Frame::Text(text)).is_ok(),
      Err(e) => {
        warn!(error = %e, "failed to encode realtime payload");
        false
      }
    }
  }

  #[allow(dead_code)]
  pub fn state(&self) -> ConnectionState {
    self
      .session
      .as_ref()
      .map(|s| lock(&s.shared).state)
      .unwrap_or(ConnectionState::Closed)
  }

  pub fn subscription_key(&self) -> Option<&str> {
    self.session.as_ref().map(|s| s.key.as_str())
  }

  pub fn reconnect_attempts(&self) -> u32 {
    self
      .session
      .as_ref()
      .map(|s| lock(&s.shared).reconnect_attempts)
      .unwrap_or(0)
  }
}

impl Drop for RealtimeChannel {
  fn drop(&mut self) {
    self.disconnect();
  }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
  key: String,
  url: Url,
  transport: Arc<dyn Transport>,
  shared: Arc<Mutex<Shared>>,
  events: mpsc::UnboundedSender<ChannelEvent>,
  mut close: watch::Receiver<bool>,
  max_attempts: u32,
  delay: Duration,
) {
  let mut attempt = 0u32;

  loop {
    if *close.borrow() {
      return;
    }
    lock(&shared).state = ConnectionState::Connecting;

    let opened = tokio::select! {
      opened = transport.open(&url) => opened,
      _ = close.changed() => return,
    };

    match opened {
      Ok(connection) => {
        attempt = 0;
        {
          let mut state = lock(&shared);
          if state.state == ConnectionState::Closed {
            return;
          }
          state.state = ConnectionState::Open;
          state.reconnect_attempts = 0;
          state.outgoing = Some(connection.outgoing.clone());
        }
        info!(%url, "realtime channel open");
        let _ = events.send(ChannelEvent::Connected { key: key.clone() });

        if !pump(connection, &events, &mut close).await {
          return;
        }

        let mut state = lock(&shared);
        state.outgoing = None;
        if state.state == ConnectionState::Closed {
          return;
        }
        warn!(%url, "realtime channel closed unexpectedly");
      }
      Err(e) => warn!(%url, error = %e, "failed to open realtime channel"),
    }

    // A concurrent `disconnect` owns the final event once it marks the
    // session closed
    if attempt >= max_attempts {
      {
        let mut state = lock(&shared);
        if state.state == ConnectionState::Closed {
          return;
        }
        state.state = ConnectionState::Closed;
      }
      warn!(%url, attempts = attempt, "giving up on realtime channel");
      let _ = events.send(ChannelEvent::Disconnected(DisconnectReason::Exhausted));
      return;
    }

    attempt += 1;
    {
      let mut state = lock(&shared);
      if state.state == ConnectionState::Closed {
        return;
      }
      state.reconnect_attempts = attempt;
    }
    info!(attempt, ?delay, "reconnecting realtime channel");
    let _ = events.send(ChannelEvent::Reconnecting { attempt });

    tokio::select! {
      _ = tokio::time::sleep(delay) => {}
      _ = close.changed() => return,
    }
  }
}

/// Forward inbound frames until the connection ends. Returns false when the
/// session was closed locally.
async fn pump(
  connection: Connection,
  events: &mpsc::UnboundedSender<ChannelEvent>,
  close: &mut watch::Receiver<bool>,
) -> bool {
  let Connection {
    outgoing,
    mut incoming,
  } = connection;

  loop {
    tokio::select! {
      frame = incoming.recv() => match frame {
        Some(Frame::Text(text)) => match decode(&text) {
          Ok(Some(message)) => {
            let _ = events.send(ChannelEvent::Message(message));
          }
          Ok(None) => {}
          Err(e) => warn!(error = %e, "dropping realtime frame"),
        },
        Some(Frame::Close(code)) => {
          debug!(?code, "peer closed realtime channel");
          return true;
        }
        None => return true,
      },
      _ = close.changed() => {
        let _ = outgoing.send(Frame::Close(Some(CLOSE_NORMAL)));
        return false;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::realtime::message::Payload;
  use crate::realtime::transport::testing::MemoryTransport;

  fn config() -> ChannelConfig {
    ChannelConfig {
      base_url: Url::parse("http://localhost:8095").unwrap(),
      resource: "downloads".to_string(),
      reconnect_attempts: 3,
      reconnect_delay: Duration::from_millis(500),
    }
  }

  fn drain(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Vec<ChannelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
      events.push(event);
    }
    events
  }

  #[test]
  fn test_endpoint_url() {
    let http = Url::parse("http://localhost:8095/console/").unwrap();
    assert_eq!(
      endpoint_url(&http, "downloads", "task-1").unwrap().as_str(),
      "ws://localhost:8095/api/v1/ws/downloads/task-1"
    );

    let https = Url::parse("https://bots.example.com?x=1").unwrap();
    assert_eq!(
      endpoint_url(&https, "downloads", "a b").unwrap().as_str(),
      "wss://bots.example.com/api/v1/ws/downloads/a%20b"
    );

    let ftp = Url::parse("ftp://example.com").unwrap();
    assert!(endpoint_url(&ftp, "downloads", "k").is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconnect_is_bounded() {
    let (transport, _servers) = MemoryTransport::new(false);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = RealtimeChannel::new(config(), Arc::new(transport.clone()), tx);

    channel.connect("task-1").unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    // Initial attempt plus three retries
    assert_eq!(transport.attempts(), 4);
    assert_eq!(channel.state(), ConnectionState::Closed);

    let events = drain(&mut rx);
    let disconnects: Vec<_> = events
      .iter()
      .filter(|e| matches!(e, ChannelEvent::Disconnected(_)))
      .collect();
    assert_eq!(
      disconnects,
      vec![&ChannelEvent::Disconnected(DisconnectReason::Exhausted)]
    );
    assert_eq!(
      events
        .iter()
        .filter(|e| matches!(e, ChannelEvent::Reconnecting { .. }))
        .count(),
      3
    );

    // Already ended, so no second disconnect event
    channel.disconnect();
    assert!(drain(&mut rx).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_messages_and_manual_close() {
    let (transport, mut servers) = MemoryTransport::new(true);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = RealtimeChannel::new(config(), Arc::new(transport), tx);

    channel.connect("task-1").unwrap();
    let mut server = servers.recv().await.unwrap();
    assert_eq!(server.url.path(), "/api/v1/ws/downloads/task-1");

    assert_eq!(
      rx.recv().await.unwrap(),
      ChannelEvent::Connected {
        key: "task-1".to_string()
      }
    );
    assert_eq!(channel.state(), ConnectionState::Open);

    // Same key is a no-op
    channel.connect("task-1").unwrap();

    server
      .to_client
      .send(Frame::Text("garbage".to_string()))
      .unwrap();
    server
      .to_client
      .send(Frame::Text(
        r#"{"type":"complete","message":"done","timestamp":"t"}"#.to_string(),
      ))
      .unwrap();
    match rx.recv().await.unwrap() {
      ChannelEvent::Message(message) => assert_eq!(
        message.payload,
        Payload::Complete {
          message: "done".to_string()
        }
      ),
      other => panic!("unexpected event {:?}", other),
    }

    assert!(channel.send_message(&serde_json::json!({"type": "ping"})));
    assert_eq!(
      server.from_client.recv().await.unwrap(),
      Frame::Text(r#"{"type":"ping"}"#.to_string())
    );

    channel.disconnect();
    assert_eq!(
      server.from_client.recv().await.unwrap(),
      Frame::Close(Some(CLOSE_NORMAL))
    );
    assert_eq!(
      rx.recv().await.unwrap(),
      ChannelEvent::Disconnected(DisconnectReason::Manual)
    );
    assert!(!channel.send_message(&"late"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(drain(&mut rx).is_empty());
    assert!(servers.try_recv().is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconnects_after_unexpected_close() {
    let (transport, mut servers) = MemoryTransport::new(true);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = RealtimeChannel::new(config(), Arc::new(transport.clone()), tx);

    channel.connect("task-1").unwrap();
    let server = servers.recv().await.unwrap();
    assert!(matches!(rx.recv().await, Some(ChannelEvent::Connected { .. })));

    server.to_client.send(Frame::Close(Some(1006))).unwrap();
    assert_eq!(
      rx.recv().await.unwrap(),
      ChannelEvent::Reconnecting { attempt: 1 }
    );

    let _server = servers.recv().await.unwrap();
    assert!(matches!(rx.recv().await, Some(ChannelEvent::Connected { .. })));
    assert_eq!(channel.reconnect_attempts(), 0);
    assert_eq!(transport.attempts(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_switching_keys_closes_previous_session() {
    let (transport, mut servers) = MemoryTransport::new(true);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = RealtimeChannel::new(config(), Arc::new(transport), tx);

    channel.connect("task-1").unwrap();
    let mut first = servers.recv().await.unwrap();
    rx.recv().await.unwrap();

    channel.connect("task-2").unwrap();
    assert_eq!(
      first.from_client.recv().await.unwrap(),
      Frame::Close(Some(CLOSE_NORMAL))
    );
    assert_eq!(
      rx.recv().await.unwrap(),
      ChannelEvent::Disconnected(DisconnectReason::Manual)
    );

    let second = servers.recv().await.unwrap();
    assert_eq!(second.url.path(), "/api/v1/ws/downloads/task-2");
    assert_eq!(channel.subscription_key(), Some("task-2"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_teardown_cancels_pending_reconnect() {
    let (transport, mut servers) = MemoryTransport::new(false);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = RealtimeChannel::new(config(), Arc::new(transport.clone()), tx);

    channel.connect("task-1").unwrap();
    assert_eq!(
      rx.recv().await.unwrap(),
      ChannelEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(transport.attempts(), 1);

    // The server comes back, but the session is gone before the retry
    transport.set_accept(true);
    drop(channel);
    assert_eq!(
      rx.recv().await.unwrap(),
      ChannelEvent::Disconnected(DisconnectReason::Manual)
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.attempts(), 1);
    assert!(servers.try_recv().is_err());
    assert!(drain(&mut rx).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_disconnect_while_retrying_emits_only_manual() {
    let (transport, _servers) = MemoryTransport::new(false);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = RealtimeChannel::new(config(), Arc::new(transport.clone()), tx);

    channel.connect("task-1").unwrap();
    for attempt in 1..=3 {
      assert_eq!(
        rx.recv().await.unwrap(),
        ChannelEvent::Reconnecting { attempt }
      );
    }
    channel.disconnect();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
      drain(&mut rx),
      vec![ChannelEvent::Disconnected(DisconnectReason::Manual)]
    );
    assert_eq!(transport.attempts(), 3);
  }
}
