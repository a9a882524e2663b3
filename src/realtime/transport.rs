//! Frame transports behind a realtime channel.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

/// Normal closure code.
pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
  Text(String),
  Close(Option<u16>),
}

/// An open connection. Dropping `outgoing` closes it; `incoming` ends with
/// `None` (or a `Close` frame) when the peer goes away.
pub struct Connection {
  pub outgoing: mpsc::UnboundedSender<Frame>,
  pub incoming: mpsc::UnboundedReceiver<Frame>,
}

pub trait Transport: Send + Sync + 'static {
  fn open(&self, url: &Url) -> BoxFuture<'static, Result<Connection>>;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
  fn open(&self, url: &Url) -> BoxFuture<'static, Result<Connection>> {
    let url = url.to_string();
    async move {
      let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| eyre!("Failed to connect to {}: {}", url, e))?;
      debug!(%url, "websocket connected");

      let (mut sink, mut stream) = socket.split();
      let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Frame>();
      let (incoming_tx, incoming) = mpsc::unbounded_channel::<Frame>();

      tokio::spawn(async move {
        while let Some(frame) = outgoing_rx.recv().await {
          let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Close(code) => Message::Close(code.map(|code| CloseFrame {
              code: CloseCode::from(code),
              reason: Cow::Borrowed(""),
            })),
          };
          let closing = matches!(message, Message::Close(_));
          if let Err(e) = sink.send(message).await {
            debug!(error = %e, "websocket send failed");
            return;
          }
          if closing {
            return;
          }
        }
        // Every sender dropped
        let _ = sink
          .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed(""),
          })))
          .await;
      });

      tokio::spawn(async move {
        while let Some(message) = stream.next().await {
          let frame = match message {
            Ok(Message::Text(text)) => Frame::Text(text),
            Ok(Message::Close(close)) => {
              let _ = incoming_tx.send(Frame::Close(close.map(|c| u16::from(c.code))));
              return;
            }
            Ok(_) => continue,
            Err(e) => {
              warn!(error = %e, "websocket read failed");
              return;
            }
          };
          if incoming_tx.send(frame).is_err() {
            return;
          }
        }
      });

      Ok(Connection { outgoing, incoming })
    }
    .boxed()
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Arc;

  /// Server side of an in-memory connection.
  pub struct ServerEnd {
    pub url: Url,
    pub to_client: mpsc::UnboundedSender<Frame>,
    pub from_client: mpsc::UnboundedReceiver<Frame>,
  }

  /// In-memory transport that either refuses connections or hands the
  /// server end of each accepted connection to the test.
  #[derive(Clone)]
  pub struct MemoryTransport {
    accept: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    servers: mpsc::UnboundedSender<ServerEnd>,
  }

  impl MemoryTransport {
    pub fn new(accept: bool) -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
      let (servers, rx) = mpsc::unbounded_channel();
      (
        Self {
          accept: Arc::new(AtomicBool::new(accept)),
          attempts: Arc::new(AtomicUsize::new(0)),
          servers,
        },
        rx,
      )
    }

    pub fn set_accept(&self, accept: bool) {
      self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
      self.attempts.load(Ordering::SeqCst)
    }
  }

  impl Transport for MemoryTransport {
    fn open(&self, url: &Url) -> BoxFuture<'static, Result<Connection>> {
      self.attempts.fetch_add(1, Ordering::SeqCst);
      let accept = self.accept.load(Ordering::SeqCst);
      let servers = self.servers.clone();
      let url = url.clone();
      async move {
        if !accept {
          return Err(eyre!("connection refused: {}", url));
        }
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let _ = servers.send(ServerEnd {
          url,
          to_client,
          from_client,
        });
        Ok(Connection { outgoing, incoming })
      }
      .boxed()
    }
  }
}
