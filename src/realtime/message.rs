//! Wire format of push messages.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One decoded push frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeMessage {
  pub timestamp: String,
  #[serde(flatten)]
  pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
  Log { level: LogLevel, message: String },
  Progress(Progress),
  Status { status: String, message: String },
  Error { message: String },
  Complete { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Info,
  Success,
  Warning,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
  pub current: i64,
  pub total: i64,
  pub percentage: i64,
  pub message: String,
  pub status: String,
}

const KNOWN_TYPES: [&str; 5] = ["log", "progress", "status", "error", "complete"];

impl RealtimeMessage {
  /// Build a message stamped with the current time.
  pub fn now(payload: Payload) -> Self {
    Self {
      timestamp: chrono::Utc::now().to_rfc3339(),
      payload,
    }
  }

  /// Short name of the message type, as it appears on the wire.
  pub fn kind(&self) -> &'static str {
    match self.payload {
      Payload::Log { .. } => "log",
      Payload::Progress(_) => "progress",
      Payload::Status { .. } => "status",
      Payload::Error { .. } => "error",
      Payload::Complete { .. } => "complete",
    }
  }
}

/// Decode a text frame.
///
/// Returns `Ok(None)` for well-formed JSON with a type this client does not
/// know, and an error for anything else that does not decode.
pub fn decode(text: &str) -> Result<Option<RealtimeMessage>> {
  let value: serde_json::Value =
    serde_json::from_str(text).map_err(|e| eyre!("Malformed push frame: {}", e))?;

  let kind = value
    .get("type")
    .and_then(|t| t.as_str())
    .ok_or_else(|| eyre!("Push frame has no type"))?
    .to_string();

  if !KNOWN_TYPES.contains(&kind.as_str()) {
    debug!(%kind, "ignoring push message of unknown type");
    return Ok(None);
  }

  let message = serde_json::from_value(value)
    .map_err(|e| eyre!("Invalid {} push message: {}", kind, e))?;
  Ok(Some(message))
}

/// Receiver of decoded messages. Every method defaults to doing nothing.
pub trait MessageHandler {
  fn on_log(&mut self, _level: LogLevel, _message: &str) {}
  fn on_progress(&mut self, _progress: &Progress) {}
  fn on_status(&mut self, _status: &str, _message: &str) {}
  fn on_error(&mut self, _message: &str) {}
  fn on_complete(&mut self, _message: &str) {}
}

/// Route a message to the matching handler method.
pub fn dispatch<H: MessageHandler + ?Sized>(handler: &mut H, message: &RealtimeMessage) {
  match &message.payload {
    Payload::Log { level, message } => handler.on_log(*level, message),
    Payload::Progress(progress) => handler.on_progress(progress),
    Payload::Status { status, message } => handler.on_status(status, message),
    Payload::Error { message } => handler.on_error(message),
    Payload::Complete { message } => handler.on_complete(message),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decode_every_variant() {
    let progress = decode(
      r#"{"type":"progress","current":3,"total":10,"percentage":30,"message":"downloading","status":"running","timestamp":"2024-01-01T00:00:00Z"}"#,
    )
    .unwrap()
    .unwrap();
    assert_eq!(progress.timestamp, "2024-01-01T00:00:00Z");
    assert_eq!(
      progress.payload,
      Payload::Progress(Progress {
        current: 3,
        total: 10,
        percentage: 30,
        message: "downloading".to_string(),
        status: "running".to_string(),
      })
    );

    let log = decode(r#"{"type":"log","level":"warning","message":"slow mirror","timestamp":"t"}"#)
      .unwrap()
      .unwrap();
    assert_eq!(
      log.payload,
      Payload::Log {
        level: LogLevel::Warning,
        message: "slow mirror".to_string()
      }
    );

    let status = decode(r#"{"type":"status","status":"installing","message":"m","timestamp":"t"}"#)
      .unwrap()
      .unwrap();
    assert_eq!(status.kind(), "status");

    let error = decode(r#"{"type":"error","message":"disk full","timestamp":"t"}"#)
      .unwrap()
      .unwrap();
    assert_eq!(
      error.payload,
      Payload::Error {
        message: "disk full".to_string()
      }
    );

    let complete = decode(r#"{"type":"complete","message":"done","timestamp":"t"}"#)
      .unwrap()
      .unwrap();
    assert_eq!(complete.kind(), "complete");
  }

  #[test]
  fn test_decode_unknown_and_malformed() {
    assert_eq!(decode(r#"{"type":"heartbeat","timestamp":"t"}"#).unwrap(), None);
    assert!(decode("not json").is_err());
    assert!(decode(r#"{"message":"no type"}"#).is_err());
    // Known type missing a required field
    assert!(decode(r#"{"type":"progress","timestamp":"t"}"#).is_err());
  }

  #[test]
  fn test_wire_shape() {
    let message = RealtimeMessage {
      timestamp: "t".to_string(),
      payload: Payload::Status {
        status: "ready".to_string(),
        message: "ok".to_string(),
      },
    };
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(
      value,
      serde_json::json!({"type": "status", "status": "ready", "message": "ok", "timestamp": "t"})
    );
  }

  #[derive(Default)]
  struct Recorder {
    seen: Vec<String>,
  }

  impl MessageHandler for Recorder {
    fn on_progress(&mut self, progress: &Progress) {
      self.seen.push(format!("progress {}", progress.percentage));
    }

    fn on_complete(&mut self, message: &str) {
      self.seen.push(format!("complete {}", message));
    }
  }

  #[test]
  fn test_dispatch_routes_by_type() {
    let mut recorder = Recorder::default();
    let messages = [
      RealtimeMessage::now(Payload::Progress(Progress {
        current: 1,
        total: 2,
        percentage: 50,
        message: String::new(),
        status: "running".to_string(),
      })),
      RealtimeMessage::now(Payload::Error {
        message: "ignored by recorder".to_string(),
      }),
      RealtimeMessage::now(Payload::Complete {
        message: "done".to_string(),
      }),
    ];
    for message in &messages {
      dispatch(&mut recorder, message);
    }
    assert_eq!(recorder.seen, vec!["progress 50", "complete done"]);
  }
}
