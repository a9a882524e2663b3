use crate::api::InstanceStatus;
use crate::polling::TaskState;
use crate::realtime::LogLevel;
use ratatui::prelude::Color;
use std::time::Duration;

/// Truncate a string to a maximum number of characters, adding "..." if
/// truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Get the display color for an instance status
pub fn status_color(status: InstanceStatus) -> Color {
  match status {
    InstanceStatus::Running => Color::Green,
    InstanceStatus::Starting | InstanceStatus::Stopping => Color::Yellow,
    InstanceStatus::Error => Color::Red,
    InstanceStatus::Stopped | InstanceStatus::Unknown => Color::White,
  }
}

pub fn task_state_color(state: TaskState) -> Color {
  match state {
    TaskState::Running => Color::Green,
    TaskState::Suspended => Color::Yellow,
    TaskState::Disabled => Color::Red,
    TaskState::Idle => Color::DarkGray,
  }
}

pub fn log_color(level: LogLevel) -> Color {
  match level {
    LogLevel::Info => Color::White,
    LogLevel::Success => Color::Green,
    LogLevel::Warning => Color::Yellow,
    LogLevel::Error => Color::Red,
  }
}

/// Compact interval label: `500ms`, `10s`, `2m`
pub fn format_interval(interval: Duration) -> String {
  let ms = interval.as_millis();
  if ms < 1000 {
    format!("{}ms", ms)
  } else if ms % 60_000 == 0 {
    format!("{}m", ms / 60_000)
  } else if ms % 1000 == 0 {
    format!("{}s", ms / 1000)
  } else {
    format!("{:.1}s", interval.as_secs_f64())
  }
}

/// Text progress bar such as `[#####-----]`
pub fn progress_bar(percentage: i64, width: usize) -> String {
  let filled = (percentage.clamp(0, 100) as usize * width) / 100;
  format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("hello", 10), "hello");
  }

  #[test]
  fn test_truncate_exact_length() {
    assert_eq!(truncate("hello", 5), "hello");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("hello world", 8), "hello...");
  }

  #[test]
  fn test_truncate_multibyte() {
    assert_eq!(truncate("机器人实例管理", 5), "机器...");
  }

  #[test]
  fn test_status_color() {
    assert_eq!(status_color(InstanceStatus::Running), Color::Green);
    assert_eq!(status_color(InstanceStatus::Starting), Color::Yellow);
    assert_eq!(status_color(InstanceStatus::Error), Color::Red);
    assert_eq!(status_color(InstanceStatus::Stopped), Color::White);
  }

  #[test]
  fn test_format_interval() {
    assert_eq!(format_interval(Duration::from_millis(500)), "500ms");
    assert_eq!(format_interval(Duration::from_secs(10)), "10s");
    assert_eq!(format_interval(Duration::from_secs(120)), "2m");
    assert_eq!(format_interval(Duration::from_millis(2500)), "2.5s");
  }

  #[test]
  fn test_progress_bar() {
    assert_eq!(progress_bar(50, 10), "[#####-----]");
    assert_eq!(progress_bar(150, 4), "[####]");
    assert_eq!(progress_bar(-3, 4), "[----]");
  }
}
