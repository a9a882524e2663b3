use crate::app::ChannelStatus;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Draw the header bar with logo, context, channel health and shortcuts
pub fn draw_header(frame: &mut Frame, area: Rect, title: &str, channel: &ChannelStatus) {
  let (channel_label, channel_color) = channel_label(channel);

  let header = Line::from(vec![
    Span::styled(" botdeck ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", title), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", channel_label),
      Style::default().fg(channel_color).bold(),
    ),
    Span::raw("  "),
    // Shortcuts - keys and brackets highlighted, descriptions dimmed
    Span::styled("<1-3>", Style::default().fg(Color::Cyan)),
    Span::styled(" views", Style::default().fg(Color::DarkGray)),
    Span::raw("   "),
    Span::styled("<:>", Style::default().fg(Color::Cyan)),
    Span::styled(" command", Style::default().fg(Color::DarkGray)),
    Span::raw("   "),
    Span::styled("<r>", Style::default().fg(Color::Cyan)),
    Span::styled(" refresh", Style::default().fg(Color::DarkGray)),
    Span::raw("   "),
    Span::styled("<q>", Style::default().fg(Color::Cyan)),
    Span::styled(" quit", Style::default().fg(Color::DarkGray)),
  ]);

  let paragraph = Paragraph::new(header).style(Style::default().bg(Color::Black));

  frame.render_widget(paragraph, area);
}

fn channel_label(channel: &ChannelStatus) -> (String, Color) {
  match channel {
    ChannelStatus::Idle => ("push: off".to_string(), Color::DarkGray),
    ChannelStatus::Live => ("push: live".to_string(), Color::Green),
    ChannelStatus::Reconnecting(attempt) => (format!("push: retry {}", attempt), Color::Yellow),
    ChannelStatus::Polling => ("push: down, polling".to_string(), Color::Red),
  }
}

/// Extract host from an API URL
pub fn extract_domain(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_domain() {
    assert_eq!(extract_domain("https://bots.example.com"), "bots.example.com");
    assert_eq!(
      extract_domain("https://bots.example.com/console"),
      "bots.example.com"
    );
    assert_eq!(extract_domain("http://localhost:8095"), "localhost:8095");
  }

  #[test]
  fn test_channel_label() {
    assert_eq!(channel_label(&ChannelStatus::Reconnecting(2)).0, "push: retry 2");
    assert_eq!(channel_label(&ChannelStatus::Polling).1, Color::Red);
  }
}
