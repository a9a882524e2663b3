use crate::api::DownloadTask;
use crate::realtime::LogLevel;
use crate::ui::renderfns::{log_color, progress_bar};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use std::collections::VecDeque;

pub fn draw_download(
  frame: &mut Frame,
  area: Rect,
  job: Option<&str>,
  download: Option<&DownloadTask>,
  log: &VecDeque<(LogLevel, String)>,
) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([Constraint::Length(5), Constraint::Min(3)])
    .split(area);

  let title = match job {
    Some(job) => format!(" Download {} ", job),
    None => " Download ".to_string(),
  };
  let block = Block::default()
    .title(title)
    .title_alignment(Alignment::Center)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let content = match (job, download) {
    (None, _) => vec![Line::styled(
      "Not following a job. Use :follow <id>.",
      Style::default().fg(Color::DarkGray),
    )],
    (Some(_), None) => vec![Line::styled(
      "Waiting for status...",
      Style::default().fg(Color::DarkGray),
    )],
    (Some(_), Some(download)) => {
      let counts = match (download.current, download.total) {
        (Some(current), Some(total)) => format!("  {}/{}", current, total),
        _ => String::new(),
      };
      vec![
        Line::from(vec![
          Span::raw(progress_bar(download.progress, 40)),
          Span::styled(
            format!(" {:>3}%{}", download.progress, counts),
            Style::default().fg(Color::Cyan),
          ),
        ]),
        Line::from(vec![
          Span::styled(
            format!("{} ", download.status),
            Style::default().fg(Color::Yellow),
          ),
          Span::raw(download.message.clone()),
        ]),
      ]
    }
  };
  frame.render_widget(Paragraph::new(content).block(block), chunks[0]);

  let log_block = Block::default()
    .title(" Log ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  // Keep the newest lines in view
  let visible = chunks[1].height.saturating_sub(2) as usize;
  let lines: Vec<Line> = log
    .iter()
    .skip(log.len().saturating_sub(visible))
    .map(|(level, text)| Line::styled(text.clone(), Style::default().fg(log_color(*level))))
    .collect();

  let paragraph = Paragraph::new(lines)
    .block(log_block)
    .wrap(Wrap { trim: false });
  frame.render_widget(paragraph, chunks[1]);
}
