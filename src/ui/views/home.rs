use crate::api::{Instance, InstanceStatus, SystemStats};
use crate::polling::TaskState;
use crate::ui::renderfns::{format_interval, progress_bar, task_state_color};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use std::time::Duration;

pub fn draw_home(
  frame: &mut Frame,
  area: Rect,
  instances: &[Instance],
  stats: Option<&SystemStats>,
  tasks: &[(String, TaskState, Duration)],
) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
    .split(area);

  draw_overview(frame, chunks[0], instances, stats);
  draw_tasks(frame, chunks[1], tasks);
}

fn draw_overview(
  frame: &mut Frame,
  area: Rect,
  instances: &[Instance],
  stats: Option<&SystemStats>,
) {
  let block = Block::default()
    .title(" Overview ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let running = instances
    .iter()
    .filter(|i| i.status == InstanceStatus::Running)
    .count();
  let failed = instances
    .iter()
    .filter(|i| i.status == InstanceStatus::Error)
    .count();

  let mut lines = vec![
    Line::from(vec![
      Span::styled("Instances  ", Style::default().fg(Color::DarkGray)),
      Span::raw(format!("{} total, ", instances.len())),
      Span::styled(format!("{} running", running), Style::default().fg(Color::Green)),
      Span::raw(", "),
      Span::styled(format!("{} failed", failed), Style::default().fg(Color::Red)),
    ]),
    Line::raw(""),
  ];

  match stats {
    Some(stats) => {
      let cpu = stats.cpu_usage_percent.round() as i64;
      let memory = stats.memory_usage.percent.round() as i64;
      lines.push(Line::from(vec![
        Span::styled("CPU        ", Style::default().fg(Color::DarkGray)),
        Span::raw(format!("{} {:>3}%", progress_bar(cpu, 20), cpu)),
      ]));
      lines.push(Line::from(vec![
        Span::styled("Memory     ", Style::default().fg(Color::DarkGray)),
        Span::raw(format!(
          "{} {:>3}%  ({:.0} / {:.0} MB)",
          progress_bar(memory, 20),
          memory,
          stats.memory_usage.used_mb,
          stats.memory_usage.total_mb
        )),
      ]));
      if let Some(disk) = stats.disk_usage_percent {
        let disk = disk.round() as i64;
        lines.push(Line::from(vec![
          Span::styled("Disk       ", Style::default().fg(Color::DarkGray)),
          Span::raw(format!("{} {:>3}%", progress_bar(disk, 20), disk)),
        ]));
      }
    }
    None => lines.push(Line::styled(
      "Waiting for system metrics...",
      Style::default().fg(Color::DarkGray),
    )),
  }

  frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_tasks(frame: &mut Frame, area: Rect, tasks: &[(String, TaskState, Duration)]) {
  let block = Block::default()
    .title(" Refresh ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let lines: Vec<Line> = tasks
    .iter()
    .map(|(name, state, interval)| {
      Line::from(vec![
        Span::raw(format!("{:<14}", name)),
        Span::styled(
          format!("{:<10}", format!("{:?}", state).to_lowercase()),
          Style::default().fg(task_state_color(*state)),
        ),
        Span::styled(format_interval(*interval), Style::default().fg(Color::DarkGray)),
      ])
    })
    .collect();

  frame.render_widget(Paragraph::new(lines).block(block), area);
}
