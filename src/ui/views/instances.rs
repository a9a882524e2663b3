use crate::api::Instance;
use crate::ui::renderfns::{status_color, truncate};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

pub fn draw_instance_list(frame: &mut Frame, area: Rect, instances: &[Instance], selected: usize) {
  let title = format!(" Instances ({}) ", instances.len());

  let block = Block::default()
    .title(title)
    .title_alignment(Alignment::Center)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  if instances.is_empty() {
    let paragraph = Paragraph::new("No instances. Press 'r' to refresh.")
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let items: Vec<ListItem> = instances
    .iter()
    .map(|instance| {
      let line = Line::from(vec![
        Span::styled(
          format!("{:<10}", truncate(&instance.id, 10)),
          Style::default().fg(Color::Cyan),
        ),
        Span::raw(" "),
        Span::styled(
          format!("{:<10}", instance.status.to_string()),
          Style::default().fg(status_color(instance.status)),
        ),
        Span::raw(" "),
        Span::raw(format!("{:<30}", truncate(&instance.name, 30))),
        Span::styled(
          format!(
            " {} {}",
            instance.bot_type,
            instance.version.as_deref().unwrap_or("")
          ),
          Style::default().fg(Color::DarkGray),
        ),
      ]);
      ListItem::new(line)
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

  let mut state = ListState::default();
  state.select(Some(selected.min(instances.len() - 1)));

  frame.render_stateful_widget(list, area, &mut state);
}
