use crate::commands::Command;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph};

const MAX_SUGGESTIONS: usize = 8;

/// Popup rectangle anchored to the top-left of `area`, sized for the prompt
/// line plus up to `MAX_SUGGESTIONS` rows and never wider than the area.
fn popup_rect(area: Rect, rows: usize) -> Rect {
  let rows = rows.min(MAX_SUGGESTIONS) as u16;
  let height = (rows + 3).min(area.height.saturating_sub(1));
  let width = (area.width * 3 / 5)
    .clamp(30, 64)
    .min(area.width.saturating_sub(1));
  Rect::new(area.x + 1, area.y + 1, width, height)
}

fn suggestion_item(command: &Command) -> ListItem<'static> {
  let aliases = if command.aliases.is_empty() {
    String::new()
  } else {
    format!(" ({})", command.aliases.join(", "))
  };
  ListItem::new(Line::from(vec![
    Span::styled(format!("{:<10}", command.name), Style::default().fg(Color::Cyan)),
    Span::styled(command.description, Style::default().fg(Color::Gray)),
    Span::styled(aliases, Style::default().fg(Color::DarkGray)),
  ]))
}

/// Command prompt with autocomplete suggestions
pub fn draw_command_overlay(
  frame: &mut Frame,
  area: Rect,
  input: &str,
  suggestions: &[&Command],
  selected_suggestion: usize,
) {
  let popup = popup_rect(area, suggestions.len());
  frame.render_widget(Clear, popup);

  let block = Block::default()
    .title(" Command ")
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Yellow));
  let inner = block.inner(popup);
  frame.render_widget(block, popup);
  if inner.height == 0 {
    return;
  }

  let [prompt_area, list_area] =
    Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(inner);

  let prompt = Line::from(vec![
    Span::styled(":", Style::default().fg(Color::Yellow)),
    Span::raw(input.to_string()),
    Span::styled("_", Style::default().fg(Color::Yellow)),
  ]);
  frame.render_widget(Paragraph::new(prompt), prompt_area);

  if suggestions.is_empty() {
    if list_area.height > 0 {
      let hint = Paragraph::new("no matching command").style(Style::default().fg(Color::DarkGray));
      frame.render_widget(hint, list_area);
    }
    return;
  }
  if list_area.height == 0 {
    return;
  }

  let items: Vec<ListItem> = suggestions
    .iter()
    .take(MAX_SUGGESTIONS)
    .map(|command| suggestion_item(command))
    .collect();
  let list = List::new(items).highlight_style(Style::default().bg(Color::DarkGray).fg(Color::White));

  let mut state = ListState::default().with_selected(Some(selected_suggestion));
  frame.render_stateful_widget(list, list_area, &mut state);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_popup_fits_small_areas() {
    let area = Rect::new(0, 0, 20, 4);
    let popup = popup_rect(area, 12);
    assert_eq!(popup.height, 3);
    assert_eq!(popup.width, 19);
  }

  #[test]
  fn test_popup_caps_rows() {
    let area = Rect::new(0, 1, 200, 50);
    let popup = popup_rect(area, 20);
    assert_eq!(popup.height, MAX_SUGGESTIONS as u16 + 3);
    assert_eq!(popup.width, 64);
    assert_eq!((popup.x, popup.y), (1, 2));
  }
}
