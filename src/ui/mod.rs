mod renderfns;
mod views;

use crate::app::{App, Mode, Screen};
use ratatui::prelude::*;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Footer
    ])
    .split(frame.area());

  let title = app
    .title()
    .unwrap_or_else(|| renderfns::extract_domain(app.api_url()));
  renderfns::draw_header(frame, chunks[0], title, &app.data().channel);

  let data = app.data();
  match app.screen() {
    Screen::Home => views::home::draw_home(
      frame,
      chunks[1],
      &data.instances,
      data.stats.as_ref(),
      &app.task_states(),
    ),
    Screen::Instances => {
      views::instances::draw_instance_list(frame, chunks[1], &data.instances, app.selected())
    }
    Screen::Downloads => views::downloads::draw_download(
      frame,
      chunks[1],
      app.followed_job(),
      data.download.as_ref(),
      &data.log,
    ),
  }

  if *app.mode() == Mode::Command {
    renderfns::draw_command_overlay(
      frame,
      chunks[1],
      app.command_input(),
      &app.autocomplete_suggestions(),
      app.selected_suggestion(),
    );
  }

  renderfns::draw_footer(frame, chunks[2], &app.view_breadcrumb(), app.status());
}
