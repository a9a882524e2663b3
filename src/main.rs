mod api;
mod app;
mod cache;
mod commands;
mod config;
mod event;
mod logging;
mod polling;
mod realtime;
mod sync;
mod ui;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "botdeck")]
#[command(about = "A terminal console for managing chatbot instances")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/botdeck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL of the bot runtime API
  #[arg(short, long)]
  api_url: Option<String>,

  /// Follow a download job from startup
  #[arg(short, long)]
  follow: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override API URL if specified on command line
  if let Some(url) = args.api_url {
    config.api.url = url;
  }

  let _log_guard = logging::init(&config::Config::data_dir())?;
  tracing::info!(api = %config.api.url, "starting botdeck");

  // Initialize and run the app
  let mut app = app::App::new(config, args.follow)?;
  app.run().await?;

  Ok(())
}
