use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod connectivity;
mod handler;
mod ollama;
mod stream;
#[cfg(test)]
mod test_server;
mod transcript;
mod tui;
mod ui;

use app::App;
use config::Config;
use tui::{EventHandler, Tui};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = init_logging() {
        eprintln!("chatllama: logging disabled: {}", e);
    }

    let config = Config::load();
    info!("starting against {} ({:?} endpoint)", config.base_url, config.endpoint);

    let mut events = EventHandler::new();
    let mut app = App::new(config, events.sender());
    match Config::path() {
        Ok(path) => app = app.with_config_path(path),
        Err(e) => warn!("model switches will not be saved: {}", e),
    }
    app.start_model_listing();

    let probe_interval = Duration::from_secs(app.config.probe_interval_secs.max(1));
    let monitor = connectivity::spawn_monitor(app.ollama.clone(), probe_interval, events.sender());

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let result = run(&mut terminal, &mut app, &mut events).await;

    app.cancel_stream();
    monitor.abort();
    tui::restore()?;
    info!("exiting");

    result
}

async fn run(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

/// Send tracing output to a log file; the terminal belongs to the UI.
fn init_logging() -> Result<()> {
    let path = Config::log_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_env("CHATLLAMA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
