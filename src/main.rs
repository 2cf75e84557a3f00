use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use till::app::{self, App};
use till::config::Config;
use till::logging;

#[derive(Parser, Debug)]
#[command(name = "till")]
#[command(about = "Offline-first point-of-sale client runtime")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./till.yaml, then $XDG_CONFIG_HOME/till/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the client with an interactive console (default)
  Run,
  /// Replay queued offline changes now
  Sync,
  /// Show how many changes are waiting to sync
  Pending,
  /// Queue a change for later replay
  Enqueue {
    /// Entity type, e.g. "sales"
    entity: String,
    /// JSON payload
    payload: String,
  },
  /// Manage the local response cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Delete every cached response (queued changes are kept)
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging, args.verbose)?;

  let mut app = App::new(config)?;

  let command = args.command.unwrap_or(Command::Run);
  if !matches!(command, Command::Run) {
    // One-shot commands skip install but still drop outdated cache versions.
    app.cache().activate();
  }

  match command {
    Command::Run => app.run().await?,
    Command::Sync => {
      let reports = app.sync_now().await;
      app::print_reports(&reports);
    }
    Command::Pending => app::print_pending(&app.pending_summary()?),
    Command::Enqueue { entity, payload } => {
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Invalid JSON payload: {}", e))?;
      if !app.queue().is_durable() {
        return Err(eyre!("No local store available; cannot queue changes"));
      }
      let id = app.queue().enqueue(&entity, payload)?;
      println!("queued {} as {}", entity, id);
    }
    Command::Cache {
      action: CacheAction::Clear,
    } => {
      let removed = app.cache().clear()?;
      println!("removed {} cache namespace(s)", removed);
    }
  }

  Ok(())
}
