mod app;
mod config;
mod constants;
mod error;
mod input;
mod intake;
mod logging;
mod model;
mod paging;
mod reachability;
mod tmdb;
mod voice;
mod whisper;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use app::App;
use config::Config;
use constants::constants;
use reachability::{HttpProbeMonitor, ManualMonitor, ReachabilityMonitor};
use tmdb::TmdbClient;
use voice::{ScriptedSpeech, SpeechSource};
use whisper::WhisperSpeech;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Browse and search movies from the terminal", long_about = None)]
struct Args {
  /// TMDB API key (overrides the one in prefs.toml)
  #[arg(long, env = "TMDB_API_KEY", hide_env_values = true)]
  api_key: Option<String>,

  /// Start with a search instead of popular movies
  #[arg(short, long)]
  query: Option<String>,

  /// Use this text as the voice transcription instead of the microphone
  #[arg(long, value_name = "TEXT")]
  voice_text: Option<String>,

  /// Skip connectivity probing and assume the network is up
  #[arg(long)]
  no_probe: bool,

  /// Rows revealed per screen
  #[arg(long, value_name = "N")]
  rows: Option<usize>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Print shell completions
  Completions { shell: clap_complete::Shell },
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  if let Some(Commands::Completions { shell }) = args.command {
    let mut cmd = Args::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
    return Ok(());
  }

  let _log_guard = logging::init()?;
  info!(version = env!("CARGO_PKG_VERSION"), "mf starting");

  let config = Config::load();
  let Some(api_key) = config.resolve_api_key(args.api_key.as_deref()) else {
    bail!("API key missing. Set TMDB_API_KEY, pass --api-key, or add api_key to prefs.toml");
  };
  let client = Arc::new(TmdbClient::new(api_key, config.language.clone())?);

  let monitor: Arc<dyn ReachabilityMonitor> = if args.no_probe {
    Arc::new(ManualMonitor::default())
  } else {
    Arc::new(HttpProbeMonitor::spawn(constants().api_base_url.clone())?)
  };

  let speech: Arc<dyn SpeechSource> = match args.voice_text {
    Some(text) => Arc::new(ScriptedSpeech::new(text, Duration::from_millis(300))),
    None => Arc::new(WhisperSpeech::new()),
  };

  let rows = args.rows.unwrap_or(constants().screen_rows);
  let mut app = App::new(client, monitor, speech, config, Config::default_path(), rows);
  app.start(args.query.as_deref());
  run(&mut app).await
}

/// Pager loop: read commands from stdin, poll background work, print output.
async fn run(app: &mut App) -> Result<()> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut stdout = tokio::io::stdout();
  let mut tick = tokio::time::interval(Duration::from_millis(50));

  loop {
    tokio::select! {
      line = lines.next_line() => {
        match line.context("Failed to read input")? {
          Some(line) => app.handle_command(input::parse_command(&line)),
          None => break,
        }
      }
      _ = tick.tick() => {}
    }

    app.check_pending();
    for line in app.take_output() {
      stdout.write_all(line.as_bytes()).await?;
      stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;

    if app.should_quit {
      break;
    }
  }

  info!("mf exiting");
  Ok(())
}
