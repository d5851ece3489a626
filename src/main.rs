//! Pathwatcher - print change, rename and delete events for paths.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pathwatcher::config::ConfigLoader;
use pathwatcher::display::{print_closed, print_error, print_event, print_watching};
use pathwatcher::watcher::{PathWatcherEvent, WatchHub};

#[derive(Parser)]
#[command(
    name = "pathwatcher",
    about = "Watch files and directories for changes",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print one JSON object per event.
    #[arg(long)]
    json: bool,

    /// Paths to watch.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn print_events(watched: PathBuf, mut stream: BroadcastStream<PathWatcherEvent>, json: bool) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(PathWatcherEvent::Event(event)) => print_event(&watched, &event, json),
            Ok(PathWatcherEvent::Closed) => {
                print_closed(&watched);
                break;
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(path = %watched.display(), skipped, "Event output lagging");
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = cli
        .config
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let hub = match WatchHub::new(&config) {
        Ok(hub) => hub,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start watch hub");
            return ExitCode::FAILURE;
        }
    };

    let mut watchers = Vec::new();
    let mut printers = JoinSet::new();
    for path in &cli.paths {
        match hub.watch(path) {
            Ok(watcher) => {
                print_watching(watcher.path());
                printers.spawn(print_events(
                    watcher.path().to_path_buf(),
                    watcher.stream(),
                    cli.json,
                ));
                watchers.push(watcher);
            }
            Err(e) => print_error(path, &e.to_string()),
        }
    }

    if watchers.is_empty() {
        return ExitCode::FAILURE;
    }

    tracing::info!(paths = ?hub.watched_paths(), "Watching");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Interrupted, closing watchers");
            hub.close_all_watchers();
        }
        () = async { while printers.join_next().await.is_some() {} } => {
            tracing::info!("All watchers closed");
        }
    }

    while printers.join_next().await.is_some() {}
    ExitCode::SUCCESS
}
