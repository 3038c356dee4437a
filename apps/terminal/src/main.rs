use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use quiz_core::{
    HttpFlagFetcher, RoundController, RoundDependencies, RoundSettings, SystemClock,
};
use shared::catalog::Catalog;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing_subscriber::EnvFilter;

mod render;

use render::{parse_command, render_event, Command, TerminalCelebration, TerminalNotifier, HELP};

#[derive(Parser, Debug)]
#[command(name = "flagquiz", about = "Name the country behind each flag")]
struct Args {
    /// Flag image endpoint, queried with `?countryName=`.
    #[arg(long, default_value = "http://127.0.0.1:3000/api/flags")]
    flags_url: String,
    /// TOML catalog to play instead of the built-in one.
    #[arg(long)]
    catalog: Option<PathBuf>,
    #[arg(long, default_value_t = 2000)]
    reveal_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let catalog = match &args.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::flags(),
    };
    let fetcher = HttpFlagFetcher::new(&args.flags_url)
        .with_context(|| format!("invalid --flags-url '{}'", args.flags_url))?;
    let settings = RoundSettings {
        reveal_delay: Duration::from_millis(args.reveal_delay_ms),
        ..RoundSettings::default()
    };
    let controller = RoundController::new_with_dependencies(
        Arc::new(catalog),
        RoundDependencies {
            fetcher: Arc::new(fetcher),
            notifier: Arc::new(TerminalNotifier),
            celebration: Arc::new(TerminalCelebration),
            clock: Arc::new(SystemClock),
        },
        settings,
    );

    let mut events = controller.subscribe_events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", render_event(&event)),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{} flags to guess. {HELP}", controller.catalog().len());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Some(Command::Quit) => break,
            Some(Command::Help) => println!("{HELP}"),
            Some(Command::Intent(intent)) => {
                // Fetch failures are printed from the event stream.
                if let Err(err) = controller.apply(intent).await {
                    if err.is_precondition() {
                        println!("{err}");
                    }
                }
            }
            None => println!("unknown command '{}'; {HELP}", line.trim()),
        }
    }

    printer.abort();
    Ok(())
}
