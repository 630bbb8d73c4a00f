//! # Flood Watch Entry Point
//!
//! The binary is the scheduler: it loads configuration, owns the poll timer and
//! the last-known-good [`StatusBoard`], and prints the board after each poll.
//!
//! ```text
//! flood-watch [--config PATH] [--once] [--json] [--rain] [--reading]
//! ```
//!
//! - `--once`: poll a single time and exit
//! - `--json`: print the board as JSON instead of text
//! - `--rain`: a rain advisory is in effect (enables the calibration's rain override)
//! - `--reading`: fetch only the raw upstream reading and print it as JSON

// Test modules
#[cfg(test)]
mod tests;

use anyhow::{bail, Context};
use chrono::Utc;
use flood_watch_lib::config::{Config, DEFAULT_CONFIG_PATH};
use flood_watch_lib::monitor::{poll_once, StatusBoard};
use flood_watch_lib::renderer::{draw_ascii, SensorReport};
use flood_watch_lib::tide_data::LevelSource;
use std::env;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command line options.
#[derive(Debug, PartialEq)]
struct Args {
    config: PathBuf,
    once: bool,
    json: bool,
    rain: bool,
    reading_only: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Args> {
    let mut parsed = Args {
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        once: false,
        json: false,
        rain: false,
        reading_only: false,
    };

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                parsed.config = args
                    .next()
                    .map(PathBuf::from)
                    .context("--config needs a path")?;
            }
            "--once" => parsed.once = true,
            "--json" => parsed.json = true,
            "--rain" => parsed.rain = true,
            "--reading" => parsed.reading_only = true,
            other => bail!("unknown argument `{other}`"),
        }
    }
    Ok(parsed)
}

fn init_tracing(level: &str) {
    // RUST_LOG wins over the config file.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_view(board: &StatusBoard, config: &Config, json: bool) -> anyhow::Result<()> {
    let view = board.view(Utc::now(), config.stale_after());
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        draw_ascii(&view);
    }
    Ok(())
}

async fn run(args: Args, config: Config) -> anyhow::Result<()> {
    let engine = config.engine()?;
    let source = config.source().context("building HTTP client")?;

    if args.reading_only {
        let result = source.fetch_latest_reading().await;
        let report = SensorReport::from_result(&result, Utc::now());
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut settings = config.poll_settings();
    settings.rain_advisory |= args.rain;

    info!(
        profile = %engine.profile.name,
        zones = engine.zones.len(),
        interval_secs = config.poll.interval_secs,
        rain_advisory = settings.rain_advisory,
        "flood watch starting"
    );

    let mut board = StatusBoard::default();
    let mut ticker = tokio::time::interval(config.poll_interval());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, exiting");
                return Ok(());
            }
        }

        let now = Utc::now();
        match poll_once(&source, &engine, &settings, now).await {
            Ok(briefing) => board.record_success(briefing),
            Err(err) => {
                // Keep showing the previous briefing, marked stale.
                error!(error = %err, "poll failed");
                board.record_failure(now, &err);
            }
        }

        print_view(&board, &config, args.json)?;

        if args.once {
            if board.last_good().is_none() {
                bail!("no water level available");
            }
            return Ok(());
        }
    }
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let args = parse_args(env::args().skip(1))?;

    // Config errors are fatal: a wrong threshold is worse than no status.
    let config = Config::load_from_path(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_tracing(&config.logging.level);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, config))
}
