//! Biosensor Sync CLI
//!
//! Keeps a live view of a remote biosensor time series in the terminal.

use anyhow::{anyhow, bail, Context, Result};
use biosensor_sync::{
    summarize_series, types::format_timestamp, Dataset, FetchConfig, Mode, RangeFetcher,
    RangeSource, Series, SyncClient, SyncConfig, SyncSnapshot, TimeRange, VERSION,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "biosensor-sync")]
#[command(version = VERSION)]
#[command(about = "Real-time sync client for remote biosensor time series", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Push channel URL override
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// REST API base URL override
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the dataset in sync and print every update
    Watch {
        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        display: DisplayArgs,
    },

    /// Run a single range query and print a summary
    Fetch {
        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        display: DisplayArgs,
    },

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args)]
struct RangeArgs {
    /// Range start (RFC 3339, or YYYY-MM-DDTHH:MM in UTC); enables fixed mode
    #[arg(long, value_parser = parse_datetime)]
    start: Option<DateTime<Utc>>,

    /// Range end; defaults to now
    #[arg(long, value_parser = parse_datetime, requires = "start")]
    end: Option<DateTime<Utc>>,

    /// Live mode lookback in hours (overrides the configured value)
    #[arg(long)]
    hours: Option<u32>,
}

#[derive(Args)]
struct DisplayArgs {
    /// Series to summarize (hr_non_session, hr_session, hrv, motion_count)
    #[arg(long, value_delimiter = ',')]
    series: Vec<Series>,

    /// Display timezone, e.g. America/Los_Angeles
    #[arg(long, default_value = "UTC")]
    tz: String,

    /// Print snapshots as JSON instead of text
    #[arg(long)]
    json: bool,
}

struct DisplayOptions {
    series: Vec<Series>,
    tz: Tz,
    json: bool,
}

impl DisplayArgs {
    fn resolve(self) -> Result<DisplayOptions> {
        let tz: Tz = self
            .tz
            .parse()
            .map_err(|e| anyhow!("unknown timezone '{}': {e}", self.tz))?;
        let series = if self.series.is_empty() {
            Series::default_selection()
        } else {
            self.series
        };
        Ok(DisplayOptions {
            series,
            tz,
            json: self.json,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Watch { range, display } => cmd_watch(config, range, display.resolve()?).await,
        Commands::Fetch { range, display } => cmd_fetch(config, range, display.resolve()?).await,
        Commands::Config { save } => cmd_config(&cli.config, &config, save),
    }
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SyncConfig::load().context("loading config")?,
    };
    if let Some(url) = &cli.ws_url {
        config.ws_url = url.clone();
    }
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.clone();
    }
    Ok(config)
}

fn resolve_mode(config: &mut SyncConfig, range: &RangeArgs) -> Result<Mode> {
    if let Some(hours) = range.hours {
        config.lookback_hours = hours;
    }
    match range.start {
        Some(start) => {
            let end = range.end.unwrap_or_else(Utc::now);
            let range = TimeRange::new(start, end);
            if !range.is_valid() {
                bail!("range start {} is after end {}", format_timestamp(&start), format_timestamp(&end));
            }
            Ok(Mode::Fixed(range))
        }
        None => Ok(Mode::live(config.lookback())),
    }
}

async fn cmd_watch(mut config: SyncConfig, range: RangeArgs, display: DisplayOptions) -> Result<()> {
    let mode = resolve_mode(&mut config, &range)?;

    println!("Biosensor Sync v{VERSION}");
    println!();
    println!("  Push channel: {}", config.ws_url);
    println!("  Range endpoint: {}/{}/live", config.api_base_url.trim_end_matches('/'), config.resource);
    println!("  Mode: {}", describe_mode(&mode));
    println!(
        "  Reconnect delay: {}s",
        config.reconnect.initial_delay.as_secs_f64()
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let handle = SyncClient::from_config(config)?.with_mode(mode).spawn();
    let mut updates = handle.subscribe();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    eprintln!("Sync client stopped unexpectedly");
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_snapshot(&snapshot, &display)?;
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Stopping...");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn cmd_fetch(mut config: SyncConfig, range: RangeArgs, display: DisplayOptions) -> Result<()> {
    let mode = resolve_mode(&mut config, &range)?;
    let range = mode.resolve(Utc::now());
    let fetcher = RangeFetcher::new(FetchConfig::from(&config))?;

    let result = fetcher
        .fetch(range)
        .await
        .with_context(|| format!("fetching {range}"))?;
    let warning = result.warning();
    let dataset = Dataset::from_records(result.records);

    if display.json {
        println!("{}", serde_json::to_string_pretty(&dataset)?);
        return Ok(());
    }

    println!("Range: {}", format_range(&range, display.tz));
    println!(
        "Records: {} admissible of {} returned (limit {})",
        dataset.len(),
        result.count,
        result.limit
    );
    if let Some(warning) = warning {
        println!("Warning: {warning}");
    }
    print_series(&dataset, &display);
    Ok(())
}

fn cmd_config(path: &Option<PathBuf>, config: &SyncConfig, save: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if save {
        let written = match path {
            Some(path) => {
                config.save_to(path)?;
                path.clone()
            }
            None => config.save()?,
        };
        println!();
        println!("Saved to {}", written.display());
    } else {
        println!();
        println!(
            "Config file: {}",
            path.clone().unwrap_or_else(SyncConfig::config_path).display()
        );
    }
    Ok(())
}

fn print_snapshot(snapshot: &SyncSnapshot, display: &DisplayOptions) -> Result<()> {
    if display.json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    let now = Utc::now().with_timezone(&display.tz);
    println!(
        "[{}] {} | {} records | generation {}",
        now.format("%H:%M:%S"),
        if snapshot.is_connected {
            "connected"
        } else {
            "disconnected"
        },
        snapshot.dataset.len(),
        snapshot.generation
    );
    if let Some(error) = &snapshot.error {
        println!("  Error: {error}");
    }
    if let Some(warning) = &snapshot.warning {
        println!("  Warning: {warning}");
    }
    print_series(&snapshot.dataset, display);
    Ok(())
}

fn print_series(dataset: &Dataset, display: &DisplayOptions) {
    if dataset.is_empty() {
        println!("  Waiting for biosensor data...");
        return;
    }
    for series in &display.series {
        match summarize_series(dataset, *series) {
            Some(summary) => {
                let span = match (summary.first, summary.last) {
                    (Some(first), Some(last)) => format!(
                        " ({} to {})",
                        first.with_timezone(&display.tz).format("%m-%d %H:%M"),
                        last.with_timezone(&display.tz).format("%m-%d %H:%M")
                    ),
                    _ => String::new(),
                };
                println!("  {}: {summary}{span}", series.label());
            }
            None => println!("  {}: no data", series.label()),
        }
    }
}

fn describe_mode(mode: &Mode) -> String {
    match mode {
        Mode::Live { lookback } => format!("live (last {}h)", lookback.num_hours()),
        Mode::Fixed(range) => format!("fixed {range}"),
    }
}

fn format_range(range: &TimeRange, tz: Tz) -> String {
    format!(
        "{} to {}",
        range.start.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z"),
        range.end.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z")
    )
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid datetime '{s}' (expected RFC 3339 or YYYY-MM-DDTHH:MM)"))
}
