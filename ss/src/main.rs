//! SsrSync - server render / client hydration inspector
//!
//! CLI entry point for decoding rendered pages and running the demo page.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use ssrsync::cli::{Cli, Command};
use ssrsync::config::Config;
use ssrsync::demo::{self, KeyReport};
use ssrsync::inspect::{self, Inspection};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ssrsync")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("ssrsync.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Inspect { file } => cmd_inspect(&config, &file),
        Command::Demo { client } => cmd_demo(&config, client).await,
    }
}

fn cmd_inspect(config: &Config, file: &Path) -> Result<()> {
    let inspection = inspect::inspect_file(file, config)?;
    print_inspection(&inspection);
    Ok(())
}

fn print_inspection(inspection: &Inspection) {
    println!("{}", "Data".bold());
    match &inspection.data {
        Some(payload) if !payload.is_empty() => {
            for (key, entry) in payload {
                match (&entry.data, &entry.error) {
                    (_, Some(err)) => println!("  {} {} {}", "✗".red(), key.cyan(), err.to_string().red()),
                    (Some(value), None) => println!("  {} {} {}", "✓".green(), key.cyan(), value),
                    (None, None) => println!("  {} {} {}", "·".dimmed(), key.cyan(), "(empty)".dimmed()),
                }
            }
        }
        Some(_) => println!("  {}", "(no keys)".dimmed()),
        None => println!("  {}", "no data payload".yellow()),
    }

    println!("{}", "Head".bold());
    match &inspection.head {
        Some(fragments) if !fragments.is_empty() => {
            for fragment in fragments {
                println!("  {}", fragment.to_html());
            }
        }
        Some(_) => println!("  {}", "(no fragments)".dimmed()),
        None => println!("  {}", "no head payload".yellow()),
    }
}

fn print_key(report: &KeyReport) {
    let state = if report.loading { "loading".yellow() } else { "settled".green() };
    let value = match (&report.data, &report.error) {
        (_, Some(err)) => format!("error={}", err).red().to_string(),
        (Some(value), None) => format!("data={}", value),
        (None, None) => "-".dimmed().to_string(),
    };
    println!("  {} {} {}", report.key.cyan(), state, value);
}

async fn cmd_demo(config: &Config, client: bool) -> Result<()> {
    let server = demo::run_server(config).await?;
    println!("{}", server.html);

    if !client {
        return Ok(());
    }

    let run = demo::run_client(config, &server.html).await?;
    println!();
    println!("{}", "Client".bold());
    for report in &run.keys {
        print_key(report);
    }
    println!("  head fragments: {}", run.head.len());
    println!("  fetches: {}", run.fetches);
    Ok(())
}
