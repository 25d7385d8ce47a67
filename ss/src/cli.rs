//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// SsrSync - server render / client hydration inspector
#[derive(Parser)]
#[command(
    name = "ss",
    about = "Inspect and demonstrate server-render data and head hydration",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode the data and head payloads embedded in a rendered document
    Inspect {
        /// Rendered HTML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Render the three-key demo page on the server
    Demo {
        /// Also hydrate a client from the rendered page
        #[arg(long)]
        client: bool,
    },
}
