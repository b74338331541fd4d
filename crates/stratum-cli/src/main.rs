mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use stratum_common::Version;
use stratum_core::TemplateFormat;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(about = "Versioned, reversible schema migrations", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Environment from the config file (defaults to default_environment)
    #[arg(short, long, global = true, env = "STRATUM_ENV")]
    pub env: Option<String>,

    /// Path to the config file (defaults to ~/.stratum/config.yml)
    #[arg(short, long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending migrations
    Migrate {
        /// Stop after this version
        #[arg(long, value_name = "VERSION")]
        target: Option<Version>,
    },

    /// Revert applied migrations (one step by default)
    Rollback {
        /// Revert every version above this one; 0 reverts everything
        #[arg(long, value_name = "VERSION", conflicts_with = "steps")]
        target: Option<Version>,

        /// Number of migrations to revert
        #[arg(long)]
        steps: Option<usize>,
    },

    /// Revert the latest migration and apply it again
    Redo,

    /// Show applied, pending and missing migrations
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Set, clear or toggle the rollback breakpoint on an applied version
    Breakpoint {
        #[arg(long, value_name = "VERSION", required_unless_present = "remove_all")]
        target: Option<Version>,

        #[arg(long, conflicts_with = "unset")]
        set: bool,

        #[arg(long)]
        unset: bool,

        /// Clear every breakpoint
        #[arg(long, conflicts_with_all = ["target", "set", "unset"])]
        remove_all: bool,
    },

    /// Create a new migration file
    Create {
        /// Migration name, e.g. AddUsersTable
        name: String,

        #[arg(long, default_value = "yaml")]
        format: TemplateFormat,

        /// Directory to write into (defaults to the first configured path)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(commands::exit_code(&e))
        }
    }
}
