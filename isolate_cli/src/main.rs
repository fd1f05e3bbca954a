//! Isolate CLI - drive in-process isolation domains from the command line.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use error::CliError;
use isolate_core::config::load_config;
use isolate_core::IsolateConfig;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "isolate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run work inside in-process isolation domains", long_about = None)]
struct Cli {
    /// Sets the level of verbosity
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start several domains, run work in each and tear them down
    Demo {
        /// Number of domains to start
        #[arg(long, default_value_t = 2)]
        domains: usize,

        /// Units of work per domain
        #[arg(long, default_value_t = 3)]
        units: usize,

        /// Print teardown reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or write the effective configuration
    Config {
        /// Write the configuration to this file instead of printing it
        #[arg(long, value_name = "FILE")]
        write: Option<PathBuf>,
    },

    /// Resolve names from a directory of resources, inside and outside a domain
    Scan {
        /// Directory holding the resources
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Name prefixes the domain defines privately
        #[arg(long = "own", value_name = "PREFIX")]
        owned: Vec<String>,

        /// Names always delegated to the host
        #[arg(long, value_name = "NAME")]
        exclude: Vec<String>,
    },
}

fn init_logging(verbose: u8, config: &IsolateConfig) {
    let level = match verbose {
        0 => config.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => IsolateConfig::default(),
    };
    config.validate()?;
    init_logging(cli.verbose, &config);
    debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Demo { domains, units, json } => commands::demo::execute(&config, domains, units, json),
        Commands::Config { write } => commands::config::execute(&config, write.as_deref()),
        Commands::Scan { dir, owned, exclude } => commands::scan::execute(&config, &dir, owned, exclude),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
