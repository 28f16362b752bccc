mod cmd;
mod output;

use autopilot_core::config::DEFAULT_CONFIG_FILE;
use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, manifest::ManifestSubcommand, state::StateSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "autopilot",
    about = "Operator tools for the market autopilot: deliverable manifests, state store, config",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to the autopilot config file
    #[arg(long, global = true, env = "AUTOPILOT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log at debug level
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Canonicalize, hash, sign, and verify deliverable manifests
    Manifest {
        #[command(subcommand)]
        subcommand: ManifestSubcommand,
    },

    /// Inspect the persisted key-value state
    State {
        #[command(subcommand)]
        subcommand: StateSubcommand,
    },

    /// Create, show, and validate the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Manifest { subcommand } => cmd::manifest::run(&cli.config, subcommand, cli.json),
        Commands::State { subcommand } => cmd::state::run(&cli.config, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
