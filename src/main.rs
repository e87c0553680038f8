//! Stratum - layer cache for daemonless image builds
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use stratum::cli::args::ConfigAction;
use stratum::cli::{Cli, Commands};
use stratum::config::{Config, ConfigManager};
use stratum::error::StratumResult;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StratumResult<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::resolve(cli.config.clone());

    // Init rewrites the config, so a broken file must not block it
    let config = match &cli.command {
        Commands::Config(args) if matches!(args.action, Some(ConfigAction::Init { .. })) => {
            Config::default()
        }
        _ => config_manager.load().await?,
    };

    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Inspect(args) => stratum::cli::commands::inspect(args, &config).await,
        Commands::Extract(args) => stratum::cli::commands::extract(args, &config).await,
        Commands::Probe(args) => stratum::cli::commands::probe(args, &config).await,
        Commands::Run(args) => stratum::cli::commands::run(args, &config).await,
        Commands::Config(args) => {
            stratum::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn (spinners only), 1 = info, 2+ = debug; `general.verbose` implies info
fn init_logging(verbose: u8, config: &Config) {
    let level = match verbose.max(u8::from(config.general.verbose)) {
        0 => "stratum=warn",
        1 => "stratum=info",
        _ => "stratum=debug",
    };
    let filter = EnvFilter::new(level);

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .init();
    }
}
