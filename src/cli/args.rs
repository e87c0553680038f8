//! CLI argument definitions using clap derive

use crate::secrets::SecretMount;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stratum - layer cache for daemonless image builds
///
/// Fingerprints image content without extracting it, replays cached
/// step layers, and scaffolds build secrets for RUN commands.
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mount image layers as cached metadata and fingerprint paths
    Inspect(InspectArgs),

    /// Apply a cached step layer onto the working root
    Extract(ExtractArgs),

    /// Check whether every step of a build plan is cached
    Probe(ProbeArgs),

    /// Run a command with build secrets mounted
    Run(RunArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Path the image is mounted at
    #[arg(short, long, default_value = "/")]
    pub root: PathBuf,

    /// Layer tarball, bottom first (repeatable)
    #[arg(short, long = "layer", required = true)]
    pub layers: Vec<PathBuf>,

    /// Image paths to hash (repeatable; defaults to cache.patterns)
    #[arg(short, long = "pattern")]
    pub patterns: Vec<String>,

    /// Ignore the host filesystem and show cached entries only
    #[arg(long)]
    pub isolated: bool,

    /// Paths to look up through the overlay (defaults to the cached root listing)
    pub paths: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the extract command
#[derive(Parser, Debug)]
pub struct ExtractArgs {
    /// Cached layer tarball; a cache entry must be exactly one layer
    #[arg(short, long = "layer", required = true)]
    pub layers: Vec<PathBuf>,

    /// Working root (defaults to build.root_dir)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Accept the layer without writing anything
    #[arg(long)]
    pub simulate: bool,

    /// Do not apply tar ownership
    #[arg(long)]
    pub no_chown: bool,

    /// Step label used in logs
    #[arg(long, default_value = "extract")]
    pub step: String,

    /// Output format
    #[arg(short, long, default_value = "plain")]
    pub format: OutputFormat,
}

/// Arguments for the probe command
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// Build plan (TOML)
    #[arg(short, long)]
    pub plan: PathBuf,

    /// Layer store directory (defaults to cache.dir)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Build secret (ID=VALUE, repeatable)
    #[arg(long = "secret", value_name = "ID=VALUE")]
    pub secrets: Vec<String>,

    /// Secret mount: ID[,target=PATH][,env[=NAME]][,required]
    #[arg(short, long = "mount", value_name = "SPEC")]
    pub mounts: Vec<SecretMount>,

    /// Working directory for the command and relative secret targets
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Command and arguments to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for command results
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
