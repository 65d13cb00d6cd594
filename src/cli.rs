use std::{path::PathBuf, sync::OnceLock};

use clap::Parser;

/// Alerts a Teams channel when swarm containers die, fail their health
/// checks or write to stderr.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the config file. Skipped when it does not exist.
    #[arg(short, long, default_value = "swarm-sentinel.toml")]
    pub config: PathBuf,
    /// Env files loaded in order before reading the configuration.
    pub env_files: Vec<PathBuf>,
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}
