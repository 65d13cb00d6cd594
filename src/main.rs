use std::process::ExitCode;

use config::{EnvVars, SentinelConfig};
use sentinel::SentinelError;

mod cli;
mod config;
mod dispatcher;
mod docker;
mod event;
mod logwatch;
mod notifier;
mod sentinel;
mod signals;
mod state;

fn try_main() -> Result<(), SentinelError> {
    let args = cli::get_cli_args();

    let mut env = EnvVars::from_process();
    env.load_files(&args.env_files)?;
    let config = SentinelConfig::try_init(&args.config, &env)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let shutdown = signals::handle_shutdown()?;

    runtime.block_on(sentinel::run(config, shutdown))
}

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::init();

    // Pick the rustls crypto provider before the webhook client is built.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
